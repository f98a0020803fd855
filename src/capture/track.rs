//! Media Tracks und Capture Sessions

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// ============================================================================
// MEDIA KIND
// ============================================================================

/// Art eines Tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }

    /// Parst den Medientyp aus einer SDP `m=` Zeile bzw. einem Codec-Typ
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "audio" => Some(MediaKind::Audio),
            "video" => Some(MediaKind::Video),
            _ => None,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// MEDIA TRACK
// ============================================================================

/// Ein einzelner Capture-Track
///
/// Clones teilen sich das Liveness-Flag: wird ein Clone gestoppt,
/// sind alle gestoppt.
#[derive(Clone)]
pub struct MediaTrack {
    id: String,
    kind: MediaKind,
    label: String,
    live: Arc<AtomicBool>,
}

impl MediaTrack {
    pub fn new(kind: MediaKind, label: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            label: label.into(),
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Beendet den Track. Mehrfaches Aufrufen ist unkritisch.
    pub fn stop(&self) {
        if self.live.swap(false, Ordering::AcqRel) {
            tracing::debug!("Stopped {} track {} ({})", self.kind, self.id, self.label);
        }
    }
}

impl fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("label", &self.label)
            .field("live", &self.is_live())
            .finish()
    }
}

// ============================================================================
// CAPTURE SESSION
// ============================================================================

/// Aktive Capture mit geordneter Track-Liste
#[derive(Debug, Clone)]
pub struct CaptureSession {
    id: String,
    tracks: Vec<MediaTrack>,
}

impl CaptureSession {
    pub fn new(tracks: Vec<MediaTrack>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tracks,
        }
    }

    /// ID der Session, dient gleichzeitig als Stream-ID beim Anhängen
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn live_track_count(&self) -> usize {
        self.tracks.iter().filter(|t| t.is_live()).count()
    }

    /// Stoppt alle Tracks
    pub fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_is_shared_between_clones() {
        let track = MediaTrack::new(MediaKind::Video, "camera");
        let clone = track.clone();
        assert!(clone.is_live());

        track.stop();
        assert!(!clone.is_live());

        // zweiter Aufruf darf nicht paniken
        clone.stop();
    }

    #[test]
    fn test_session_stop_ends_every_track() {
        let session = CaptureSession::new(vec![
            MediaTrack::new(MediaKind::Audio, "mic"),
            MediaTrack::new(MediaKind::Video, "camera"),
        ]);
        assert_eq!(session.live_track_count(), 2);

        session.stop();
        assert_eq!(session.live_track_count(), 0);
        assert!(!session.is_empty());
    }

    #[test]
    fn test_media_kind_parse() {
        assert_eq!(MediaKind::parse("audio"), Some(MediaKind::Audio));
        assert_eq!(MediaKind::parse("video"), Some(MediaKind::Video));
        assert_eq!(MediaKind::parse("application"), None);
    }
}
