//! Video-Sinks und Stream-Referenzen

use crate::capture::{CaptureSession, MediaKind};
use crate::engine::RemoteTrack;
use parking_lot::Mutex;
use std::sync::Arc;

/// Track innerhalb eines Streams
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInfo {
    pub id: String,
    pub kind: MediaKind,
}

/// Live-Stream, wie er einem Sink zugewiesen wird
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaStream {
    pub id: String,
    pub tracks: Vec<TrackInfo>,
}

impl MediaStream {
    pub fn from_capture(session: &CaptureSession) -> Self {
        Self {
            id: session.id().to_string(),
            tracks: session
                .tracks()
                .iter()
                .map(|t| TrackInfo {
                    id: t.id().to_string(),
                    kind: t.kind(),
                })
                .collect(),
        }
    }

    pub fn count_of(&self, kind: MediaKind) -> usize {
        self.tracks.iter().filter(|t| t.kind == kind).count()
    }
}

/// Rendering-Sink; Clones zeigen auf denselben Slot
#[derive(Debug, Clone)]
pub struct VideoSink {
    name: &'static str,
    stream: Arc<Mutex<Option<MediaStream>>>,
}

impl VideoSink {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            stream: Arc::new(Mutex::new(None)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn assign(&self, stream: MediaStream) {
        tracing::debug!(
            "Sink '{}' now shows stream {} ({} track(s))",
            self.name,
            stream.id,
            stream.tracks.len()
        );
        *self.stream.lock() = Some(stream);
    }

    pub fn clear(&self) {
        *self.stream.lock() = None;
    }

    pub fn stream(&self) -> Option<MediaStream> {
        self.stream.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.stream.lock().is_none()
    }

    /// Fügt einen eingehenden Track hinzu
    ///
    /// Tracks mit gleicher Stream-ID landen im selben Stream, ein neuer
    /// Stream ersetzt den bisherigen. Doppelte Track-IDs werden ignoriert.
    pub fn attach_remote_track(&self, track: &RemoteTrack) {
        let mut slot = self.stream.lock();
        let info = TrackInfo {
            id: track.id.clone(),
            kind: track.kind,
        };

        match slot.as_mut() {
            Some(stream) if stream.id == track.stream_id => {
                if !stream.tracks.iter().any(|t| t.id == info.id) {
                    stream.tracks.push(info);
                }
            }
            _ => {
                *slot = Some(MediaStream {
                    id: track.stream_id.clone(),
                    tracks: vec![info],
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(id: &str, kind: MediaKind, stream_id: &str) -> RemoteTrack {
        RemoteTrack {
            id: id.to_string(),
            kind,
            stream_id: stream_id.to_string(),
        }
    }

    #[test]
    fn test_remote_tracks_accumulate_per_stream() {
        let sink = VideoSink::new("remote");
        sink.attach_remote_track(&remote("a", MediaKind::Audio, "s1"));
        sink.attach_remote_track(&remote("v", MediaKind::Video, "s1"));
        sink.attach_remote_track(&remote("v", MediaKind::Video, "s1"));

        let stream = sink.stream().unwrap();
        assert_eq!(stream.id, "s1");
        assert_eq!(stream.tracks.len(), 2);
        assert_eq!(stream.count_of(MediaKind::Audio), 1);
        assert_eq!(stream.count_of(MediaKind::Video), 1);
    }

    #[test]
    fn test_new_stream_replaces_old() {
        let sink = VideoSink::new("remote");
        sink.attach_remote_track(&remote("a", MediaKind::Audio, "s1"));
        sink.attach_remote_track(&remote("b", MediaKind::Audio, "s2"));

        let stream = sink.stream().unwrap();
        assert_eq!(stream.id, "s2");
        assert_eq!(stream.tracks.len(), 1);
    }

    #[test]
    fn test_clones_share_slot() {
        let sink = VideoSink::new("local");
        let view = sink.clone();
        sink.attach_remote_track(&remote("a", MediaKind::Audio, "s1"));
        assert!(!view.is_empty());

        view.clear();
        assert!(sink.is_empty());
    }
}
