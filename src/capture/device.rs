//! Capture-Quellen
//!
//! `CaptureDevice` ist die Schnittstelle zur Plattform-Capture.
//! `GeneratedCapture` liefert synthetische Tracks (Testbild / Stille),
//! damit der Call ohne Kamera und Mikrofon aufgebaut werden kann.

use super::track::{CaptureSession, MediaKind, MediaTrack};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("Permission denied: {0}")]
    Denied(String),

    #[error("Requested device not found: {0}")]
    Unavailable(String),

    #[error("At least one of audio or video must be requested")]
    InvalidConstraints,
}

// ============================================================================
// CONSTRAINTS
// ============================================================================

/// Welche Medienarten angefordert werden
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureConstraints {
    #[serde(default = "default_true")]
    pub video: bool,
    #[serde(default = "default_true")]
    pub audio: bool,
}

fn default_true() -> bool {
    true
}

impl CaptureConstraints {
    pub fn audio_video() -> Self {
        Self {
            video: true,
            audio: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.video && !self.audio
    }
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self::audio_video()
    }
}

// ============================================================================
// CAPTURE DEVICE
// ============================================================================

/// Plattform-Capture API
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    async fn request_capture(
        &self,
        constraints: CaptureConstraints,
    ) -> Result<CaptureSession, CaptureError>;
}

/// Synthetische Capture-Quelle
#[derive(Debug, Default)]
pub struct GeneratedCapture {
    denial: Mutex<Option<CaptureError>>,
}

impl GeneratedCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Quelle, die jede Anfrage ablehnt (z.B. Berechtigung verweigert)
    pub fn denying(error: CaptureError) -> Self {
        Self {
            denial: Mutex::new(Some(error)),
        }
    }

    /// Setzt oder entfernt die Ablehnung zur Laufzeit
    pub fn set_denial(&self, error: Option<CaptureError>) {
        *self.denial.lock() = error;
    }
}

#[async_trait]
impl CaptureDevice for GeneratedCapture {
    async fn request_capture(
        &self,
        constraints: CaptureConstraints,
    ) -> Result<CaptureSession, CaptureError> {
        if constraints.is_empty() {
            return Err(CaptureError::InvalidConstraints);
        }

        if let Some(err) = self.denial.lock().clone() {
            tracing::warn!("Capture request rejected: {}", err);
            return Err(err);
        }

        let mut tracks = Vec::with_capacity(2);
        if constraints.audio {
            tracks.push(MediaTrack::new(MediaKind::Audio, "Generated microphone"));
        }
        if constraints.video {
            tracks.push(MediaTrack::new(MediaKind::Video, "Generated camera"));
        }

        let session = CaptureSession::new(tracks);
        tracing::info!(
            "Capture session {} started with {} track(s)",
            session.id(),
            session.tracks().len()
        );
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_generated_capture_respects_constraints() {
        let device = GeneratedCapture::new();

        let session = device
            .request_capture(CaptureConstraints::audio_video())
            .await
            .unwrap();
        let kinds: Vec<_> = session.tracks().iter().map(|t| t.kind()).collect();
        assert_eq!(kinds, vec![MediaKind::Audio, MediaKind::Video]);

        let session = device
            .request_capture(CaptureConstraints {
                video: true,
                audio: false,
            })
            .await
            .unwrap();
        assert_eq!(session.tracks().len(), 1);
        assert_eq!(session.tracks()[0].kind(), MediaKind::Video);
    }

    #[tokio::test]
    async fn test_empty_constraints_rejected() {
        let device = GeneratedCapture::new();
        let err = device
            .request_capture(CaptureConstraints {
                video: false,
                audio: false,
            })
            .await
            .unwrap_err();
        assert_eq!(err, CaptureError::InvalidConstraints);
    }

    #[tokio::test]
    async fn test_denial_can_be_lifted() {
        let device = GeneratedCapture::denying(CaptureError::Denied("blocked".into()));
        assert!(device.request_capture(CaptureConstraints::default()).await.is_err());

        device.set_denial(None);
        assert!(device.request_capture(CaptureConstraints::default()).await.is_ok());
    }

    #[test]
    fn test_constraints_default_from_json() {
        let c: CaptureConstraints = serde_json::from_str(r#"{"audio": false}"#).unwrap();
        assert!(c.video);
        assert!(!c.audio);
    }
}
