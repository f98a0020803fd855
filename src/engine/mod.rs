//! Engine Module - Echtzeit-Verbindungs-Engine
//!
//! Dieses Modul definiert die Schnittstelle zur Verbindungs-Engine:
//! - `ConnectionEngine` erzeugt Endpoints mit gemeinsamer ICE-Konfiguration
//! - `ConnectionEndpoint` kapselt eine Peer Connection
//!
//! Implementierungen:
//! - `WebRtcEngine` (webrtc-rs)
//! - `MemoryEngine` (deterministisch, ohne Netzwerk)

mod memory;
mod rtc;
mod types;

pub use self::memory::{FailPoint, MemoryEndpoint, MemoryEngine, SignalingState};
pub use self::rtc::{WebRtcEndpoint, WebRtcEngine};
pub use self::types::*;

use crate::capture::MediaTrack;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("WebRTC error: {0}")]
    WebRTC(String),

    #[error("Invalid SDP: {0}")]
    InvalidSdp(String),

    #[error("Invalid signaling state: {0}")]
    InvalidState(String),

    #[error("Connection is closed")]
    Closed,

    #[error("Injected failure: {0}")]
    Injected(String),
}

// ============================================================================
// TRAITS
// ============================================================================

/// Eine Seite einer Peer Connection
///
/// Die Event-Handler müssen vor `set_local_description` registriert werden,
/// sonst gehen Candidates verloren.
#[async_trait]
pub trait ConnectionEndpoint: Send + Sync {
    fn role(&self) -> EndpointRole;

    /// Hängt einen Capture-Track an, zusammen mit der Stream-ID seiner Session
    async fn add_track(&self, track: &MediaTrack, stream_id: &str) -> Result<(), EngineError>;

    async fn create_offer(&self) -> Result<SessionDescription, EngineError>;

    async fn create_answer(&self) -> Result<SessionDescription, EngineError>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), EngineError>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), EngineError>;

    async fn add_remote_candidate(&self, candidate: Candidate) -> Result<(), EngineError>;

    /// Gibt alle Engine-Ressourcen frei
    async fn close(&self) -> Result<(), EngineError>;

    fn on_candidate_discovered(&self, handler: CandidateHandler);

    fn on_remote_track(&self, handler: RemoteTrackHandler);
}

/// Fabrik für Endpoints
#[async_trait]
pub trait ConnectionEngine: Send + Sync {
    async fn create_endpoint(
        &self,
        role: EndpointRole,
        config: &RtcConfig,
    ) -> Result<Arc<dyn ConnectionEndpoint>, EngineError>;
}
