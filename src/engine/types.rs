//! Gemeinsame Typen für Engine-Implementierungen

use crate::capture::MediaKind;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Standard STUN Server
pub const DEFAULT_ICE_SERVER: &str = "stun:stun.l.google.com:19302";

/// Gemeinsame Konfiguration beider Endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtcConfig {
    pub ice_servers: Vec<String>,
}

impl Default for RtcConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![DEFAULT_ICE_SERVER.to_string()],
        }
    }
}

// ============================================================================
// ENDPOINT ROLE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointRole {
    Local,
    Remote,
}

impl EndpointRole {
    pub fn peer(&self) -> Self {
        match self {
            EndpointRole::Local => EndpointRole::Remote,
            EndpointRole::Remote => EndpointRole::Local,
        }
    }
}

impl fmt::Display for EndpointRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointRole::Local => f.write_str("local"),
            EndpointRole::Remote => f.write_str("remote"),
        }
    }
}

// ============================================================================
// SESSION DESCRIPTION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdpType::Offer => f.write_str("offer"),
            SdpType::Answer => f.write_str("answer"),
        }
    }
}

/// Offer oder Answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

// ============================================================================
// CANDIDATE
// ============================================================================

/// ICE Candidate, JSON-kompatibel zu `RTCIceCandidateInit`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
}

// ============================================================================
// REMOTE TRACK
// ============================================================================

/// Eingehender Track, wie er vom Endpoint gemeldet wird
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    pub id: String,
    pub kind: MediaKind,
    pub stream_id: String,
}

// ============================================================================
// HANDLERS
// ============================================================================

pub type CandidateHandler = Box<dyn Fn(Candidate) -> BoxFuture<'static, ()> + Send + Sync>;

pub type RemoteTrackHandler = Box<dyn Fn(RemoteTrack) -> BoxFuture<'static, ()> + Send + Sync>;

/// Geteilte Varianten für Engines, die Handler aus mehreren Tasks aufrufen
pub(crate) type SharedCandidateHandler =
    Arc<dyn Fn(Candidate) -> BoxFuture<'static, ()> + Send + Sync>;

pub(crate) type SharedTrackHandler = Arc<dyn Fn(RemoteTrack) -> BoxFuture<'static, ()> + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_json_matches_browser_shape() {
        let candidate = Candidate {
            candidate: "candidate:1 1 udp 2130706431 127.0.0.1 50000 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
        };

        let json = serde_json::to_value(&candidate).unwrap();
        assert_eq!(json["sdpMid"], "0");
        assert_eq!(json["sdpMLineIndex"], 0);

        let back: Candidate = serde_json::from_value(json).unwrap();
        assert_eq!(back, candidate);
    }

    #[test]
    fn test_endpoint_role_peer() {
        assert_eq!(EndpointRole::Local.peer(), EndpointRole::Remote);
        assert_eq!(EndpointRole::Remote.peer(), EndpointRole::Local);
    }
}
