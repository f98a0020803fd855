//! In-Memory Engine
//!
//! Spricht eine minimale SDP-Teilmenge (`m=` und `a=msid:` Zeilen) und
//! liefert Candidates sowie Remote Tracks synchron aus. Kein Netzwerk,
//! keine Medien. Fehler lassen sich gezielt an einem Handshake-Schritt
//! auslösen.

use super::types::{SharedCandidateHandler, SharedTrackHandler};
use super::{
    Candidate, CandidateHandler, ConnectionEndpoint, ConnectionEngine, EndpointRole,
    EngineError, RemoteTrack, RemoteTrackHandler, RtcConfig, SdpType, SessionDescription,
};
use crate::capture::{MediaKind, MediaTrack};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

/// Erster Port für Host-Candidates
const FIRST_HOST_PORT: u16 = 50000;

// ============================================================================
// FAIL POINTS
// ============================================================================

/// Schritt, an dem die Engine einen Fehler auslöst
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    CreateRemoteEndpoint,
    AddTrack,
    CreateOffer,
    SetLocalOffer,
    SetRemoteOffer,
    CreateAnswer,
    SetLocalAnswer,
    SetRemoteAnswer,
}

impl FailPoint {
    pub const HANDSHAKE: [FailPoint; 8] = [
        FailPoint::CreateRemoteEndpoint,
        FailPoint::AddTrack,
        FailPoint::CreateOffer,
        FailPoint::SetLocalOffer,
        FailPoint::SetRemoteOffer,
        FailPoint::CreateAnswer,
        FailPoint::SetLocalAnswer,
        FailPoint::SetRemoteAnswer,
    ];

    fn error(self) -> EngineError {
        EngineError::Injected(format!("{:?}", self))
    }
}

// ============================================================================
// SIGNALING STATE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    Closed,
}

// ============================================================================
// MEMORY ENGINE
// ============================================================================

/// Engine ohne Netzwerk, merkt sich alle erzeugten Endpoints
pub struct MemoryEngine {
    fail_at: Option<FailPoint>,
    endpoints: Mutex<Vec<Arc<MemoryEndpoint>>>,
    next_port: Arc<AtomicU16>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self {
            fail_at: None,
            endpoints: Mutex::new(Vec::new()),
            next_port: Arc::new(AtomicU16::new(FIRST_HOST_PORT)),
        }
    }

    /// Engine, die am angegebenen Schritt fehlschlägt
    pub fn failing_at(point: FailPoint) -> Self {
        Self {
            fail_at: Some(point),
            ..Self::new()
        }
    }

    /// Alle bisher erzeugten Endpoints in Erzeugungsreihenfolge
    pub fn endpoints(&self) -> Vec<Arc<MemoryEndpoint>> {
        self.endpoints.lock().clone()
    }

    fn should_fail(&self, point: FailPoint) -> bool {
        self.fail_at == Some(point)
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectionEngine for MemoryEngine {
    async fn create_endpoint(
        &self,
        role: EndpointRole,
        config: &RtcConfig,
    ) -> Result<Arc<dyn ConnectionEndpoint>, EngineError> {
        if role == EndpointRole::Remote && self.should_fail(FailPoint::CreateRemoteEndpoint) {
            return Err(FailPoint::CreateRemoteEndpoint.error());
        }

        let port = self.next_port.fetch_add(1, Ordering::Relaxed);
        let endpoint = Arc::new(MemoryEndpoint::new(role, port, self.fail_at));
        tracing::debug!(
            "Created in-memory {} endpoint on port {} ({} ICE server(s))",
            role,
            port,
            config.ice_servers.len()
        );

        self.endpoints.lock().push(Arc::clone(&endpoint));
        Ok(endpoint)
    }
}

// ============================================================================
// MEMORY ENDPOINT
// ============================================================================

#[derive(Debug, Clone)]
struct AttachedTrack {
    id: String,
    kind: MediaKind,
    stream_id: String,
}

struct EndpointState {
    signaling: SignalingState,
    tracks: Vec<AttachedTrack>,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    remote_candidates: Vec<Candidate>,
    gathered: bool,
    candidate_handler: Option<SharedCandidateHandler>,
    track_handler: Option<SharedTrackHandler>,
}

pub struct MemoryEndpoint {
    role: EndpointRole,
    port: u16,
    fail_at: Option<FailPoint>,
    state: Mutex<EndpointState>,
}

impl MemoryEndpoint {
    fn new(role: EndpointRole, port: u16, fail_at: Option<FailPoint>) -> Self {
        Self {
            role,
            port,
            fail_at,
            state: Mutex::new(EndpointState {
                signaling: SignalingState::Stable,
                tracks: Vec::new(),
                local: None,
                remote: None,
                remote_candidates: Vec::new(),
                gathered: false,
                candidate_handler: None,
                track_handler: None,
            }),
        }
    }

    pub fn signaling_state(&self) -> SignalingState {
        self.state.lock().signaling
    }

    pub fn is_closed(&self) -> bool {
        self.signaling_state() == SignalingState::Closed
    }

    pub fn attached_track_count(&self) -> usize {
        self.state.lock().tracks.len()
    }

    pub fn local_description(&self) -> Option<SessionDescription> {
        self.state.lock().local.clone()
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.state.lock().remote.clone()
    }

    /// Vom Peer weitergeleitete Candidates
    pub fn remote_candidates(&self) -> Vec<Candidate> {
        self.state.lock().remote_candidates.clone()
    }

    fn check(&self, point: FailPoint) -> Result<(), EngineError> {
        if self.fail_at == Some(point) {
            return Err(point.error());
        }
        Ok(())
    }

    fn host_candidate(&self) -> Candidate {
        Candidate {
            candidate: format!(
                "candidate:1 1 udp 2130706431 127.0.0.1 {} typ host",
                self.port
            ),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
        }
    }
}

/// Rendert eine SDP mit einer `m=` Sektion pro Track
fn render_sdp(session_id: u16, sections: &[(MediaKind, &str, Option<&AttachedTrack>)]) -> String {
    let mut sdp = String::new();
    let _ = write!(
        sdp,
        "v=0\r\no=- {} 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n",
        session_id
    );
    for (mid, (kind, direction, track)) in sections.iter().enumerate() {
        let _ = write!(
            sdp,
            "m={} 9 UDP/TLS/RTP/SAVPF 0\r\na=mid:{}\r\na={}\r\n",
            kind, mid, direction
        );
        if let Some(track) = track {
            let _ = write!(sdp, "a=msid:{} {}\r\n", track.stream_id, track.id);
        }
    }
    sdp
}

/// Liest die `m=` Sektionen und deren Tracks aus einer SDP
fn parse_sdp(sdp: &str) -> Result<Vec<(MediaKind, Option<(String, String)>)>, EngineError> {
    if !sdp.starts_with("v=0") {
        return Err(EngineError::InvalidSdp("missing version line".to_string()));
    }

    let mut sections: Vec<(MediaKind, Option<(String, String)>)> = Vec::new();
    for line in sdp.lines() {
        if let Some(media) = line.strip_prefix("m=") {
            let kind_str = media.split(' ').next().unwrap_or_default();
            let kind = MediaKind::parse(kind_str)
                .ok_or_else(|| EngineError::InvalidSdp(format!("unknown media '{}'", kind_str)))?;
            sections.push((kind, None));
        } else if let Some(msid) = line.strip_prefix("a=msid:") {
            let mut parts = msid.split_whitespace();
            let (Some(stream_id), Some(track_id)) = (parts.next(), parts.next()) else {
                return Err(EngineError::InvalidSdp(format!("malformed msid '{}'", msid)));
            };
            let section = sections
                .last_mut()
                .ok_or_else(|| EngineError::InvalidSdp("msid before media section".to_string()))?;
            section.1 = Some((stream_id.to_string(), track_id.to_string()));
        }
    }
    Ok(sections)
}

#[async_trait]
impl ConnectionEndpoint for MemoryEndpoint {
    fn role(&self) -> EndpointRole {
        self.role
    }

    async fn add_track(&self, track: &MediaTrack, stream_id: &str) -> Result<(), EngineError> {
        self.check(FailPoint::AddTrack)?;

        let mut state = self.state.lock();
        if state.signaling == SignalingState::Closed {
            return Err(EngineError::Closed);
        }
        state.tracks.push(AttachedTrack {
            id: track.id().to_string(),
            kind: track.kind(),
            stream_id: stream_id.to_string(),
        });
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, EngineError> {
        self.check(FailPoint::CreateOffer)?;

        let state = self.state.lock();
        match state.signaling {
            SignalingState::Stable | SignalingState::HaveLocalOffer => {}
            SignalingState::Closed => return Err(EngineError::Closed),
            other => {
                return Err(EngineError::InvalidState(format!(
                    "cannot create offer in {:?}",
                    other
                )))
            }
        }

        let sections: Vec<_> = state
            .tracks
            .iter()
            .map(|t| (t.kind, "sendrecv", Some(t)))
            .collect();
        Ok(SessionDescription::offer(render_sdp(self.port, &sections)))
    }

    async fn create_answer(&self) -> Result<SessionDescription, EngineError> {
        self.check(FailPoint::CreateAnswer)?;

        let state = self.state.lock();
        match state.signaling {
            SignalingState::HaveRemoteOffer => {}
            SignalingState::Closed => return Err(EngineError::Closed),
            other => {
                return Err(EngineError::InvalidState(format!(
                    "cannot create answer in {:?}",
                    other
                )))
            }
        }

        let offer = state
            .remote
            .as_ref()
            .ok_or_else(|| EngineError::InvalidState("no remote offer".to_string()))?;
        let offered = parse_sdp(&offer.sdp)?;

        // Eigene Tracks werden passenden Sektionen zugeordnet, der Rest ist recvonly
        let mut unused: Vec<&AttachedTrack> = state.tracks.iter().collect();
        let sections: Vec<_> = offered
            .iter()
            .map(|(kind, _)| {
                match unused.iter().position(|t| t.kind == *kind) {
                    Some(pos) => (*kind, "sendrecv", Some(unused.remove(pos))),
                    None => (*kind, "recvonly", None),
                }
            })
            .collect();
        Ok(SessionDescription::answer(render_sdp(self.port, &sections)))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        let handler = {
            let mut state = self.state.lock();
            let next = match (desc.sdp_type, state.signaling) {
                (_, SignalingState::Closed) => return Err(EngineError::Closed),
                (SdpType::Offer, SignalingState::Stable | SignalingState::HaveLocalOffer) => {
                    self.check(FailPoint::SetLocalOffer)?;
                    SignalingState::HaveLocalOffer
                }
                (SdpType::Answer, SignalingState::HaveRemoteOffer) => {
                    self.check(FailPoint::SetLocalAnswer)?;
                    SignalingState::Stable
                }
                (sdp_type, current) => {
                    return Err(EngineError::InvalidState(format!(
                        "cannot set local {} in {:?}",
                        sdp_type, current
                    )))
                }
            };
            parse_sdp(&desc.sdp)?;

            state.signaling = next;
            state.local = Some(desc);

            if state.gathered {
                None
            } else {
                state.gathered = true;
                state.candidate_handler.clone()
            }
        };

        // Handler ohne Lock aufrufen, er landet beim Peer
        if let Some(handler) = handler {
            handler(self.host_candidate()).await;
        }
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        let (handler, tracks) = {
            let mut state = self.state.lock();
            let next = match (desc.sdp_type, state.signaling) {
                (_, SignalingState::Closed) => return Err(EngineError::Closed),
                (SdpType::Offer, SignalingState::Stable | SignalingState::HaveRemoteOffer) => {
                    self.check(FailPoint::SetRemoteOffer)?;
                    SignalingState::HaveRemoteOffer
                }
                (SdpType::Answer, SignalingState::HaveLocalOffer) => {
                    self.check(FailPoint::SetRemoteAnswer)?;
                    SignalingState::Stable
                }
                (sdp_type, current) => {
                    return Err(EngineError::InvalidState(format!(
                        "cannot set remote {} in {:?}",
                        sdp_type, current
                    )))
                }
            };

            let tracks: Vec<RemoteTrack> = parse_sdp(&desc.sdp)?
                .into_iter()
                .filter_map(|(kind, msid)| {
                    msid.map(|(stream_id, id)| RemoteTrack {
                        id,
                        kind,
                        stream_id,
                    })
                })
                .collect();

            state.signaling = next;
            state.remote = Some(desc);
            (state.track_handler.clone(), tracks)
        };

        if let Some(handler) = handler {
            for track in tracks {
                handler(track).await;
            }
        }
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: Candidate) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        if state.signaling == SignalingState::Closed {
            return Err(EngineError::Closed);
        }
        state.remote_candidates.push(candidate);
        Ok(())
    }

    async fn close(&self) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        state.signaling = SignalingState::Closed;
        state.candidate_handler = None;
        state.track_handler = None;
        Ok(())
    }

    fn on_candidate_discovered(&self, handler: CandidateHandler) {
        self.state.lock().candidate_handler = Some(Arc::from(handler));
    }

    fn on_remote_track(&self, handler: RemoteTrackHandler) {
        self.state.lock().track_handler = Some(Arc::from(handler));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CaptureConstraints, CaptureDevice, GeneratedCapture};

    async fn endpoint_pair(
        engine: &MemoryEngine,
    ) -> (Arc<dyn ConnectionEndpoint>, Arc<dyn ConnectionEndpoint>) {
        let config = RtcConfig::default();
        let local = engine
            .create_endpoint(EndpointRole::Local, &config)
            .await
            .unwrap();
        let remote = engine
            .create_endpoint(EndpointRole::Remote, &config)
            .await
            .unwrap();
        (local, remote)
    }

    #[tokio::test]
    async fn test_offer_lists_attached_tracks() {
        let engine = MemoryEngine::new();
        let (local, _remote) = endpoint_pair(&engine).await;
        let session = GeneratedCapture::new()
            .request_capture(CaptureConstraints::audio_video())
            .await
            .unwrap();

        for track in session.tracks() {
            local.add_track(track, session.id()).await.unwrap();
        }

        let offer = local.create_offer().await.unwrap();
        assert_eq!(offer.sdp_type, SdpType::Offer);
        assert!(offer.sdp.contains("m=audio"));
        assert!(offer.sdp.contains("m=video"));
        assert_eq!(offer.sdp.matches("a=msid:").count(), 2);
    }

    #[tokio::test]
    async fn test_answer_requires_remote_offer() {
        let engine = MemoryEngine::new();
        let (_local, remote) = endpoint_pair(&engine).await;

        let err = remote.create_answer().await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_remote_tracks_fire_on_remote_offer() {
        let engine = MemoryEngine::new();
        let (local, remote) = endpoint_pair(&engine).await;

        let track = MediaTrack::new(MediaKind::Video, "camera");
        local.add_track(&track, "stream-1").await.unwrap();

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        remote.on_remote_track(Box::new(move |t| {
            let sink = Arc::clone(&sink);
            Box::pin(async move { sink.lock().push(t) })
        }));

        let offer = local.create_offer().await.unwrap();
        local.set_local_description(offer.clone()).await.unwrap();
        remote.set_remote_description(offer).await.unwrap();

        let received = received.lock();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].id, track.id());
        assert_eq!(received[0].kind, MediaKind::Video);
        assert_eq!(received[0].stream_id, "stream-1");
    }

    #[tokio::test]
    async fn test_host_candidate_emitted_once() {
        let engine = MemoryEngine::new();
        let (local, _remote) = endpoint_pair(&engine).await;

        let count = Arc::new(AtomicU16::new(0));
        let counter = Arc::clone(&count);
        local.on_candidate_discovered(Box::new(move |c| {
            assert!(c.candidate.contains("typ host"));
            counter.fetch_add(1, Ordering::Relaxed);
            Box::pin(async {})
        }));

        let offer = local.create_offer().await.unwrap();
        local.set_local_description(offer.clone()).await.unwrap();
        local.set_local_description(offer).await.unwrap();

        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_closed_endpoint_rejects_operations() {
        let engine = MemoryEngine::new();
        let (local, _remote) = endpoint_pair(&engine).await;

        local.close().await.unwrap();
        assert!(engine.endpoints()[0].is_closed());
        assert_eq!(local.create_offer().await.unwrap_err(), EngineError::Closed);
        assert_eq!(
            local
                .add_remote_candidate(Candidate {
                    candidate: "candidate:1".into(),
                    sdp_mid: None,
                    sdp_mline_index: None,
                })
                .await
                .unwrap_err(),
            EngineError::Closed
        );
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let engine = MemoryEngine::failing_at(FailPoint::CreateOffer);
        let (local, _remote) = endpoint_pair(&engine).await;

        let err = local.create_offer().await.unwrap_err();
        assert_eq!(err, EngineError::Injected("CreateOffer".to_string()));
    }

    #[test]
    fn test_parse_sdp_rejects_garbage() {
        assert!(parse_sdp("hello").is_err());
        assert!(parse_sdp("v=0\r\na=msid:s t\r\n").is_err());
        assert!(parse_sdp("v=0\r\nm=text 9 X 0\r\n").is_err());
    }
}
