//! WebRTC Engine (webrtc-rs)
//!
//! Jeder Endpoint bekommt eine eigene Peer Connection mit Default-Codecs
//! und Interceptors. Angehängte Capture-Tracks werden von einer
//! Sample-Pumpe gespeist, solange der Capture-Track lebt.

use super::types::{SharedCandidateHandler, SharedTrackHandler};
use super::{
    Candidate, CandidateHandler, ConnectionEndpoint, ConnectionEngine, EndpointRole,
    EngineError, RemoteTrack, RemoteTrackHandler, RtcConfig, SdpType, SessionDescription,
};
use crate::capture::{MediaKind, MediaTrack};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Opus-Frame mit Stille (TOC-Byte + leere Payload)
const OPUS_SILENCE: [u8; 3] = [0xf8, 0xff, 0xfe];

/// Minimaler VP8-Keyframe-Header für ein Testbild
const VP8_TEST_FRAME: [u8; 10] = [0x50, 0x42, 0x00, 0x9d, 0x01, 0x2a, 0x10, 0x00, 0x10, 0x00];

const AUDIO_FRAME_INTERVAL: Duration = Duration::from_millis(20);
const VIDEO_FRAME_INTERVAL: Duration = Duration::from_millis(33);

fn webrtc_err(e: webrtc::Error) -> EngineError {
    EngineError::WebRTC(e.to_string())
}

// ============================================================================
// CONVERSIONS
// ============================================================================

impl From<RTCIceCandidateInit> for Candidate {
    fn from(init: RTCIceCandidateInit) -> Self {
        Self {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
        }
    }
}

impl From<Candidate> for RTCIceCandidateInit {
    fn from(candidate: Candidate) -> Self {
        Self {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: None,
        }
    }
}

fn to_rtc_description(desc: SessionDescription) -> Result<RTCSessionDescription, EngineError> {
    let result = match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
    };
    result.map_err(|e| EngineError::InvalidSdp(e.to_string()))
}

fn codec_capability(kind: MediaKind) -> RTCRtpCodecCapability {
    match kind {
        MediaKind::Audio => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_string(),
            clock_rate: 48000,
            channels: 2,
            ..Default::default()
        },
        MediaKind::Video => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_string(),
            clock_rate: 90000,
            ..Default::default()
        },
    }
}

// ============================================================================
// WEBRTC ENGINE
// ============================================================================

#[derive(Debug, Default)]
pub struct WebRtcEngine;

impl WebRtcEngine {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ConnectionEngine for WebRtcEngine {
    async fn create_endpoint(
        &self,
        role: EndpointRole,
        config: &RtcConfig,
    ) -> Result<Arc<dyn ConnectionEndpoint>, EngineError> {
        Ok(Arc::new(WebRtcEndpoint::open(role, config).await?))
    }
}

// ============================================================================
// WEBRTC ENDPOINT
// ============================================================================

/// Candidate-Puffer bis zur Remote Description
///
/// Flag und Puffer teilen sich ein Lock: ein Candidate wird entweder
/// gepuffert und später ausgeliefert oder sofort hinzugefügt.
#[derive(Debug, Default)]
struct CandidateBuffer {
    remote_set: bool,
    pending: Vec<RTCIceCandidateInit>,
}

impl CandidateBuffer {
    /// Gibt den Candidate zurück, wenn er sofort hinzugefügt werden darf
    fn admit(&mut self, candidate: RTCIceCandidateInit) -> Option<RTCIceCandidateInit> {
        if self.remote_set {
            return Some(candidate);
        }
        self.pending.push(candidate);
        None
    }

    /// Markiert die Remote Description als gesetzt und leert den Puffer
    fn release(&mut self) -> Vec<RTCIceCandidateInit> {
        self.remote_set = true;
        std::mem::take(&mut self.pending)
    }
}

pub struct WebRtcEndpoint {
    role: EndpointRole,
    pc: Arc<RTCPeerConnection>,
    candidates: Mutex<CandidateBuffer>,
    pumps: Mutex<Vec<JoinHandle<()>>>,
}

impl WebRtcEndpoint {
    /// Erzeugt eine Peer Connection mit Default-Codecs und Interceptors
    pub async fn open(role: EndpointRole, config: &RtcConfig) -> Result<Self, EngineError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(webrtc_err)?;

        // Interceptors für RTCP, NACK etc.
        let mut registry = Registry::new();
        registry =
            register_default_interceptors(registry, &mut media_engine).map_err(webrtc_err)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        // Ohne Server nur Host-Candidates
        let ice_servers = if config.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: config.ice_servers.clone(),
                ..Default::default()
            }]
        };
        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let pc = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(webrtc_err)?,
        );

        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            tracing::info!("Peer connection state ({}): {:?}", role, s);
            Box::pin(async {})
        }));

        tracing::debug!("Created WebRTC {} endpoint", role);
        Ok(Self {
            role,
            pc,
            candidates: Mutex::new(CandidateBuffer::default()),
            pumps: Mutex::new(Vec::new()),
        })
    }

    pub fn connection_state(&self) -> RTCPeerConnectionState {
        self.pc.connection_state()
    }

    pub fn is_closed(&self) -> bool {
        self.connection_state() == RTCPeerConnectionState::Closed
    }

    /// Anzahl gepufferter Candidates
    pub fn pending_candidate_count(&self) -> usize {
        self.candidates.lock().pending.len()
    }
}

/// Schreibt Platzhalter-Samples, bis der Capture-Track gestoppt wird
async fn pump_samples(local: Arc<TrackLocalStaticSample>, source: MediaTrack) {
    let (payload, interval): (&[u8], Duration) = match source.kind() {
        MediaKind::Audio => (&OPUS_SILENCE[..], AUDIO_FRAME_INTERVAL),
        MediaKind::Video => (&VP8_TEST_FRAME[..], VIDEO_FRAME_INTERVAL),
    };

    let mut ticker = tokio::time::interval(interval);
    while source.is_live() {
        ticker.tick().await;
        let sample = Sample {
            data: payload.to_vec().into(),
            duration: interval,
            ..Default::default()
        };
        if let Err(e) = local.write_sample(&sample).await {
            tracing::debug!("Sample pump for track {} stopped: {}", source.id(), e);
            break;
        }
    }
}

#[async_trait]
impl ConnectionEndpoint for WebRtcEndpoint {
    fn role(&self) -> EndpointRole {
        self.role
    }

    async fn add_track(&self, track: &MediaTrack, stream_id: &str) -> Result<(), EngineError> {
        let local = Arc::new(TrackLocalStaticSample::new(
            codec_capability(track.kind()),
            track.id().to_string(),
            stream_id.to_string(),
        ));

        let rtp_sender = self
            .pc
            .add_track(Arc::clone(&local) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(webrtc_err)?;

        // RTCP lesen, sonst laufen die Interceptors nicht
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while rtp_sender.read(&mut rtcp_buf).await.is_ok() {}
        });

        let pump = tokio::spawn(pump_samples(local, track.clone()));
        self.pumps.lock().push(pump);
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, EngineError> {
        let offer = self.pc.create_offer(None).await.map_err(webrtc_err)?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, EngineError> {
        let answer = self.pc.create_answer(None).await.map_err(webrtc_err)?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        self.pc
            .set_local_description(to_rtc_description(desc)?)
            .await
            .map_err(webrtc_err)
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        self.pc
            .set_remote_description(to_rtc_description(desc)?)
            .await
            .map_err(webrtc_err)?;

        let pending = self.candidates.lock().release();
        if !pending.is_empty() {
            tracing::debug!("Flushing {} buffered {} candidate(s)", pending.len(), self.role);
        }
        for candidate in pending {
            self.pc
                .add_ice_candidate(candidate)
                .await
                .map_err(webrtc_err)?;
        }
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: Candidate) -> Result<(), EngineError> {
        let ready = self.candidates.lock().admit(candidate.into());
        match ready {
            Some(candidate) => self
                .pc
                .add_ice_candidate(candidate)
                .await
                .map_err(webrtc_err),
            None => Ok(()),
        }
    }

    async fn close(&self) -> Result<(), EngineError> {
        for pump in self.pumps.lock().drain(..) {
            pump.abort();
        }
        self.candidates.lock().pending.clear();
        self.pc.close().await.map_err(webrtc_err)
    }

    fn on_candidate_discovered(&self, handler: CandidateHandler) {
        let handler: SharedCandidateHandler = Arc::from(handler);
        let role = self.role;
        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let handler = Arc::clone(&handler);
                Box::pin(async move {
                    // None signalisiert das Ende des Gatherings
                    let Some(candidate) = candidate else {
                        return;
                    };
                    match candidate.to_json() {
                        Ok(init) => handler(init.into()).await,
                        Err(e) => tracing::warn!("Dropping {} ICE candidate: {}", role, e),
                    }
                })
            }));
    }

    fn on_remote_track(&self, handler: RemoteTrackHandler) {
        let handler: SharedTrackHandler = Arc::from(handler);
        self.pc.on_track(Box::new(move |track, _, _| {
            let handler = Arc::clone(&handler);
            let kind = match track.kind() {
                RTPCodecType::Audio => Some(MediaKind::Audio),
                RTPCodecType::Video => Some(MediaKind::Video),
                _ => None,
            };

            Box::pin(async move {
                let Some(kind) = kind else {
                    tracing::warn!("Ignoring remote track with unknown kind");
                    return;
                };

                let remote = RemoteTrack {
                    id: track.id(),
                    kind,
                    stream_id: track.stream_id(),
                };

                // RTP abnehmen, damit der Receive-Buffer nicht vollläuft
                tokio::spawn(async move { while track.read_rtp().await.is_ok() {} });

                handler(remote).await;
            })
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host_candidate(port: u16) -> Candidate {
        Candidate {
            candidate: format!("candidate:1 1 udp 2130706431 127.0.0.1 {} typ host", port),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
        }
    }

    fn offline() -> RtcConfig {
        RtcConfig {
            ice_servers: Vec::new(),
        }
    }

    #[test]
    fn test_candidate_conversion_keeps_fields() {
        let candidate = host_candidate(50000);
        let init: RTCIceCandidateInit = candidate.clone().into();
        assert_eq!(init.candidate, candidate.candidate);
        assert_eq!(init.sdp_mid.as_deref(), Some("0"));
        assert_eq!(init.sdp_mline_index, Some(0));
        assert!(init.username_fragment.is_none());

        assert_eq!(Candidate::from(init), candidate);
    }

    #[test]
    fn test_invalid_sdp_rejected() {
        let err = to_rtc_description(SessionDescription::offer("not sdp")).unwrap_err();
        assert!(matches!(err, EngineError::InvalidSdp(_)));
    }

    #[test]
    fn test_buffer_holds_candidates_until_released() {
        let mut buffer = CandidateBuffer::default();
        assert!(buffer.admit(host_candidate(1).into()).is_none());
        assert!(buffer.admit(host_candidate(2).into()).is_none());

        let released = buffer.release();
        assert_eq!(released.len(), 2);
        assert!(buffer.admit(host_candidate(3).into()).is_some());
        assert!(buffer.pending.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_admit_and_release_loses_nothing() {
        let buffer = Arc::new(Mutex::new(CandidateBuffer::default()));

        let senders: Vec<_> = (0..64u16)
            .map(|i| {
                let buffer = Arc::clone(&buffer);
                tokio::spawn(async move {
                    tokio::task::yield_now().await;
                    buffer.lock().admit(host_candidate(i).into()).is_some() as usize
                })
            })
            .collect();

        let released = {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move { buffer.lock().release().len() })
        };

        let mut delivered = released.await.unwrap();
        for sender in senders {
            delivered += sender.await.unwrap();
        }
        assert_eq!(delivered, 64);
        assert!(buffer.lock().pending.is_empty());
    }

    #[tokio::test]
    async fn test_candidates_flushed_after_remote_description() {
        let local = WebRtcEndpoint::open(EndpointRole::Local, &offline())
            .await
            .unwrap();
        let remote = WebRtcEndpoint::open(EndpointRole::Remote, &offline())
            .await
            .unwrap();

        let track = MediaTrack::new(MediaKind::Audio, "Generated Microphone");
        local.add_track(&track, "stream-1").await.unwrap();

        // Trifft vor dem Offer ein
        remote.add_remote_candidate(host_candidate(50000)).await.unwrap();
        assert_eq!(remote.pending_candidate_count(), 1);

        let offer = local.create_offer().await.unwrap();
        local.set_local_description(offer.clone()).await.unwrap();
        remote.set_remote_description(offer).await.unwrap();
        assert_eq!(remote.pending_candidate_count(), 0);

        remote.add_remote_candidate(host_candidate(50001)).await.unwrap();
        assert_eq!(remote.pending_candidate_count(), 0);

        track.stop();
        local.close().await.unwrap();
        remote.close().await.unwrap();
        assert!(local.is_closed());
        assert!(remote.is_closed());
    }
}
