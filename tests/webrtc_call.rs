//! Loopback calls over real webrtc-rs peer connections

use async_trait::async_trait;
use loopback_call::capture::{CaptureConstraints, GeneratedCapture, MediaKind};
use loopback_call::config::{AppConfig, EngineKind};
use loopback_call::controller::{CallController, CallPhase};
use loopback_call::engine::{
    ConnectionEndpoint, ConnectionEngine, EndpointRole, EngineError, RtcConfig, WebRtcEndpoint,
};
use loopback_call::presentation::VideoSink;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Öffnet echte Endpoints und behält sie für Assertions
#[derive(Default)]
struct RecordingEngine {
    endpoints: Mutex<Vec<Arc<WebRtcEndpoint>>>,
}

#[async_trait]
impl ConnectionEngine for RecordingEngine {
    async fn create_endpoint(
        &self,
        role: EndpointRole,
        config: &RtcConfig,
    ) -> Result<Arc<dyn ConnectionEndpoint>, EngineError> {
        let endpoint = Arc::new(WebRtcEndpoint::open(role, config).await?);
        self.endpoints.lock().push(Arc::clone(&endpoint));
        Ok(endpoint)
    }
}

fn offline() -> RtcConfig {
    RtcConfig {
        ice_servers: Vec::new(),
    }
}

async fn wait_for_tracks(sink: &VideoSink, expected: usize) {
    let filled = async {
        while sink.stream().map(|s| s.tracks.len()).unwrap_or(0) < expected {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(10), filled)
        .await
        .expect("remote tracks did not arrive");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn remote_peer_receives_capture_stream() {
    let engine = Arc::new(RecordingEngine::default());
    let mut controller = CallController::new(
        Arc::clone(&engine) as _,
        Arc::new(GeneratedCapture::new()),
        offline(),
    );

    controller
        .acquire_capture(CaptureConstraints::audio_video())
        .await
        .unwrap();
    let capture = controller.capture().unwrap().clone();

    controller.start_call().await.unwrap();
    assert_eq!(controller.phase(), CallPhase::Active);

    wait_for_tracks(controller.remote_sink(), capture.tracks().len()).await;
    let remote = controller.remote_sink().stream().unwrap();
    assert_eq!(remote.id, capture.id());
    assert_eq!(remote.tracks.len(), capture.tracks().len());
    assert_eq!(remote.count_of(MediaKind::Audio), 1);
    assert_eq!(remote.count_of(MediaKind::Video), 1);

    controller.end_call().await;
    assert_eq!(controller.phase(), CallPhase::Idle);
    assert!(controller.remote_sink().is_empty());

    let endpoints = engine.endpoints.lock().clone();
    assert_eq!(endpoints.len(), 2);
    assert!(endpoints.iter().all(|e| e.is_closed()));
    assert_eq!(capture.live_track_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn runner_completes_with_webrtc_engine() {
    let config = AppConfig {
        engine: EngineKind::WebRtc,
        ice_servers: Vec::new(),
        remote_media_timeout_ms: 10_000,
        ..AppConfig::default()
    };

    let remote = loopback_call::run(&config)
        .await
        .unwrap()
        .expect("remote stream");
    assert_eq!(remote.tracks.len(), 2);
    assert_eq!(remote.count_of(MediaKind::Audio), 1);
    assert_eq!(remote.count_of(MediaKind::Video), 1);
}
