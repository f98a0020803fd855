//! Loopback Call - P2P Audio/Video Call in einem Prozess
//!
//! Zwei WebRTC-Endpoints ("local" und "remote") im selben Prozess:
//! - Capture liefert die ausgehenden Tracks
//! - Candidates und Offer/Answer werden direkt in-process ausgetauscht
//! - Der Remote-Stream landet in einem Video-Sink

pub mod capture;
pub mod config;
pub mod controller;
pub mod engine;
pub mod presentation;

use capture::GeneratedCapture;
use config::{AppConfig, EngineKind};
use controller::{CallController, CallError, CallEvent};
use engine::{ConnectionEngine, MemoryEngine, WebRtcEngine};
use once_cell::sync::OnceCell;
use presentation::MediaStream;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

static TRACING: OnceCell<()> = OnceCell::new();

// ============================================================================
// LOGGING
// ============================================================================

/// Initialisiert Logging; `RUST_LOG` hat Vorrang vor `default_filter`
pub fn init_tracing(default_filter: &str) {
    TRACING.get_or_init(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

        // Schlägt fehl, wenn bereits ein globaler Subscriber existiert
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    });
}

// ============================================================================
// RUNNER
// ============================================================================

/// Erzeugt die konfigurierte Engine
pub fn build_engine(kind: EngineKind) -> Arc<dyn ConnectionEngine> {
    match kind {
        EngineKind::WebRtc => Arc::new(WebRtcEngine::new()),
        EngineKind::Memory => Arc::new(MemoryEngine::new()),
    }
}

/// Führt einen kompletten Call durch: Capture → Call → Remote Media → Ende
///
/// Gibt den Remote-Stream zurück, der bis zum Timeout sichtbar war.
pub async fn run(config: &AppConfig) -> Result<Option<MediaStream>, CallError> {
    let mut controller = CallController::new(
        build_engine(config.engine),
        Arc::new(GeneratedCapture::new()),
        config.rtc_config(),
    );
    let mut events = controller.subscribe();

    controller.acquire_capture(config.capture).await?;
    tracing::info!("{}", controller.status());
    if let Some(capture) = controller.capture() {
        for track in capture.tracks() {
            tracing::debug!("Capturing {} track '{}'", track.kind(), track.label());
        }
    }

    if let Err(e) = controller.start_call().await {
        controller.end_call().await;
        return Err(e);
    }
    tracing::info!("{}", controller.status());

    let expected = controller
        .capture()
        .map(|c| c.tracks().len())
        .unwrap_or_default();
    let timeout = Duration::from_millis(config.remote_media_timeout_ms);
    let remote = wait_for_remote_media(&controller, &mut events, expected, timeout).await;

    controller.end_call().await;
    tracing::info!("{}", controller.status());
    Ok(remote)
}

/// Wartet, bis der Remote-Sink `expected` Tracks zeigt oder der Timeout abläuft
async fn wait_for_remote_media(
    controller: &CallController,
    events: &mut broadcast::Receiver<CallEvent>,
    expected: usize,
    timeout: Duration,
) -> Option<MediaStream> {
    let sink = controller.remote_sink().clone();
    let complete = |sink: &presentation::VideoSink| {
        sink.stream()
            .map(|s| s.tracks.len() >= expected)
            .unwrap_or(false)
    };

    let waited = tokio::time::timeout(timeout, async {
        while !complete(&sink) {
            match events.recv().await {
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
    .await;

    if waited.is_err() {
        tracing::warn!(
            "Timed out after {:?} waiting for {} track(s) in sink '{}'",
            timeout,
            expected,
            sink.name()
        );
    }
    sink.stream()
}
