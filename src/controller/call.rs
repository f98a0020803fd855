//! Call Session Controller
//!
//! Drei Phasen statt zweier unabhängiger Flags, damit z.B. ein aktiver
//! Call ohne Capture nicht darstellbar ist. Operationen nehmen `&mut self`,
//! es kann also immer nur eine gleichzeitig laufen.

use super::session::CallSession;
use crate::capture::{CaptureConstraints, CaptureDevice, CaptureSession};
use crate::engine::{ConnectionEngine, EndpointRole, EngineError, RemoteTrack, RtcConfig};
use crate::presentation::{status, Controls, MediaStream, VideoSink};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    #[error("Capture denied or unavailable: {0}")]
    CaptureDeniedOrUnavailable(String),

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Negotiation failed: {0}")]
    Negotiation(String),
}

// ============================================================================
// CALL PHASE
// ============================================================================

/// Aktuelle Phase des Controllers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallPhase {
    /// Keine Capture, keine Verbindungen
    Idle,
    /// Capture vorhanden, noch keine Verbindungen
    Ready,
    /// Beide Endpoints verhandelt
    Active,
}

/// Events die vom Controller ausgelöst werden
#[derive(Debug, Clone)]
pub enum CallEvent {
    PhaseChanged(CallPhase),
    Status(String),
    RemoteTrack(RemoteTrack),
    CandidateForwarded { from: EndpointRole },
    Error(String),
}

// ============================================================================
// CALL CONTROLLER
// ============================================================================

pub struct CallController {
    engine: Arc<dyn ConnectionEngine>,
    capture_device: Arc<dyn CaptureDevice>,
    rtc_config: RtcConfig,
    phase: CallPhase,
    status: String,
    capture: Option<CaptureSession>,
    session: Option<CallSession>,
    local_sink: VideoSink,
    remote_sink: VideoSink,
    event_tx: broadcast::Sender<CallEvent>,
}

impl CallController {
    pub fn new(
        engine: Arc<dyn ConnectionEngine>,
        capture_device: Arc<dyn CaptureDevice>,
        rtc_config: RtcConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(100);

        Self {
            engine,
            capture_device,
            rtc_config,
            phase: CallPhase::Idle,
            status: status::INITIAL.to_string(),
            capture: None,
            session: None,
            local_sink: VideoSink::new("local"),
            remote_sink: VideoSink::new("remote"),
            event_tx,
        }
    }

    /// Gibt einen Event-Receiver zurück
    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.event_tx.subscribe()
    }

    pub fn phase(&self) -> CallPhase {
        self.phase
    }

    /// Status-Text des letzten Ergebnisses
    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn controls(&self) -> Controls {
        Controls::for_phase(self.phase)
    }

    pub fn local_sink(&self) -> &VideoSink {
        &self.local_sink
    }

    pub fn remote_sink(&self) -> &VideoSink {
        &self.remote_sink
    }

    pub fn capture(&self) -> Option<&CaptureSession> {
        self.capture.as_ref()
    }

    /// Fordert Audio/Video an (Idle → Ready)
    ///
    /// In Ready ersetzt eine neue Capture die alte; deren Tracks werden
    /// vorher gestoppt.
    pub async fn acquire_capture(
        &mut self,
        constraints: CaptureConstraints,
    ) -> Result<(), CallError> {
        if self.phase == CallPhase::Active {
            return self.fail(
                CallError::Precondition("call already active".to_string()),
                status::ALREADY_ACTIVE.to_string(),
            );
        }

        tracing::info!(
            "Requesting capture (video: {}, audio: {})",
            constraints.video,
            constraints.audio
        );

        let session = match self.capture_device.request_capture(constraints).await {
            Ok(session) if session.is_empty() => {
                let reason = "capture returned no tracks".to_string();
                return self.fail(
                    CallError::CaptureDeniedOrUnavailable(reason.clone()),
                    status::capture_failed(&reason),
                );
            }
            Ok(session) => session,
            Err(e) => {
                let reason = e.to_string();
                return self.fail(
                    CallError::CaptureDeniedOrUnavailable(reason.clone()),
                    status::capture_failed(&reason),
                );
            }
        };

        if let Some(previous) = self.capture.take() {
            tracing::info!("Replacing capture session {}", previous.id());
            previous.stop();
        }

        self.local_sink.assign(MediaStream::from_capture(&session));
        self.capture = Some(session);
        self.set_phase(CallPhase::Ready);
        self.set_status(status::READY.to_string());
        Ok(())
    }

    /// Baut beide Endpoints auf und verhandelt (Ready → Active)
    ///
    /// Schlägt ein Schritt fehl, werden bereits erzeugte Endpoints
    /// geschlossen und der Controller bleibt in Ready.
    pub async fn start_call(&mut self) -> Result<(), CallError> {
        match self.phase {
            CallPhase::Ready => {}
            CallPhase::Idle => {
                return self.fail(
                    CallError::Precondition("capture not acquired".to_string()),
                    status::NEEDS_CAMERA.to_string(),
                );
            }
            CallPhase::Active => {
                return self.fail(
                    CallError::Precondition("call already active".to_string()),
                    status::ALREADY_ACTIVE.to_string(),
                );
            }
        }

        let capture = match self.capture.as_ref() {
            Some(capture) if !capture.is_empty() => capture.clone(),
            _ => {
                return self.fail(
                    CallError::Precondition("capture has no tracks".to_string()),
                    status::NEEDS_CAMERA.to_string(),
                );
            }
        };

        tracing::info!("Starting loopback call with capture {}", capture.id());

        match self.negotiate(&capture).await {
            Ok(session) => {
                self.session = Some(session);
                self.set_phase(CallPhase::Active);
                self.set_status(status::ACTIVE.to_string());
                Ok(())
            }
            Err(e) => {
                let reason = e.to_string();
                self.fail(
                    CallError::Negotiation(reason.clone()),
                    status::call_failed(&reason),
                )
            }
        }
    }

    /// Baut alles ab (→ Idle). Idempotent.
    pub async fn end_call(&mut self) {
        if let Some(session) = self.session.take() {
            session.close().await;
        }

        self.remote_sink.clear();
        self.local_sink.clear();

        if let Some(capture) = self.capture.take() {
            capture.stop();
        }

        tracing::info!("Call ended");
        self.set_phase(CallPhase::Idle);
        self.set_status(status::ENDED.to_string());
    }

    // ========================================================================
    // PRIVATE METHODS
    // ========================================================================

    async fn negotiate(&self, capture: &CaptureSession) -> Result<CallSession, EngineError> {
        let local = self
            .engine
            .create_endpoint(EndpointRole::Local, &self.rtc_config)
            .await?;

        let remote = match self
            .engine
            .create_endpoint(EndpointRole::Remote, &self.rtc_config)
            .await
        {
            Ok(remote) => remote,
            Err(e) => {
                if let Err(close_err) = local.close().await {
                    tracing::warn!("Failed to close local endpoint: {}", close_err);
                }
                return Err(e);
            }
        };

        let session = CallSession::new(local, remote);
        if let Err(e) = session
            .establish(capture, &self.remote_sink, &self.event_tx)
            .await
        {
            tracing::warn!("Negotiation aborted: {}", e);
            session.close().await;
            self.remote_sink.clear();
            return Err(e);
        }

        Ok(session)
    }

    fn fail<T>(&mut self, err: CallError, status: String) -> Result<T, CallError> {
        tracing::error!("{}", err);
        let _ = self.event_tx.send(CallEvent::Error(err.to_string()));
        self.set_status(status);
        Err(err)
    }

    /// Aktualisiert die Phase und sendet Event
    fn set_phase(&mut self, phase: CallPhase) {
        if self.phase != phase {
            tracing::info!("Call phase: {:?} -> {:?}", self.phase, phase);
            self.phase = phase;
            let _ = self.event_tx.send(CallEvent::PhaseChanged(phase));
        }
    }

    fn set_status(&mut self, status: String) {
        self.status = status.clone();
        let _ = self.event_tx.send(CallEvent::Status(status));
    }
}

impl Drop for CallController {
    fn drop(&mut self) {
        if let Some(capture) = self.capture.take() {
            capture.stop();
        }

        // Endpoints asynchron schließen, falls noch eine Runtime läuft
        if let Some(session) = self.session.take() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    session.close().await;
                });
            }
        }
    }
}

impl std::fmt::Debug for CallController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallController")
            .field("phase", &self.phase)
            .field("status", &self.status)
            .field("capture", &self.capture.as_ref().map(|c| c.id()))
            .finish()
    }
}
