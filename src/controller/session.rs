//! Endpoint-Paar eines aktiven Calls und dessen Verdrahtung

use super::call::CallEvent;
use crate::capture::CaptureSession;
use crate::engine::{ConnectionEndpoint, EngineError};
use crate::presentation::VideoSink;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Local + Remote Endpoint. Nur der Controller hält starke Referenzen.
pub(super) struct CallSession {
    pub(super) local: Arc<dyn ConnectionEndpoint>,
    pub(super) remote: Arc<dyn ConnectionEndpoint>,
    /// `false` nach `close`; Remote Tracks werden dann verworfen
    accepting: Arc<Mutex<bool>>,
}

impl CallSession {
    pub(super) fn new(
        local: Arc<dyn ConnectionEndpoint>,
        remote: Arc<dyn ConnectionEndpoint>,
    ) -> Self {
        Self {
            local,
            remote,
            accepting: Arc::new(Mutex::new(true)),
        }
    }

    /// Verdrahtet beide Endpoints und führt den Offer/Answer-Handshake aus
    pub(super) async fn establish(
        &self,
        capture: &CaptureSession,
        remote_sink: &VideoSink,
        event_tx: &broadcast::Sender<CallEvent>,
    ) -> Result<(), EngineError> {
        forward_candidates(&self.local, &self.remote, event_tx.clone());
        forward_candidates(&self.remote, &self.local, event_tx.clone());
        expose_remote_tracks(
            &self.remote,
            remote_sink.clone(),
            Arc::clone(&self.accepting),
            event_tx.clone(),
        );

        for track in capture.tracks() {
            self.local.add_track(track, capture.id()).await?;
        }
        tracing::debug!(
            "Attached {} track(s) of capture {} to local endpoint",
            capture.tracks().len(),
            capture.id()
        );

        // Jeder Schritt braucht das Ergebnis des vorherigen
        let offer = self.local.create_offer().await?;
        self.local.set_local_description(offer.clone()).await?;
        self.remote.set_remote_description(offer).await?;
        tracing::debug!("Offer exchanged");

        let answer = self.remote.create_answer().await?;
        self.remote.set_local_description(answer.clone()).await?;
        self.local.set_remote_description(answer).await?;
        tracing::debug!("Answer exchanged");

        Ok(())
    }

    /// Schließt beide Endpoints; Fehler werden nur geloggt
    pub(super) async fn close(&self) {
        // Ab hier landet nichts mehr im Remote-Sink
        *self.accepting.lock() = false;

        for endpoint in [&self.local, &self.remote] {
            if let Err(e) = endpoint.close().await {
                tracing::warn!("Failed to close {} endpoint: {}", endpoint.role(), e);
            }
        }
    }
}

/// Leitet Candidates von `from` an `to` weiter
///
/// Der Handler hält nur eine schwache Referenz auf das Ziel, damit
/// zwischen den Endpoints kein Referenzzyklus entsteht.
fn forward_candidates(
    from: &Arc<dyn ConnectionEndpoint>,
    to: &Arc<dyn ConnectionEndpoint>,
    event_tx: broadcast::Sender<CallEvent>,
) {
    let source = from.role();
    let target = Arc::downgrade(to);

    from.on_candidate_discovered(Box::new(move |candidate| {
        let target = target.clone();
        let event_tx = event_tx.clone();
        Box::pin(async move {
            let Some(target) = target.upgrade() else {
                tracing::debug!("Dropping {} candidate, peer is gone", source);
                return;
            };

            match target.add_remote_candidate(candidate).await {
                Ok(()) => {
                    tracing::debug!("Forwarded ICE candidate {} -> {}", source, source.peer());
                    let _ = event_tx.send(CallEvent::CandidateForwarded { from: source });
                }
                Err(e) => {
                    tracing::warn!("Failed to add ICE candidate from {}: {}", source, e);
                }
            }
        })
    }));
}

/// Zeigt Remote Tracks im Sink an, solange die Session offen ist
///
/// Prüfen und Anhängen passieren unter demselben Lock wie das Schließen,
/// ein spät laufender Handler kann den geleerten Sink also nicht füllen.
fn expose_remote_tracks(
    remote: &Arc<dyn ConnectionEndpoint>,
    sink: VideoSink,
    accepting: Arc<Mutex<bool>>,
    event_tx: broadcast::Sender<CallEvent>,
) {
    remote.on_remote_track(Box::new(move |track| {
        let sink = sink.clone();
        let accepting = Arc::clone(&accepting);
        let event_tx = event_tx.clone();
        Box::pin(async move {
            {
                let open = accepting.lock();
                if !*open {
                    tracing::debug!("Ignoring remote track {}, session closed", track.id);
                    return;
                }
                sink.attach_remote_track(&track);
            }

            tracing::info!(
                "Received remote {} track {} (stream {})",
                track.kind,
                track.id,
                track.stream_id
            );
            let _ = event_tx.send(CallEvent::RemoteTrack(track));
        })
    }));
}
