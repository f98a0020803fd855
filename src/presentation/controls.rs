//! Aktions-Freigaben und Status-Texte

use crate::controller::CallPhase;

/// Welche Aktionen in der aktuellen Phase auslösbar sind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Controls {
    pub start_capture: bool,
    pub start_call: bool,
    pub end_call: bool,
}

impl Controls {
    pub fn for_phase(phase: CallPhase) -> Self {
        Self {
            start_capture: phase == CallPhase::Idle,
            start_call: phase == CallPhase::Ready,
            end_call: phase != CallPhase::Idle,
        }
    }
}

/// Status-Texte für die Anzeige
pub mod status {
    pub const INITIAL: &str = "Click “Start camera” to begin.";
    pub const READY: &str = "Camera is ready. Start the call to connect local ↔ remote.";
    pub const ACTIVE: &str = "Call active! This demo connects two peers in one process.";
    pub const ENDED: &str = "Call ended. Click “Start camera” to begin again.";
    pub const NEEDS_CAMERA: &str = "Please start the camera first.";
    pub const ALREADY_ACTIVE: &str = "A call is already active. End it first.";

    pub fn capture_failed(reason: &str) -> String {
        format!("Unable to access camera/mic: {}", reason)
    }

    pub fn call_failed(reason: &str) -> String {
        format!("Failed to start call: {}", reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controls_per_phase() {
        let idle = Controls::for_phase(CallPhase::Idle);
        assert!(idle.start_capture && !idle.start_call && !idle.end_call);

        let ready = Controls::for_phase(CallPhase::Ready);
        assert!(!ready.start_capture && ready.start_call && ready.end_call);

        let active = Controls::for_phase(CallPhase::Active);
        assert!(!active.start_capture && !active.start_call && active.end_call);
    }
}
