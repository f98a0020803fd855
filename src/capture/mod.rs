//! Capture Module - Lokale Audio/Video-Quellen
//!
//! Dieses Modul verwaltet:
//! - Capture Constraints (welche Medienarten angefordert werden)
//! - Media Tracks mit geteiltem Liveness-Flag
//! - Capture Sessions (geordnete Track-Menge)
//! - Generierte Capture-Quelle für Headless-Betrieb

mod device;
mod track;

pub use device::{CaptureConstraints, CaptureDevice, CaptureError, GeneratedCapture};
pub use track::{CaptureSession, MediaKind, MediaTrack};
