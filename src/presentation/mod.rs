//! Presentation Module - Anzeige-Oberfläche
//!
//! Zwei Video-Sinks ("local" und "remote"), drei Aktionen mit
//! phasenabhängiger Freigabe und ein Status-Text.

mod controls;
mod sink;

pub use controls::{status, Controls};
pub use sink::{MediaStream, TrackInfo, VideoSink};
