//! Controller Module - Call Session Controller
//!
//! Verwaltet den Lebenszyklus eines Loopback-Calls:
//! - Capture anfordern (Idle → Ready)
//! - Zwei Endpoints verdrahten und verhandeln (Ready → Active)
//! - Alles wieder abbauen (→ Idle)

mod call;
mod session;

pub use call::{CallController, CallError, CallEvent, CallPhase};
