//! Call Module - Zustandsmaschine für Anrufe
//!
//! Dieses Modul verwaltet:
//! - Den Lebenszyklus eines Anrufs (IDLE, CALLING, INCOMING, ACTIVE)
//! - Den Abgleich eingehender Signaling-Nachrichten mit dem Zustand
//! - Den Missed-Call Timer
//! - Das Anrufprotokoll (nur auf Anrufer-Seite)

mod engine;
mod error;
mod log;
mod machine;
#[cfg(test)]
mod scenarios;
mod session;

pub use engine::{CallEngine, CallEvent, Collaborators};
pub use error::CallError;
pub use log::chat_entry_text;
pub use session::{CallDirection, CallSnapshot, CallState, RingCue};
