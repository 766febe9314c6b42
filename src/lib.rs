//! Peer Call - Signaling und Zustandsmaschine für P2P Anrufe
//!
//! Eine Bibliothek für Audio-/Video-Anrufe zwischen zwei Benutzern mit:
//! - Topic-basiertem Signaling (ein Eingangskanal pro Benutzer)
//! - WebRTC für die Medienverbindung
//! - Zustandsmaschine IDLE / CALLING / INCOMING / ACTIVE
//! - SQLite für Anrufprotokoll, Chat-Einträge und Profile

pub mod call;
pub mod config;
pub mod database;
pub mod media;
pub mod signaling;

pub use call::{CallEngine, CallError, CallEvent, CallSnapshot, CallState, Collaborators};
pub use config::CallConfig;
pub use database::Database;
pub use signaling::{CallId, CallStatus, CallType, LocalBus};

use tracing_subscriber::EnvFilter;

// ============================================================================
// LOGGING
// ============================================================================

/// Initialisiert das Logging. `RUST_LOG` hat Vorrang vor den Defaults.
/// Ein zweiter Aufruf ist harmlos.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("peer_call=debug,call_demo=debug,webrtc=warn"));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
