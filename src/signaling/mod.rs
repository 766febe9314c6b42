//! Signaling Module - Topic-basierter Nachrichtenaustausch zwischen Peers
//!
//! Dieses Modul verwaltet die Kommunikation über den Broadcast-Bus:
//! - Eingangskanal pro Benutzer und Ausgangskanal pro Anruf
//! - Nachrichten serialisieren und senden
//! - Eingehende Nachrichten parsen und weiterleiten
//!

mod channels;
mod local_bus;
mod messages;
mod transport;

pub use channels::{ChannelGuard, ChannelManager, OutboundChannel};
pub use local_bus::{JoinFault, LocalBus, PublishedFrame, DEFAULT_HISTORY_LIMIT};
pub use messages::*;
pub use transport::{ChannelLink, ChannelStatus, SignalingError, SignalingTransport, TopicChannel};
