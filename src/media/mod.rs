//! Media Module - Peer Connections und lokale Geräte
//!
//! Dieses Modul verwaltet:
//! - Den Vertrag zwischen Zustandsmaschine und Media-Stack
//! - WebRTC Peer Connections
//! - Audio-Geräte (Mikrofon-Prüfung)

mod adapter;
mod devices;
mod rtc;

pub use adapter::*;
pub use devices::{default_microphone, list_audio_devices, AudioDevice, Microphone};
pub use rtc::{WebRtcConfig, WebRtcMediaAdapter};
