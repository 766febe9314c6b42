//! Media Session Adapter
//!
//! Abstraktion über den Media-Stack. Die Zustandsmaschine spricht nur mit
//! diesem Trait und verwaltet ausschließlich opake Handles.

use crate::signaling::CallType;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("Media access denied: {0}")]
    AccessDenied(String),

    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    #[error("Invalid SDP: {0}")]
    InvalidSdp(String),

    #[error("Unknown media session {0}")]
    UnknownSession(SessionHandle),

    #[error("Unknown local media {0}")]
    UnknownMedia(MediaHandle),

    #[error("Device error: {0}")]
    Device(String),
}

// ============================================================================
// WIRE TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// SDP Offer oder Answer, wie es über den Bus geht
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE Candidate im Browser-Format (`RTCIceCandidateInit`)
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
    #[serde(default)]
    pub username_fragment: Option<String>,
}

// ============================================================================
// HANDLES
// ============================================================================

macro_rules! handle_type {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub fn new(id: u64) -> Self {
                Self(id)
            }

            pub fn id(&self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "#{}"), self.0)
            }
        }
    };
}

handle_type!(
    /// Eine Peer-Verbindung
    SessionHandle,
    "session"
);
handle_type!(
    /// Lokaler Mikrofon-/Kamera-Stream
    MediaHandle,
    "media"
);
handle_type!(
    /// Einzelner Kamera-Track (Kamerawechsel)
    TrackHandle,
    "track"
);

// ============================================================================
// MEDIA TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraFacing {
    #[default]
    User,
    Environment,
}

impl CameraFacing {
    pub fn flipped(self) -> Self {
        match self {
            CameraFacing::User => CameraFacing::Environment,
            CameraFacing::Environment => CameraFacing::User,
        }
    }
}

/// Welche Geräte für einen Anruf angefordert werden
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
    pub facing: CameraFacing,
}

impl MediaConstraints {
    pub fn for_call(call_type: CallType) -> Self {
        Self {
            audio: true,
            video: call_type == CallType::Video,
            facing: CameraFacing::default(),
        }
    }
}

/// Vom Peer empfangener Stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteStream {
    pub stream_id: String,
    pub tracks: Vec<TrackKind>,
}

/// Ereignisse einer Peer-Verbindung
#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
    /// Lokaler ICE Candidate, muss an den Peer gesendet werden
    LocalIceCandidate {
        session: SessionHandle,
        candidate: IceCandidate,
    },
    RemoteTrack {
        session: SessionHandle,
        stream_id: String,
        kind: TrackKind,
    },
    /// Rein informativ, ändert den Anrufstatus nicht
    ConnectionState {
        session: SessionHandle,
        state: String,
    },
}

impl MediaEvent {
    pub fn session(&self) -> SessionHandle {
        match self {
            MediaEvent::LocalIceCandidate { session, .. }
            | MediaEvent::RemoteTrack { session, .. }
            | MediaEvent::ConnectionState { session, .. } => *session,
        }
    }
}

// ============================================================================
// ADAPTER TRAIT
// ============================================================================

#[async_trait]
pub trait MediaSessionAdapter: Send + Sync + 'static {
    /// Fordert Mikrofon (und ggf. Kamera) an
    async fn acquire_local_media(
        &self,
        constraints: MediaConstraints,
    ) -> Result<MediaHandle, MediaError>;

    /// Fordert eine Kamera mit der angegebenen Ausrichtung an
    async fn acquire_camera(&self, facing: CameraFacing) -> Result<TrackHandle, MediaError>;

    /// Erstellt eine Peer-Verbindung. Ereignisse gehen an `events`.
    async fn create_session(
        &self,
        events: mpsc::UnboundedSender<MediaEvent>,
    ) -> Result<SessionHandle, MediaError>;

    async fn attach_local_media(
        &self,
        session: SessionHandle,
        media: MediaHandle,
    ) -> Result<(), MediaError>;

    /// Erstellt ein Offer und setzt es als lokale Beschreibung
    async fn create_offer(&self, session: SessionHandle) -> Result<SessionDescription, MediaError>;

    /// Erstellt ein Answer und setzt es als lokale Beschreibung
    async fn create_answer(&self, session: SessionHandle)
        -> Result<SessionDescription, MediaError>;

    async fn apply_remote_description(
        &self,
        session: SessionHandle,
        description: SessionDescription,
    ) -> Result<(), MediaError>;

    async fn apply_ice_candidate(
        &self,
        session: SessionHandle,
        candidate: IceCandidate,
    ) -> Result<(), MediaError>;

    /// Ersetzt den gesendeten Video-Track, ohne neu zu verhandeln. Bei
    /// Erfolg gehört der Track danach zum Stream `media`.
    async fn replace_video_track(
        &self,
        session: SessionHandle,
        media: MediaHandle,
        track: TrackHandle,
    ) -> Result<(), MediaError>;

    fn set_track_enabled(
        &self,
        media: MediaHandle,
        kind: TrackKind,
        enabled: bool,
    ) -> Result<(), MediaError>;

    /// Schließt die Verbindung (idempotent)
    async fn release(&self, session: SessionHandle);

    /// Gibt Mikrofon und Kamera frei (idempotent)
    async fn release_media(&self, media: MediaHandle);

    /// Gibt eine Kamera frei, die nicht eingesetzt wurde (idempotent)
    async fn release_camera(&self, track: TrackHandle);
}

// ============================================================================
// TESTS
// ============================================================================
