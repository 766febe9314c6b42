use crate::media::MediaError;
use crate::signaling::SignalingError;
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    #[error("Already in a call")]
    AlreadyInCall,

    #[error("No incoming call")]
    NoIncomingCall,

    #[error("No active call")]
    NoActiveCall,

    #[error("Call has no video")]
    NoVideo,

    #[error("Invalid peer: {0}")]
    InvalidPeer(String),

    #[error("Signaling timeout: {0}")]
    SignalingTimeout(String),

    #[error("Signaling channel error: {0}")]
    SignalingChannel(String),

    #[error("Media access denied: {0}")]
    MediaAccessDenied(String),

    #[error("Negotiation failed: {0}")]
    NegotiationFailure(String),

    #[error("Peer is busy: {0}")]
    PeerBusy(String),

    #[error("Call ended by peer: {0}")]
    RemoteHangup(String),

    #[error("Call engine stopped")]
    EngineStopped,
}

impl From<SignalingError> for CallError {
    fn from(e: SignalingError) -> Self {
        match e {
            SignalingError::Timeout { .. } => CallError::SignalingTimeout(e.to_string()),
            other => CallError::SignalingChannel(other.to_string()),
        }
    }
}

impl From<MediaError> for CallError {
    fn from(e: MediaError) -> Self {
        match e {
            MediaError::AccessDenied(_) | MediaError::Device(_) => {
                CallError::MediaAccessDenied(e.to_string())
            }
            other => CallError::NegotiationFailure(other.to_string()),
        }
    }
}
