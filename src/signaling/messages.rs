//! Message Types für das Call-Signaling
//!
//! Wire-Format auf dem Broadcast-Bus:
//!
//! ```json
//! { "event": "offer", "payload": { "from": "...", "to": "...", "offer": { "type": "offer", "sdp": "..." } } }
//! ```
//!
//! `callId` und `callType` sind optional, damit auch Clients ohne diese
//! Felder interoperabel bleiben.

use crate::media::{IceCandidate, SessionDescription};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// IDENTIFIERS & ENUMS
// ============================================================================

/// Eindeutige ID eines Anrufs (vom Anrufer vergeben)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(Uuid);

impl CallId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Abschluss-Status eines Anrufs (END_CALL und Anrufprotokoll)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallStatus {
    Missed,
    Completed,
    Rejected,
    Busy,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Missed => "MISSED",
            CallStatus::Completed => "COMPLETED",
            CallStatus::Rejected => "REJECTED",
            CallStatus::Busy => "BUSY",
        }
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CallStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "MISSED" => Ok(CallStatus::Missed),
            "COMPLETED" => Ok(CallStatus::Completed),
            "REJECTED" => Ok(CallStatus::Rejected),
            "BUSY" => Ok(CallStatus::Busy),
            other => Err(format!("unknown call status: {other}")),
        }
    }
}

/// Art des Anrufs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CallType {
    #[default]
    Video,
    Audio,
}

impl CallType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallType::Video => "VIDEO",
            CallType::Audio => "AUDIO",
        }
    }
}

impl fmt::Display for CallType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CallType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "VIDEO" => Ok(CallType::Video),
            "AUDIO" => Ok(CallType::Audio),
            other => Err(format!("unknown call type: {other}")),
        }
    }
}

/// Topic-Name des Eingangskanals eines Benutzers, z.B. `calls:alice`
pub fn user_topic(prefix: &str, user_id: &str) -> String {
    format!("{prefix}:{user_id}")
}

// ============================================================================
// PAYLOADS
// ============================================================================

/// SDP Offer des Anrufers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferPayload {
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<CallId>,
    pub offer: SessionDescription,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_type: Option<CallType>,
}

/// SDP Answer des Angerufenen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerPayload {
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<CallId>,
    pub answer: SessionDescription,
}

/// Einzelner ICE Candidate (Trickle ICE)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidatePayload {
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<CallId>,
    pub candidate: IceCandidate,
}

/// Anruf beenden / ablehnen / besetzt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndCallPayload {
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<CallId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<CallStatus>,
}

// ============================================================================
// SIGNALING MESSAGE
// ============================================================================

/// Alle Signaling-Nachrichten zwischen zwei Peers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum SignalingMessage {
    Offer(OfferPayload),
    Answer(AnswerPayload),
    IceCandidate(IceCandidatePayload),
    EndCall(EndCallPayload),
}

impl SignalingMessage {
    pub fn offer(
        from: impl Into<String>,
        to: impl Into<String>,
        call_id: CallId,
        offer: SessionDescription,
        call_type: CallType,
    ) -> Self {
        SignalingMessage::Offer(OfferPayload {
            from: from.into(),
            to: to.into(),
            call_id: Some(call_id),
            offer,
            call_type: Some(call_type),
        })
    }

    pub fn answer(
        from: impl Into<String>,
        to: impl Into<String>,
        call_id: Option<CallId>,
        answer: SessionDescription,
    ) -> Self {
        SignalingMessage::Answer(AnswerPayload {
            from: from.into(),
            to: to.into(),
            call_id,
            answer,
        })
    }

    pub fn ice_candidate(
        from: impl Into<String>,
        to: impl Into<String>,
        call_id: Option<CallId>,
        candidate: IceCandidate,
    ) -> Self {
        SignalingMessage::IceCandidate(IceCandidatePayload {
            from: from.into(),
            to: to.into(),
            call_id,
            candidate,
        })
    }

    /// `call_id` fehlt, wenn schon das Offer keine hatte
    pub fn end_call(
        from: impl Into<String>,
        to: impl Into<String>,
        call_id: Option<CallId>,
        status: CallStatus,
    ) -> Self {
        SignalingMessage::EndCall(EndCallPayload {
            from: from.into(),
            to: to.into(),
            call_id,
            status: Some(status),
        })
    }

    /// Event-Name auf dem Bus
    pub fn event(&self) -> &'static str {
        match self {
            SignalingMessage::Offer(_) => "offer",
            SignalingMessage::Answer(_) => "answer",
            SignalingMessage::IceCandidate(_) => "ice-candidate",
            SignalingMessage::EndCall(_) => "end-call",
        }
    }

    pub fn from(&self) -> &str {
        match self {
            SignalingMessage::Offer(p) => &p.from,
            SignalingMessage::Answer(p) => &p.from,
            SignalingMessage::IceCandidate(p) => &p.from,
            SignalingMessage::EndCall(p) => &p.from,
        }
    }

    pub fn to(&self) -> &str {
        match self {
            SignalingMessage::Offer(p) => &p.to,
            SignalingMessage::Answer(p) => &p.to,
            SignalingMessage::IceCandidate(p) => &p.to,
            SignalingMessage::EndCall(p) => &p.to,
        }
    }

    pub fn call_id(&self) -> Option<CallId> {
        match self {
            SignalingMessage::Offer(p) => p.call_id,
            SignalingMessage::Answer(p) => p.call_id,
            SignalingMessage::IceCandidate(p) => p.call_id,
            SignalingMessage::EndCall(p) => p.call_id,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(frame: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame)
    }
}

// ============================================================================
// TESTS
// ============================================================================
