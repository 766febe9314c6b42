//! Anruf-Sitzung und beobachtbarer Zustand

use crate::database::Profile;
use crate::media::{
    CameraFacing, IceCandidate, MediaHandle, RemoteStream, SessionDescription, SessionHandle,
};
use crate::signaling::{CallId, CallType, OutboundChannel};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

// ============================================================================
// CALL STATE
// ============================================================================

/// Aktueller Status des Clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CallState {
    /// Kein Anruf
    #[default]
    Idle,
    /// Ausgehender Anruf, wartet auf Antwort
    Calling,
    /// Eingehender Anruf klingelt
    Incoming,
    /// Anruf verbunden
    Active,
}

impl CallState {
    pub fn ring_cue(&self) -> RingCue {
        match self {
            CallState::Calling => RingCue::Ringback,
            CallState::Incoming => RingCue::Ringtone,
            CallState::Idle | CallState::Active => RingCue::Silent,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CallDirection {
    Caller,
    Callee,
}

/// Welcher Ton gerade gespielt werden soll
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RingCue {
    Silent,
    Ringback,
    Ringtone,
}

// ============================================================================
// SESSION
// ============================================================================

pub(crate) enum CallPhase {
    Calling,
    /// Das Offer wartet hier, bis der Benutzer annimmt
    Incoming { offer: SessionDescription },
    Active,
}

pub(crate) struct CallSession {
    pub call_id: CallId,
    /// Die ID, die auf dem Draht mitgeschickt wird. Fehlt sie im Offer,
    /// bleibt sie auch in den Antworten weg.
    pub wire_call_id: Option<CallId>,
    pub peer_id: String,
    pub direction: CallDirection,
    pub call_type: CallType,
    pub started_at: DateTime<Utc>,
    pub phase: CallPhase,
    pub audio_enabled: bool,
    pub video_enabled: bool,
    pub camera_facing: CameraFacing,
    pub local_media: Option<MediaHandle>,
    pub remote_stream: Option<RemoteStream>,
    pub media_session: Option<SessionHandle>,
    pub outbound: Option<OutboundChannel>,
    pub missed_timer: Option<MissedCallTimer>,
    /// Remote Candidates, die vor der Remote Description ankamen
    pub pending_candidates: Vec<IceCandidate>,
    pub remote_description_applied: bool,
    pub peer_profile: Option<Profile>,
}

impl CallSession {
    pub fn outgoing(call_id: CallId, peer_id: String, call_type: CallType) -> Self {
        Self::new(
            call_id,
            Some(call_id),
            peer_id,
            CallDirection::Caller,
            call_type,
            CallPhase::Calling,
        )
    }

    pub fn incoming(
        wire_call_id: Option<CallId>,
        peer_id: String,
        call_type: CallType,
        offer: SessionDescription,
    ) -> Self {
        Self::new(
            wire_call_id.unwrap_or_default(),
            wire_call_id,
            peer_id,
            CallDirection::Callee,
            call_type,
            CallPhase::Incoming { offer },
        )
    }

    fn new(
        call_id: CallId,
        wire_call_id: Option<CallId>,
        peer_id: String,
        direction: CallDirection,
        call_type: CallType,
        phase: CallPhase,
    ) -> Self {
        Self {
            call_id,
            wire_call_id,
            peer_id,
            direction,
            call_type,
            started_at: Utc::now(),
            phase,
            audio_enabled: true,
            video_enabled: call_type == CallType::Video,
            camera_facing: CameraFacing::default(),
            local_media: None,
            remote_stream: None,
            media_session: None,
            outbound: None,
            missed_timer: None,
            pending_candidates: Vec::new(),
            remote_description_applied: false,
            peer_profile: None,
        }
    }

    pub fn state(&self) -> CallState {
        match self.phase {
            CallPhase::Calling => CallState::Calling,
            CallPhase::Incoming { .. } => CallState::Incoming,
            CallPhase::Active => CallState::Active,
        }
    }

    /// Gehört eine Nachricht zu diesem Anruf? Fehlt die `call_id`, zählt
    /// nur der Absender.
    pub fn matches(&self, from: &str, call_id: Option<CallId>) -> bool {
        self.peer_id == from && call_id.map_or(true, |id| id == self.call_id)
    }

    pub fn disarm_timer(&mut self) {
        if let Some(timer) = self.missed_timer.take() {
            timer.disarm();
        }
    }
}

// ============================================================================
// MISSED CALL TIMER
// ============================================================================

/// Meldet nach Ablauf die `call_id` an die Zustandsmaschine.
/// Wird beim Drop abgebrochen.
pub(crate) struct MissedCallTimer {
    task: JoinHandle<()>,
}

impl MissedCallTimer {
    pub fn arm(timeout: Duration, expired: mpsc::UnboundedSender<CallId>, call_id: CallId) -> Self {
        let task = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = expired.send(call_id);
        });
        Self { task }
    }

    pub fn disarm(self) {
        self.task.abort();
    }
}

impl Drop for MissedCallTimer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ============================================================================
// SNAPSHOT
// ============================================================================

/// Serialisierbare Sicht auf den aktuellen Anruf (für die UI)
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSnapshot {
    pub state: CallState,
    pub ring_cue: RingCue,
    pub call_id: Option<CallId>,
    pub peer_id: Option<String>,
    pub direction: Option<CallDirection>,
    pub call_type: Option<CallType>,
    pub started_at: Option<DateTime<Utc>>,
    pub audio_enabled: bool,
    pub video_enabled: bool,
    pub camera_facing: CameraFacing,
    pub local_media: Option<MediaHandle>,
    pub remote_stream: Option<RemoteStream>,
    pub peer_profile: Option<Profile>,
}

impl CallSnapshot {
    pub fn idle() -> Self {
        Self {
            state: CallState::Idle,
            ring_cue: RingCue::Silent,
            call_id: None,
            peer_id: None,
            direction: None,
            call_type: None,
            started_at: None,
            audio_enabled: true,
            video_enabled: true,
            camera_facing: CameraFacing::default(),
            local_media: None,
            remote_stream: None,
            peer_profile: None,
        }
    }

    pub(crate) fn from_session(session: &CallSession) -> Self {
        let state = session.state();
        Self {
            state,
            ring_cue: state.ring_cue(),
            call_id: Some(session.call_id),
            peer_id: Some(session.peer_id.clone()),
            direction: Some(session.direction),
            call_type: Some(session.call_type),
            started_at: Some(session.started_at),
            audio_enabled: session.audio_enabled,
            video_enabled: session.video_enabled,
            camera_facing: session.camera_facing,
            local_media: session.local_media,
            remote_stream: session.remote_stream.clone(),
            peer_profile: session.peer_profile.clone(),
        }
    }
}

impl Default for CallSnapshot {
    fn default() -> Self {
        Self::idle()
    }
}

// ============================================================================
// TESTS
// ============================================================================
