//! Call Log Emitter
//!
//! Beim Übergang nach IDLE schreibt nur der Anrufer einen Eintrag ins
//! Anrufprotokoll plus einen Chat-Eintrag. Der Angerufene protokolliert nie.

use super::session::{CallDirection, CallSession};
use crate::database::{CallLogStore, CallRecord, ChatEntry};
use crate::signaling::{CallStatus, CallType};
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub(crate) struct CallLogEmitter {
    self_id: String,
    store: Arc<dyn CallLogStore>,
}

impl CallLogEmitter {
    pub fn new(self_id: impl Into<String>, store: Arc<dyn CallLogStore>) -> Self {
        Self {
            self_id: self_id.into(),
            store,
        }
    }

    /// `None`, wenn diese Seite nicht protokolliert
    pub fn record_for(
        &self,
        session: &CallSession,
        status: CallStatus,
        ended_at: DateTime<Utc>,
    ) -> Option<CallRecord> {
        if session.direction != CallDirection::Caller {
            return None;
        }
        Some(CallRecord {
            caller_id: self.self_id.clone(),
            receiver_id: session.peer_id.clone(),
            status,
            call_type: session.call_type,
            started_at: session.started_at,
            ended_at,
        })
    }

    /// Schreibt Eintrag und Chat-Nachricht. Fehler der Stores werden nur
    /// protokolliert.
    pub fn emit(&self, session: &CallSession, status: CallStatus) {
        let ended_at = Utc::now();
        let Some(record) = self.record_for(session, status, ended_at) else {
            return;
        };

        match self.store.record_call(&record) {
            Ok(id) => tracing::info!(
                "Logged call #{} {} -> {} as {}",
                id,
                record.caller_id,
                record.receiver_id,
                status
            ),
            Err(e) => tracing::warn!("Failed to log call with {}: {}", record.receiver_id, e),
        }

        if let Some(text) = chat_entry_text(status, record.call_type) {
            let entry = ChatEntry {
                sender_id: record.caller_id.clone(),
                receiver_id: record.receiver_id.clone(),
                content: text.to_string(),
                timestamp: ended_at,
            };
            if let Err(e) = self.store.append_chat_entry(&entry) {
                tracing::warn!("Failed to append call chat entry: {}", e);
            }
        }
    }
}

/// Text des Chat-Eintrags, BUSY erzeugt keinen
pub fn chat_entry_text(status: CallStatus, call_type: CallType) -> Option<&'static str> {
    let text = match (call_type, status) {
        (_, CallStatus::Busy) => return None,
        (CallType::Video, CallStatus::Missed) => "🎥 Missed Video Call",
        (CallType::Video, CallStatus::Rejected) => "🎥 Call Declined",
        (CallType::Video, CallStatus::Completed) => "🎥 Video Call",
        (CallType::Audio, CallStatus::Missed) => "📞 Missed Audio Call",
        (CallType::Audio, CallStatus::Rejected) => "📞 Call Declined",
        (CallType::Audio, CallStatus::Completed) => "📞 Audio Call",
    };
    Some(text)
}

// ============================================================================
// TESTS
// ============================================================================
