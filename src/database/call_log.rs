//! Anrufprotokoll und Chat-Einträge

use super::{Database, DatabaseError};
use crate::signaling::{CallStatus, CallType};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use serde::Serialize;

/// Abgeschlossener Anruf, wie er protokolliert wird
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    pub caller_id: String,
    pub receiver_id: String,
    pub status: CallStatus,
    pub call_type: CallType,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

/// Chat-Eintrag zu einem Anruf
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEntry {
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Ziel für Anrufprotokoll-Einträge
pub trait CallLogStore: Send + Sync {
    fn record_call(&self, record: &CallRecord) -> Result<i64, DatabaseError>;

    fn append_chat_entry(&self, entry: &ChatEntry) -> Result<i64, DatabaseError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCall {
    pub id: i64,
    pub caller_id: String,
    pub receiver_id: String,
    pub status: CallStatus,
    pub call_type: CallType,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl StoredCall {
    pub fn duration_secs(&self) -> Option<i64> {
        self.ended_at
            .map(|end| (end - self.started_at).num_seconds())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub id: i64,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl CallLogStore for Database {
    fn record_call(&self, record: &CallRecord) -> Result<i64, DatabaseError> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO calls (caller_id, receiver_id, status, type, started_at, ended_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                record.caller_id,
                record.receiver_id,
                record.status.as_str(),
                record.call_type.as_str(),
                record.started_at.to_rfc3339(),
                record.ended_at.to_rfc3339()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn append_chat_entry(&self, entry: &ChatEntry) -> Result<i64, DatabaseError> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO messages (sender_id, receiver_id, content, timestamp)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                entry.sender_id,
                entry.receiver_id,
                entry.content,
                entry.timestamp.to_rfc3339()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }
}

impl Database {
    /// Alle Anrufe, an denen `user_id` beteiligt war (neueste zuerst)
    pub fn calls_for_user(&self, user_id: &str) -> Result<Vec<StoredCall>, DatabaseError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT id, caller_id, receiver_id, status, type, started_at, ended_at
            FROM calls
            WHERE caller_id = ?1 OR receiver_id = ?1
            ORDER BY started_at DESC, id DESC
            "#,
        )?;

        let rows = stmt
            .query_map(params![user_id], RawCall::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(RawCall::into_stored).collect()
    }

    /// Chat-Verlauf zwischen zwei Benutzern (älteste zuerst)
    pub fn chat_history(&self, a: &str, b: &str) -> Result<Vec<StoredMessage>, DatabaseError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT id, sender_id, receiver_id, content, timestamp
            FROM messages
            WHERE (sender_id = ?1 AND receiver_id = ?2)
               OR (sender_id = ?2 AND receiver_id = ?1)
            ORDER BY timestamp ASC, id ASC
            "#,
        )?;

        let rows = stmt
            .query_map(params![a, b], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, sender_id, receiver_id, content, timestamp)| {
                Ok(StoredMessage {
                    id,
                    sender_id,
                    receiver_id,
                    content,
                    timestamp: parse_timestamp("messages", &timestamp)?,
                })
            })
            .collect()
    }
}

struct RawCall {
    id: i64,
    caller_id: String,
    receiver_id: String,
    status: String,
    call_type: String,
    started_at: String,
    ended_at: Option<String>,
}

impl RawCall {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get(0)?,
            caller_id: row.get(1)?,
            receiver_id: row.get(2)?,
            status: row.get(3)?,
            call_type: row.get(4)?,
            started_at: row.get(5)?,
            ended_at: row.get(6)?,
        })
    }

    fn into_stored(self) -> Result<StoredCall, DatabaseError> {
        let invalid = |reason: String| DatabaseError::InvalidRecord {
            table: "calls",
            reason,
        };

        Ok(StoredCall {
            id: self.id,
            caller_id: self.caller_id,
            receiver_id: self.receiver_id,
            status: self.status.parse().map_err(invalid)?,
            call_type: self.call_type.parse().map_err(invalid)?,
            started_at: parse_timestamp("calls", &self.started_at)?,
            ended_at: self
                .ended_at
                .as_deref()
                .map(|t| parse_timestamp("calls", t))
                .transpose()?,
        })
    }
}

fn parse_timestamp(table: &'static str, value: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| DatabaseError::InvalidRecord {
            table,
            reason: format!("{value}: {e}"),
        })
}

// ============================================================================
// TESTS
// ============================================================================
