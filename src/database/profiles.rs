//! Benutzerprofile
//!
//! Anzeigename und Avatar für eingehende Anrufe.

use super::{Database, DatabaseError};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub user_id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub is_online: bool,
}

impl Profile {
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
            avatar_url: None,
            is_online: false,
        }
    }

    pub fn with_avatar(mut self, url: impl Into<String>) -> Self {
        self.avatar_url = Some(url.into());
        self
    }
}

/// Profil-Nachschlagen für eingehende Anrufe
pub trait ProfileDirectory: Send + Sync {
    fn lookup_profile(&self, user_id: &str) -> Result<Profile, DatabaseError>;
}

impl Database {
    /// Legt ein Profil an oder aktualisiert es
    pub fn upsert_profile(&self, profile: &Profile) -> Result<(), DatabaseError> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO users (id, display_name, avatar_url, is_online)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                display_name = excluded.display_name,
                avatar_url = COALESCE(excluded.avatar_url, avatar_url),
                is_online = excluded.is_online,
                updated_at = datetime('now')
            "#,
            params![
                profile.user_id,
                profile.display_name,
                profile.avatar_url,
                profile.is_online as i32
            ],
        )?;
        Ok(())
    }

    pub fn get_profile(&self, user_id: &str) -> Result<Profile, DatabaseError> {
        let conn = self.conn.lock();
        Self::get_profile_inner(&conn, user_id)
    }

    fn get_profile_inner(conn: &Connection, user_id: &str) -> Result<Profile, DatabaseError> {
        conn.query_row(
            r#"
            SELECT id, display_name, avatar_url, is_online
            FROM users
            WHERE id = ?1
            "#,
            params![user_id],
            |row| {
                Ok(Profile {
                    user_id: row.get(0)?,
                    display_name: row.get(1)?,
                    avatar_url: row.get(2)?,
                    is_online: row.get::<_, i32>(3)? != 0,
                })
            },
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                DatabaseError::ProfileNotFound(user_id.to_string())
            }
            other => DatabaseError::Sqlite(other),
        })
    }

    /// Aktualisiert den Online-Status eines Benutzers
    pub fn set_online_status(&self, user_id: &str, is_online: bool) -> Result<(), DatabaseError> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            UPDATE users
            SET is_online = ?2, updated_at = datetime('now')
            WHERE id = ?1
            "#,
            params![user_id, is_online as i32],
        )?;
        Ok(())
    }

    /// Setzt alle Benutzer auf offline
    pub fn set_all_offline(&self) -> Result<(), DatabaseError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE users SET is_online = 0, updated_at = datetime('now')",
            [],
        )?;
        Ok(())
    }
}

impl ProfileDirectory for Database {
    fn lookup_profile(&self, user_id: &str) -> Result<Profile, DatabaseError> {
        self.get_profile(user_id)
    }
}

// ============================================================================
// TESTS
// ============================================================================
