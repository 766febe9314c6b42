//! Database Module - SQLite Persistenz
//!
//! Tabellen:
//! - `users`: Profile (Anzeigename, Avatar, Online-Status)
//! - `calls`: Anrufprotokoll (nur vom Anrufer geschrieben)
//! - `messages`: Chat-Verlauf inkl. Anruf-Einträgen

mod call_log;
mod profiles;

pub use call_log::{CallLogStore, CallRecord, ChatEntry, StoredCall, StoredMessage};
pub use profiles::{Profile, ProfileDirectory};

use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to create database directory: {0}")]
    DirectoryCreation(#[from] std::io::Error),

    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    #[error("Invalid record in {table}: {reason}")]
    InvalidRecord { table: &'static str, reason: String },
}

// ============================================================================
// DATABASE
// ============================================================================

/// SQLite-Datenbank (Thread-safe durch Mutex)
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Öffnet oder erstellt die Datenbank im App-Datenverzeichnis
    pub fn open() -> Result<Self, DatabaseError> {
        let db_path = Self::database_path()?;
        Self::open_at(db_path)
    }

    pub fn open_at(path: impl AsRef<Path>) -> Result<Self, DatabaseError> {
        let path = path.as_ref();

        // Parent-Verzeichnis erstellen
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        tracing::info!("Opening database at {:?}", path);
        Self::with_connection(Connection::open(path)?)
    }

    /// In-Memory Datenbank (Tests, Demo)
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, DatabaseError> {
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Pfad der Datenbank-Datei, die [`Database::open`] verwendet
    pub fn database_path() -> Result<PathBuf, DatabaseError> {
        let proj_dirs = directories::ProjectDirs::from("com", "peer-call", "peer-call")
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "Could not determine app data directory",
                )
            })?;

        let mut path = proj_dirs.data_dir().to_path_buf();
        path.push("calls.db");
        Ok(path)
    }

    /// Initialisiert das Datenbank-Schema
    fn init_schema(&self) -> Result<(), DatabaseError> {
        let conn = self.conn.lock();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                display_name TEXT NOT NULL,
                avatar_url TEXT,
                is_online INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS calls (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                caller_id TEXT NOT NULL,
                receiver_id TEXT NOT NULL,
                status TEXT NOT NULL,
                type TEXT NOT NULL,
                started_at TEXT NOT NULL,
                ended_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_calls_caller ON calls(caller_id);
            CREATE INDEX IF NOT EXISTS idx_calls_receiver ON calls(receiver_id);

            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                sender_id TEXT NOT NULL,
                receiver_id TEXT NOT NULL,
                content TEXT NOT NULL,
                timestamp TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_messages_pair ON messages(sender_id, receiver_id);
            "#,
        )?;
        Ok(())
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

// ============================================================================
// TESTS
// ============================================================================
