//! Database module
//!
//! Provides persistence for user profiles, conversation transcripts and
//! reply-selection analytics.

mod schema;

pub use schema::*;

use crate::state_machine::{ReplySelection, TranscriptEntry};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("User not found: {0}")]
    UserNotFound(String),
    #[error("Database task failed: {0}")]
    Task(String),
}

pub type DbResult<T> = Result<T, DbError>;

const USER_COLUMNS: &str = "auth_id, email, name, voice_id, voice_created_at, communication_style,
                            memories, speech_rate, auto_speak, created_at, updated_at";

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    #[allow(dead_code)] // Used in tests
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Hold the connection lock from another thread for `duration`
    #[cfg(test)]
    pub fn hold_lock(&self, duration: std::time::Duration) -> std::thread::JoinHandle<()> {
        let conn = self.conn.clone();
        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let holder = std::thread::spawn(move || {
            let _guard = conn.lock().unwrap();
            let _ = locked_tx.send(());
            std::thread::sleep(duration);
        });
        let _ = locked_rx.recv();
        holder
    }

    fn run_migrations(&self) -> DbResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    // ==================== User Operations ====================

    /// Create the user if missing; an existing user keeps their data, gaining
    /// email and name only where those were unset
    pub fn upsert_user(
        &self,
        auth_id: &str,
        email: Option<&str>,
        name: Option<&str>,
    ) -> DbResult<UserProfile> {
        {
            let conn = self.conn.lock().unwrap();
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO users (auth_id, email, name, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT(auth_id) DO UPDATE SET
                    email = COALESCE(users.email, excluded.email),
                    name = COALESCE(users.name, excluded.name)",
                params![auth_id, email, name, now],
            )?;
        }
        self.get_user(auth_id)
    }

    /// Get user by auth id
    pub fn get_user(&self, auth_id: &str) -> DbResult<UserProfile> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE auth_id = ?1"),
            params![auth_id],
            user_from_row,
        )
        .optional()?
        .ok_or_else(|| DbError::UserNotFound(auth_id.to_string()))
    }

    /// Apply a partial preferences update
    pub fn update_preferences(
        &self,
        auth_id: &str,
        update: &PreferencesUpdate,
    ) -> DbResult<UserProfile> {
        let memories = update
            .memories
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let changed = {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "UPDATE users SET
                    communication_style = COALESCE(?2, communication_style),
                    memories = COALESCE(?3, memories),
                    speech_rate = COALESCE(?4, speech_rate),
                    auto_speak = COALESCE(?5, auto_speak),
                    updated_at = ?6
                 WHERE auth_id = ?1",
                params![
                    auth_id,
                    update.communication_style,
                    memories,
                    update.speech_rate,
                    update.auto_speak,
                    Utc::now().to_rfc3339()
                ],
            )?
        };
        if changed == 0 {
            return Err(DbError::UserNotFound(auth_id.to_string()));
        }
        self.get_user(auth_id)
    }

    /// Record the cloned voice for a user
    pub fn set_voice(&self, auth_id: &str, voice_id: &str) -> DbResult<UserProfile> {
        let changed = {
            let conn = self.conn.lock().unwrap();
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "UPDATE users SET voice_id = ?2, voice_created_at = ?3, updated_at = ?3
                 WHERE auth_id = ?1",
                params![auth_id, voice_id, now],
            )?
        };
        if changed == 0 {
            return Err(DbError::UserNotFound(auth_id.to_string()));
        }
        self.get_user(auth_id)
    }

    // ==================== Transcript Operations ====================

    /// Store a finished session's transcript
    pub fn save_conversation_log(
        &self,
        id: &str,
        user_id: &str,
        session_id: &str,
        entries: &[TranscriptEntry],
    ) -> DbResult<ConversationLog> {
        let ended_at = Utc::now();
        let started_at = entries.first().map_or(ended_at, |e| e.timestamp);
        let entries_json = serde_json::to_string(entries)?;

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO conversation_logs (id, user_id, session_id, entries, started_at, ended_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id,
                user_id,
                session_id,
                entries_json,
                started_at.to_rfc3339(),
                ended_at.to_rfc3339()
            ],
        )?;

        Ok(ConversationLog {
            id: id.to_string(),
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            entries: entries.to_vec(),
            started_at,
            ended_at,
        })
    }

    /// A user's transcripts, newest first
    pub fn list_conversation_logs(&self, user_id: &str) -> DbResult<Vec<ConversationLog>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, session_id, entries, started_at, ended_at
             FROM conversation_logs WHERE user_id = ?1
             ORDER BY ended_at DESC",
        )?;

        let rows = stmt.query_map(params![user_id], |row| {
            let entries_json: String = row.get(3)?;
            Ok(ConversationLog {
                id: row.get(0)?,
                user_id: row.get(1)?,
                session_id: row.get(2)?,
                entries: serde_json::from_str(&entries_json).unwrap_or_default(),
                started_at: parse_datetime(&row.get::<_, String>(4)?),
                ended_at: parse_datetime(&row.get::<_, String>(5)?),
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    // ==================== Analytics Operations ====================

    pub fn record_reply_selection(
        &self,
        id: &str,
        user_id: &str,
        session_id: &str,
        selection: &ReplySelection,
    ) -> DbResult<ReplySelectionRecord> {
        let now = Utc::now();
        let options_json = serde_json::to_string(&selection.all_options)?;

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO reply_selections (id, user_id, session_id, selected_text, category, all_options, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id,
                user_id,
                session_id,
                selection.selected_text,
                selection.category,
                options_json,
                now.to_rfc3339()
            ],
        )?;

        Ok(ReplySelectionRecord {
            id: id.to_string(),
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            selected_text: selection.selected_text.clone(),
            category: selection.category.clone(),
            all_options: selection.all_options.clone(),
            created_at: now,
        })
    }

    pub fn list_reply_selections(&self, user_id: &str) -> DbResult<Vec<ReplySelectionRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, session_id, selected_text, category, all_options, created_at
             FROM reply_selections WHERE user_id = ?1
             ORDER BY created_at ASC",
        )?;

        let rows = stmt.query_map(params![user_id], |row| {
            let options_json: String = row.get(5)?;
            Ok(ReplySelectionRecord {
                id: row.get(0)?,
                user_id: row.get(1)?,
                session_id: row.get(2)?,
                selected_text: row.get(3)?,
                category: row.get(4)?,
                all_options: serde_json::from_str(&options_json).unwrap_or_default(),
                created_at: parse_datetime(&row.get::<_, String>(6)?),
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserProfile> {
    let memories_json: String = row.get(6)?;
    Ok(UserProfile {
        auth_id: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2)?,
        voice_id: row.get(3)?,
        voice_created_at: row
            .get::<_, Option<String>>(4)?
            .map(|s| parse_datetime(&s)),
        communication_style: row.get(5)?,
        memories: serde_json::from_str(&memories_json).unwrap_or_default(),
        preferences: Preferences {
            speech_rate: row.get(7)?,
            auto_speak: row.get(8)?,
        },
        created_at: parse_datetime(&row.get::<_, String>(9)?),
        updated_at: parse_datetime(&row.get::<_, String>(10)?),
    })
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}
