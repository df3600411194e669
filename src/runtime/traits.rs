//! Trait abstractions for runtime I/O
//!
//! These traits enable testing the executor with mock implementations.

use crate::db::{Database, DbError, DbResult, UserProfile};
use crate::state_machine::{ReplySelection, TranscriptEntry};
use async_trait::async_trait;
use std::sync::Arc;

/// Lookup of user profiles
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// `Ok(None)` when the user does not exist
    async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>, String>;
}

/// Storage for finished session transcripts
#[async_trait]
pub trait TranscriptStore: Send + Sync {
    async fn save_transcript(
        &self,
        user_id: &str,
        session_id: &str,
        entries: &[TranscriptEntry],
    ) -> Result<(), String>;
}

/// Append-only analytics events
#[async_trait]
pub trait AnalyticsStore: Send + Sync {
    async fn record_selection(
        &self,
        user_id: &str,
        session_id: &str,
        selection: &ReplySelection,
    ) -> Result<(), String>;
}

/// Combined storage trait for convenience
pub trait Storage: ProfileStore + TranscriptStore + AnalyticsStore {}
impl<T: ProfileStore + TranscriptStore + AnalyticsStore> Storage for T {}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: ProfileStore + ?Sized> ProfileStore for Arc<T> {
    async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>, String> {
        (**self).get_profile(user_id).await
    }
}

#[async_trait]
impl<T: TranscriptStore + ?Sized> TranscriptStore for Arc<T> {
    async fn save_transcript(
        &self,
        user_id: &str,
        session_id: &str,
        entries: &[TranscriptEntry],
    ) -> Result<(), String> {
        (**self).save_transcript(user_id, session_id, entries).await
    }
}

#[async_trait]
impl<T: AnalyticsStore + ?Sized> AnalyticsStore for Arc<T> {
    async fn record_selection(
        &self,
        user_id: &str,
        session_id: &str,
        selection: &ReplySelection,
    ) -> Result<(), String> {
        (**self).record_selection(user_id, session_id, selection).await
    }
}

// ============================================================================
// Production Adapters
// ============================================================================

/// Adapter to use Database as Storage
#[derive(Clone)]
pub struct DatabaseStorage {
    db: Database,
}

impl DatabaseStorage {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Run a database call on the blocking pool so callers can bound it with a timeout
    async fn blocking<T, F>(&self, call: F) -> DbResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> DbResult<T> + Send + 'static,
    {
        let db = self.db.clone();
        match tokio::task::spawn_blocking(move || call(&db)).await {
            Ok(result) => result,
            Err(e) => Err(DbError::Task(e.to_string())),
        }
    }
}

#[async_trait]
impl ProfileStore for DatabaseStorage {
    async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>, String> {
        let user_id = user_id.to_string();
        match self.blocking(move |db| db.get_user(&user_id)).await {
            Ok(user) => Ok(Some(user)),
            Err(DbError::UserNotFound(_)) => Ok(None),
            Err(e) => Err(e.to_string()),
        }
    }
}

#[async_trait]
impl TranscriptStore for DatabaseStorage {
    async fn save_transcript(
        &self,
        user_id: &str,
        session_id: &str,
        entries: &[TranscriptEntry],
    ) -> Result<(), String> {
        let id = uuid::Uuid::new_v4().to_string();
        let (user_id, session_id, entries) =
            (user_id.to_string(), session_id.to_string(), entries.to_vec());
        self.blocking(move |db| db.save_conversation_log(&id, &user_id, &session_id, &entries))
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

#[async_trait]
impl AnalyticsStore for DatabaseStorage {
    async fn record_selection(
        &self,
        user_id: &str,
        session_id: &str,
        selection: &ReplySelection,
    ) -> Result<(), String> {
        let id = uuid::Uuid::new_v4().to_string();
        let (user_id, session_id, selection) =
            (user_id.to_string(), session_id.to_string(), selection.clone());
        self.blocking(move |db| db.record_reply_selection(&id, &user_id, &session_id, &selection))
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}
