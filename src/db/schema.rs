//! Database schema and types

use crate::state_machine::{Suggestion, TranscriptEntry};
use crate::suggestions::StyleHint;
use crate::voice::VoiceProfile;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// SQL schema for initialization
pub const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS users (
    auth_id TEXT PRIMARY KEY,
    email TEXT,
    name TEXT,
    voice_id TEXT,
    voice_created_at TEXT,
    communication_style TEXT,
    memories TEXT NOT NULL DEFAULT '[]',
    speech_rate REAL NOT NULL DEFAULT 1.0,
    auto_speak BOOLEAN NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS conversation_logs (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    session_id TEXT NOT NULL,
    entries TEXT NOT NULL,
    started_at TEXT NOT NULL,
    ended_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_conversation_logs_user ON conversation_logs(user_id, ended_at DESC);

CREATE TABLE IF NOT EXISTS reply_selections (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    session_id TEXT NOT NULL,
    selected_text TEXT NOT NULL,
    category TEXT NOT NULL,
    all_options TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_reply_selections_user ON reply_selections(user_id, created_at DESC);
";

/// Speech playback preferences
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    pub speech_rate: f64,
    pub auto_speak: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            speech_rate: 1.0,
            auto_speak: true,
        }
    }
}

/// User record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub auth_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub voice_id: Option<String>,
    pub voice_created_at: Option<DateTime<Utc>>,
    pub communication_style: Option<String>,
    pub memories: Vec<String>,
    pub preferences: Preferences,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserProfile {
    /// Voice settings for a session, if a cloned voice exists
    pub fn voice_profile(&self) -> Option<VoiceProfile> {
        let voice_id = self.voice_id.clone().filter(|v| !v.trim().is_empty())?;
        Some(VoiceProfile {
            voice_id,
            user_name: self.name.clone(),
            communication_style: self.communication_style.clone(),
            memories: self.memories.clone(),
        })
    }

    pub fn style_hint(&self) -> StyleHint {
        StyleHint::new(self.name.as_deref(), self.communication_style.as_deref())
    }
}

/// Partial update for user preferences; `None` leaves a field as is
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PreferencesUpdate {
    pub communication_style: Option<String>,
    pub memories: Option<Vec<String>>,
    pub speech_rate: Option<f64>,
    pub auto_speak: Option<bool>,
}

/// Transcript flushed at the end of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationLog {
    pub id: String,
    pub user_id: String,
    pub session_id: String,
    pub entries: Vec<TranscriptEntry>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

/// Analytics record of which reply the user chose
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplySelectionRecord {
    pub id: String,
    pub user_id: String,
    pub session_id: String,
    pub selected_text: String,
    pub category: String,
    pub all_options: Vec<Suggestion>,
    pub created_at: DateTime<Utc>,
}
