//! Conversation state types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// Transcript
// ============================================================================

/// Who produced an utterance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The conversation partner, heard through the microphone
    Partner,
    /// The app's user, spoken through their cloned voice
    #[serde(rename = "self")]
    User,
    /// Context injected by the app (research results)
    System,
}

/// One spoken or typed unit of dialogue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl TranscriptEntry {
    pub fn new(role: Role, text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            role,
            text: text.into(),
            timestamp,
        }
    }
}

// ============================================================================
// Suggestions
// ============================================================================

/// Maximum number of suggestions shown at once
pub const MAX_SUGGESTIONS: usize = 3;

/// A short candidate reply offered for one-tap selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub id: String,
    pub text: String,
    pub category: String,
}

impl Suggestion {
    pub fn new(id: impl Into<String>, text: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            category: category.into(),
        }
    }
}

/// Progress of the current suggestion batch, rendered as the "waiting" indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionStatus {
    /// Nothing requested since the last reply
    #[default]
    Waiting,
    Generating,
    Ready,
    /// Generation failed; the user can still type
    Unavailable,
}

// ============================================================================
// Research
// ============================================================================

/// Who is waiting on a research result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResearchOrigin {
    /// Requested from the command surface; nobody to answer
    User,
    /// Requested by the voice agent through a client tool call
    Agent { call_id: String },
}

/// The single outstanding research request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchRequest {
    pub query: String,
    pub origin: ResearchOrigin,
}

/// How a research request was resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResearchOutcome {
    Completed { result: String },
    Cancelled,
}

// ============================================================================
// Conversation State
// ============================================================================

/// Externally visible coordinator status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Idle,
    Connected,
    Speaking,
    AwaitingResearch,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Status::Idle => "idle",
            Status::Connected => "connected",
            Status::Speaking => "speaking",
            Status::AwaitingResearch => "awaiting_research",
        };
        f.write_str(name)
    }
}

/// Coordinator phase. Data that only exists in one phase lives in its variant.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Phase {
    /// No session
    #[default]
    Idle,

    /// Session live, output muted, waiting for the user to reply
    Connected,

    /// A reply was dispatched to the voice path and output is unmuted
    Speaking {
        utterance: String,
        /// Epoch the reply was dispatched under; tags the fallback timer
        epoch: u64,
    },

    /// Reply dispatch is paused until research resolves
    AwaitingResearch { request: ResearchRequest },
}

/// Full state of one conversation session
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConversationState {
    pub phase: Phase,
    pub transcript: Vec<TranscriptEntry>,
    pub suggestions: Vec<Suggestion>,
    pub suggestion_status: SuggestionStatus,
    /// Generation token; bumped on every reply dispatch and every new suggestion batch
    pub epoch: u64,
}

impl ConversationState {
    pub fn status(&self) -> Status {
        match self.phase {
            Phase::Idle => Status::Idle,
            Phase::Connected => Status::Connected,
            Phase::Speaking { .. } => Status::Speaking,
            Phase::AwaitingResearch { .. } => Status::AwaitingResearch,
        }
    }

    /// Output is audible only while speaking
    pub fn mute(&self) -> bool {
        self.status() != Status::Speaking
    }

    pub fn pending_utterance(&self) -> Option<&str> {
        match &self.phase {
            Phase::Speaking { utterance, .. } => Some(utterance),
            _ => None,
        }
    }

    pub fn research_request(&self) -> Option<&ResearchRequest> {
        match &self.phase {
            Phase::AwaitingResearch { request } => Some(request),
            _ => None,
        }
    }

    /// The last `n` transcript entries, oldest first
    pub fn transcript_tail(&self, n: usize) -> Vec<TranscriptEntry> {
        let start = self.transcript.len().saturating_sub(n);
        self.transcript.iter().skip(start).cloned().collect()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            status: self.status(),
            mute: self.mute(),
            transcript: self.transcript.clone(),
            suggestions: self.suggestions.clone(),
            suggestion_status: self.suggestion_status,
            pending_utterance: self.pending_utterance().map(String::from),
            research_query: self.research_request().map(|r| r.query.clone()),
            epoch: self.epoch,
        }
    }
}

/// Observable state for presentation layers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub status: Status,
    pub mute: bool,
    pub transcript: Vec<TranscriptEntry>,
    pub suggestions: Vec<Suggestion>,
    pub suggestion_status: SuggestionStatus,
    pub pending_utterance: Option<String>,
    pub research_query: Option<String>,
    pub epoch: u64,
}

// ============================================================================
// Session Context
// ============================================================================

/// Default fallback window before a silent voice path is force-completed
pub const DEFAULT_SPEECH_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of transcript entries sent as generation context
pub const DEFAULT_CONTEXT_ENTRIES: usize = 10;

/// Context for a session (immutable configuration)
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: String,
    pub user_id: String,
    pub speech_timeout: Duration,
    pub context_entries: usize,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            speech_timeout: DEFAULT_SPEECH_TIMEOUT,
            context_entries: DEFAULT_CONTEXT_ENTRIES,
        }
    }

    pub fn with_speech_timeout(mut self, timeout: Duration) -> Self {
        self.speech_timeout = timeout;
        self
    }

    pub fn with_context_entries(mut self, entries: usize) -> Self {
        self.context_entries = entries;
        self
    }
}
