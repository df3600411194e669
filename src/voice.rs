//! Voice/transcript channel
//!
//! The coordinator talks to the voice provider only through [`VoiceChannel`].
//! Provider events arrive on the [`VoiceSession`] stream and are translated
//! into coordinator [`Event`]s by the runtime.

mod bridge;
mod elevenlabs;

pub use bridge::{BridgeAttachment, InboundMessage, OutboundMessage, VoiceBridge};
pub use elevenlabs::ElevenLabsClient;

use crate::state_machine::{Event, ResearchOrigin, ResearchOutcome, Suggestion};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Voice channel error with classification
#[derive(Debug, Error)]
#[error("{message}")]
pub struct VoiceError {
    pub kind: VoiceErrorKind,
    pub message: String,
}

impl VoiceError {
    pub fn new(kind: VoiceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn connect(message: impl Into<String>) -> Self {
        Self::new(VoiceErrorKind::Connect, message)
    }

    pub fn not_connected(session_id: &str) -> Self {
        Self::new(
            VoiceErrorKind::NotConnected,
            format!("No voice session for {session_id}"),
        )
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(VoiceErrorKind::Transport, message)
    }
}

/// What went wrong on the voice path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceErrorKind {
    /// Could not open the provider session
    Connect,
    /// No session exists for the id
    NotConnected,
    /// Sending a command failed
    Transport,
    /// The client side of the bridge went away
    Disconnected,
    /// The provider reported an error
    Provider,
}

impl fmt::Display for VoiceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VoiceErrorKind::Connect => "connect",
            VoiceErrorKind::NotConnected => "not_connected",
            VoiceErrorKind::Transport => "transport",
            VoiceErrorKind::Disconnected => "disconnected",
            VoiceErrorKind::Provider => "provider",
        };
        f.write_str(name)
    }
}

/// Events yielded by a voice session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceEvent {
    /// Partner speech was recognized
    PartnerUtterance { text: String },
    AgentSpeechStarted,
    AgentSpeechEnded,
    /// The voice agent invoked its research tool and is waiting for an answer
    ResearchRequested { call_id: String, query: String },
    /// The voice agent offered its own reply options
    RepliesOffered { suggestions: Vec<Suggestion> },
    Error { kind: VoiceErrorKind, message: String },
}

impl VoiceEvent {
    /// Translate into a coordinator event, stamping transcript times with `at`
    pub fn into_event(self, at: DateTime<Utc>) -> Event {
        match self {
            VoiceEvent::PartnerUtterance { text } => Event::PartnerUtterance { text, at },
            VoiceEvent::AgentSpeechStarted => Event::AgentSpeechStarted,
            VoiceEvent::AgentSpeechEnded => Event::AgentSpeechEnded { at },
            VoiceEvent::ResearchRequested { call_id, query } => Event::RequestResearch {
                query,
                origin: ResearchOrigin::Agent { call_id },
            },
            VoiceEvent::RepliesOffered { suggestions } => Event::AgentSuggestions { suggestions },
            VoiceEvent::Error { kind, message } => Event::VoiceError { kind, message },
        }
    }
}

/// Who the cloned voice belongs to and how they talk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceProfile {
    pub voice_id: String,
    pub user_name: Option<String>,
    pub communication_style: Option<String>,
    pub memories: Vec<String>,
}

impl VoiceProfile {
    /// Per-session variables injected into the voice agent's prompt
    pub fn dynamic_variables(&self) -> Value {
        let memories = if self.memories.is_empty() {
            "No specific memories yet".to_string()
        } else {
            self.memories.join(". ")
        };
        json!({
            "user_name": self.user_name.as_deref().unwrap_or("Friend"),
            "communication_style": self
                .communication_style
                .as_deref()
                .unwrap_or("warm and conversational"),
            "user_memories": memories,
        })
    }
}

/// A connected voice session
#[derive(Debug)]
pub struct VoiceSession {
    pub events: mpsc::Receiver<VoiceEvent>,
    /// What the client needs to open the provider session
    pub client_config: Value,
}

/// Capabilities required from the voice/conversation provider
#[async_trait]
pub trait VoiceChannel: Send + Sync {
    async fn connect(
        &self,
        session_id: &str,
        profile: &VoiceProfile,
    ) -> Result<VoiceSession, VoiceError>;

    async fn disconnect(&self, session_id: &str) -> Result<(), VoiceError>;

    /// Have the agent speak `text` in the user's voice
    async fn send_utterance(&self, session_id: &str, text: &str) -> Result<(), VoiceError>;

    async fn set_output_muted(&self, session_id: &str, muted: bool) -> Result<(), VoiceError>;

    async fn interrupt_output(&self, session_id: &str) -> Result<(), VoiceError>;

    /// Answer a research tool call raised by the agent
    async fn resolve_research(
        &self,
        session_id: &str,
        call_id: &str,
        outcome: &ResearchOutcome,
    ) -> Result<(), VoiceError>;
}

#[async_trait]
impl<T: VoiceChannel + ?Sized> VoiceChannel for Arc<T> {
    async fn connect(
        &self,
        session_id: &str,
        profile: &VoiceProfile,
    ) -> Result<VoiceSession, VoiceError> {
        (**self).connect(session_id, profile).await
    }

    async fn disconnect(&self, session_id: &str) -> Result<(), VoiceError> {
        (**self).disconnect(session_id).await
    }

    async fn send_utterance(&self, session_id: &str, text: &str) -> Result<(), VoiceError> {
        (**self).send_utterance(session_id, text).await
    }

    async fn set_output_muted(&self, session_id: &str, muted: bool) -> Result<(), VoiceError> {
        (**self).set_output_muted(session_id, muted).await
    }

    async fn interrupt_output(&self, session_id: &str) -> Result<(), VoiceError> {
        (**self).interrupt_output(session_id).await
    }

    async fn resolve_research(
        &self,
        session_id: &str,
        call_id: &str,
        outcome: &ResearchOutcome,
    ) -> Result<(), VoiceError> {
        (**self).resolve_research(session_id, call_id, outcome).await
    }
}
