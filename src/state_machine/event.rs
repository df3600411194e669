//! Events that can occur in a session

use super::state::{ResearchOrigin, Suggestion};
use crate::voice::VoiceErrorKind;
use chrono::{DateTime, Utc};

/// Events that trigger state transitions
#[derive(Debug, Clone)]
pub enum Event {
    // User commands
    Start {
        /// Cloned voice id from the user's profile, if one exists
        voice_id: Option<String>,
    },
    SelectSuggestion {
        id: String,
    },
    SubmitCustomText {
        text: String,
    },
    RequestRegeneration,
    RequestResearch {
        query: String,
        origin: ResearchOrigin,
    },
    CompleteResearch {
        result: String,
        at: DateTime<Utc>,
    },
    CancelResearch,
    End,

    // Voice channel events
    PartnerUtterance {
        text: String,
        at: DateTime<Utc>,
    },
    AgentSpeechStarted,
    AgentSpeechEnded {
        at: DateTime<Utc>,
    },
    VoiceError {
        kind: VoiceErrorKind,
        message: String,
    },
    UtteranceFailed {
        epoch: u64,
        message: String,
    },

    // Suggestion channel events
    SuggestionsReady {
        epoch: u64,
        suggestions: Vec<Suggestion>,
    },
    SuggestionsFailed {
        epoch: u64,
        message: String,
    },
    /// Replies the voice agent produced itself
    AgentSuggestions {
        suggestions: Vec<Suggestion>,
    },

    // Timers
    SpeechTimeout {
        epoch: u64,
        at: DateTime<Utc>,
    },
}

impl Event {
    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Event::Start { .. } => "start",
            Event::SelectSuggestion { .. } => "select_suggestion",
            Event::SubmitCustomText { .. } => "submit_custom_text",
            Event::RequestRegeneration => "request_regeneration",
            Event::RequestResearch { .. } => "request_research",
            Event::CompleteResearch { .. } => "complete_research",
            Event::CancelResearch => "cancel_research",
            Event::End => "end",
            Event::PartnerUtterance { .. } => "partner_utterance",
            Event::AgentSpeechStarted => "agent_speech_started",
            Event::AgentSpeechEnded { .. } => "agent_speech_ended",
            Event::VoiceError { .. } => "voice_error",
            Event::UtteranceFailed { .. } => "utterance_failed",
            Event::SuggestionsReady { .. } => "suggestions_ready",
            Event::SuggestionsFailed { .. } => "suggestions_failed",
            Event::AgentSuggestions { .. } => "agent_suggestions",
            Event::SpeechTimeout { .. } => "speech_timeout",
        }
    }
}
