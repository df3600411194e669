//! Effects produced by state transitions

use super::state::{ResearchOutcome, Suggestion, TranscriptEntry};
use std::time::Duration;

/// A reply the user chose, recorded for analytics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplySelection {
    pub selected_text: String,
    pub category: String,
    /// Every option that was on screen when the choice was made
    pub all_options: Vec<Suggestion>,
}

/// Effects to be executed after state transition
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Mute or unmute spoken output
    SetOutputMuted { muted: bool },

    /// Hand text to the voice path to be spoken
    DispatchUtterance { epoch: u64, text: String },

    /// Stop whatever the voice path is currently saying
    InterruptOutput,

    /// Start the speech-completion watchdog
    ArmSpeechTimeout { epoch: u64, after: Duration },

    /// Stop the watchdog; the genuine completion arrived
    CancelSpeechTimeout,

    /// Ask the suggestion generator for a new batch
    RequestSuggestions {
        epoch: u64,
        tail: Vec<TranscriptEntry>,
    },

    /// Record the chosen reply (fire-and-forget)
    RecordSelection(ReplySelection),

    /// Answer the voice agent's research tool call
    ResolveResearch {
        call_id: String,
        outcome: ResearchOutcome,
    },

    /// Persist the transcript; awaited with a bounded timeout
    FlushTranscript { entries: Vec<TranscriptEntry> },

    /// Close the voice session
    Disconnect,

    /// Surface a non-fatal error to subscribers
    NotifyError { message: String },
}

impl Effect {
    pub fn mute() -> Self {
        Effect::SetOutputMuted { muted: true }
    }

    pub fn unmute() -> Self {
        Effect::SetOutputMuted { muted: false }
    }

    pub fn cancelled_research(call_id: impl Into<String>) -> Self {
        Effect::ResolveResearch {
            call_id: call_id.into(),
            outcome: ResearchOutcome::Cancelled,
        }
    }
}
