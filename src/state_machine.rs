//! Turn coordinator state machine
//!
//! Implements the Elm Architecture pattern with pure state transitions.
//! Mute is derived from the phase, never stored.

mod effect;
pub mod event;
pub mod state;
pub(crate) mod transition;

#[cfg(test)]
mod proptests;

pub use effect::{Effect, ReplySelection};
pub use event::Event;
pub use state::{
    ConversationState, Phase, ResearchOrigin, ResearchOutcome, Role, SessionContext,
    SessionSnapshot, Status, Suggestion, SuggestionStatus, TranscriptEntry,
};
pub use transition::{transition, TransitionError, TransitionResult};
