//! Pure state transition function
//!
//! Every command, voice event, generation result and timer passes through
//! [`transition`]. It performs no I/O; the runtime executes the returned effects.

use super::effect::ReplySelection;
use super::state::{
    ConversationState, Phase, ResearchOrigin, ResearchOutcome, ResearchRequest, Role,
    SessionContext, Status, SuggestionStatus, TranscriptEntry, MAX_SUGGESTIONS,
};
use super::{Effect, Event};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Category recorded for free-text replies
pub const CUSTOM_CATEGORY: &str = "custom";

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: ConversationState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: ConversationState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    /// No state change and nothing to do (stale or ignorable events)
    pub fn unchanged(state: &ConversationState) -> Self {
        Self::new(state.clone())
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }
}

/// Errors that can occur during transition. None of them mutate state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("No voice profile configured; complete voice setup first")]
    Precondition,
    #[error("Cannot {action} while {status}")]
    IllegalState {
        action: &'static str,
        status: Status,
    },
    #[error("Unknown suggestion: {0}")]
    UnknownSuggestion(String),
    #[error("Cannot speak an empty message")]
    EmptyUtterance,
    #[error("Research query is empty")]
    EmptyResearchQuery,
}

fn illegal(action: &'static str, state: &ConversationState) -> TransitionError {
    TransitionError::IllegalState {
        action,
        status: state.status(),
    }
}

/// Pure transition function
///
/// Given the same inputs it always produces the same outputs. Stale
/// asynchronous results are `Ok` with no effects, never errors.
#[allow(clippy::too_many_lines)]
pub fn transition(
    state: &ConversationState,
    context: &SessionContext,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    match (&state.phase, event) {
        // ============================================================
        // Session start
        // ============================================================
        (Phase::Idle, Event::Start { voice_id }) => {
            if voice_id.as_deref().map_or(true, |id| id.trim().is_empty()) {
                return Err(TransitionError::Precondition);
            }
            let connected = ConversationState {
                phase: Phase::Connected,
                ..ConversationState::default()
            };
            Ok(TransitionResult::new(connected).with_effect(Effect::mute()))
        }

        (_, Event::Start { .. }) => Err(illegal("start a session", state)),

        // ============================================================
        // Partner speech
        // ============================================================
        (Phase::Idle, Event::PartnerUtterance { .. }) => {
            Err(illegal("record partner speech", state))
        }

        (_, Event::PartnerUtterance { text, .. }) if text.trim().is_empty() => {
            Ok(TransitionResult::unchanged(state))
        }

        (Phase::Connected, Event::PartnerUtterance { text, at }) => {
            let mut next = state.clone();
            next.transcript
                .push(TranscriptEntry::new(Role::Partner, text.trim(), at));
            let request = request_suggestions(&mut next, context);
            Ok(TransitionResult::new(next).with_effect(request))
        }

        // Heard while speaking or researching: keep it, but don't generate
        (_, Event::PartnerUtterance { text, at }) => {
            let mut next = state.clone();
            next.transcript
                .push(TranscriptEntry::new(Role::Partner, text.trim(), at));
            Ok(TransitionResult::new(next))
        }

        // ============================================================
        // Suggestion batches
        // ============================================================
        (Phase::Connected, Event::SuggestionsReady { epoch, suggestions })
            if epoch == state.epoch =>
        {
            let mut next = state.clone();
            next.suggestions = suggestions.into_iter().take(MAX_SUGGESTIONS).collect();
            next.suggestion_status = SuggestionStatus::Ready;
            Ok(TransitionResult::new(next))
        }

        (_, Event::SuggestionsReady { .. }) => Ok(TransitionResult::unchanged(state)),

        (Phase::Connected, Event::SuggestionsFailed { epoch, .. }) if epoch == state.epoch => {
            let mut next = state.clone();
            next.suggestions.clear();
            next.suggestion_status = SuggestionStatus::Unavailable;
            Ok(TransitionResult::new(next))
        }

        (_, Event::SuggestionsFailed { .. }) => Ok(TransitionResult::unchanged(state)),

        // Replies pushed by the voice agent replace whatever is pending
        (Phase::Connected, Event::AgentSuggestions { suggestions }) if !suggestions.is_empty() => {
            let mut next = state.clone();
            next.epoch += 1;
            next.suggestions = suggestions.into_iter().take(MAX_SUGGESTIONS).collect();
            next.suggestion_status = SuggestionStatus::Ready;
            Ok(TransitionResult::new(next))
        }

        (_, Event::AgentSuggestions { .. }) => Ok(TransitionResult::unchanged(state)),

        // ============================================================
        // Reply dispatch
        // ============================================================
        (Phase::Connected, Event::SelectSuggestion { id }) => {
            let suggestion = state
                .suggestions
                .iter()
                .find(|s| s.id == id)
                .ok_or(TransitionError::UnknownSuggestion(id))?;
            Ok(dispatch_reply(
                state,
                context,
                suggestion.text.clone(),
                suggestion.category.clone(),
            ))
        }

        (Phase::Connected, Event::SubmitCustomText { text }) => {
            let text = text.trim();
            if text.is_empty() {
                return Err(TransitionError::EmptyUtterance);
            }
            Ok(dispatch_reply(
                state,
                context,
                text.to_string(),
                CUSTOM_CATEGORY.to_string(),
            ))
        }

        (_, Event::SelectSuggestion { .. }) => Err(illegal("select a suggestion", state)),
        (_, Event::SubmitCustomText { .. }) => Err(illegal("send a message", state)),

        // ============================================================
        // Speech completion (genuine event, watchdog, or send failure)
        // ============================================================
        (_, Event::AgentSpeechStarted) => Ok(TransitionResult::unchanged(state)),

        (Phase::Speaking { utterance, .. }, Event::AgentSpeechEnded { at }) => {
            Ok(finish_speaking(state, utterance, at).with_effects([
                Effect::CancelSpeechTimeout,
                Effect::mute(),
            ]))
        }

        // Already re-muted (timer won the race, or a duplicate event)
        (_, Event::AgentSpeechEnded { .. }) => Ok(TransitionResult::unchanged(state)),

        (Phase::Speaking { utterance, epoch }, Event::SpeechTimeout { epoch: fired, at })
            if *epoch == fired =>
        {
            Ok(finish_speaking(state, utterance, at).with_effect(Effect::mute()))
        }

        (_, Event::SpeechTimeout { .. }) => Ok(TransitionResult::unchanged(state)),

        (Phase::Speaking { epoch, .. }, Event::UtteranceFailed { epoch: failed, message })
            if *epoch == failed =>
        {
            let mut next = state.clone();
            next.phase = Phase::Connected;
            Ok(TransitionResult::new(next).with_effects([
                Effect::CancelSpeechTimeout,
                Effect::mute(),
                Effect::NotifyError {
                    message: format!("Failed to speak message: {message}"),
                },
            ]))
        }

        (_, Event::UtteranceFailed { .. }) => Ok(TransitionResult::unchanged(state)),

        // ============================================================
        // Regeneration
        // ============================================================
        (Phase::Connected, Event::RequestRegeneration) => {
            let mut next = state.clone();
            next.suggestions.clear();
            if next.transcript.is_empty() {
                next.epoch += 1;
                next.suggestion_status = SuggestionStatus::Waiting;
                return Ok(TransitionResult::new(next));
            }
            let request = request_suggestions(&mut next, context);
            Ok(TransitionResult::new(next).with_effect(request))
        }

        (_, Event::RequestRegeneration) => Err(illegal("regenerate suggestions", state)),

        // ============================================================
        // Research sub-flow
        // ============================================================
        (Phase::Connected, Event::RequestResearch { query, origin }) => {
            let query = query.trim();
            if query.is_empty() {
                return Err(TransitionError::EmptyResearchQuery);
            }
            let mut next = state.clone();
            next.phase = Phase::AwaitingResearch {
                request: ResearchRequest {
                    query: query.to_string(),
                    origin,
                },
            };
            Ok(TransitionResult::new(next))
        }

        (_, Event::RequestResearch { .. }) => Err(illegal("request research", state)),

        (Phase::AwaitingResearch { request }, Event::CompleteResearch { result, at }) => {
            let mut next = state.clone();
            next.phase = Phase::Connected;
            next.transcript.push(TranscriptEntry::new(
                Role::System,
                format!("Research: {result}"),
                at,
            ));
            let suggestions = request_suggestions(&mut next, context);

            let resolve = resolve_origin(
                &request.origin,
                ResearchOutcome::Completed { result },
            );
            Ok(TransitionResult::new(next)
                .with_effects(resolve)
                .with_effect(suggestions))
        }

        (Phase::AwaitingResearch { request }, Event::CancelResearch) => {
            let mut next = state.clone();
            next.phase = Phase::Connected;
            let resolve = resolve_origin(&request.origin, ResearchOutcome::Cancelled);
            Ok(TransitionResult::new(next).with_effects(resolve))
        }

        (_, Event::CompleteResearch { .. }) => Err(illegal("complete research", state)),
        (_, Event::CancelResearch) => Err(illegal("cancel research", state)),

        // ============================================================
        // Session end
        // ============================================================
        (Phase::Idle, Event::End) => Err(illegal("end the session", state)),

        (phase, Event::End) => {
            let mut effects = Vec::new();
            match phase {
                Phase::Speaking { .. } => {
                    effects.push(Effect::CancelSpeechTimeout);
                    effects.push(Effect::InterruptOutput);
                }
                Phase::AwaitingResearch { request } => {
                    effects.extend(resolve_origin(&request.origin, ResearchOutcome::Cancelled));
                }
                Phase::Idle | Phase::Connected => {}
            }
            if !state.transcript.is_empty() {
                effects.push(Effect::FlushTranscript {
                    entries: state.transcript.clone(),
                });
            }
            effects.push(Effect::Disconnect);
            Ok(TransitionResult::new(ConversationState::default()).with_effects(effects))
        }

        // ============================================================
        // Voice channel errors
        // ============================================================
        (_, Event::VoiceError { kind, message }) => {
            Ok(TransitionResult::unchanged(state).with_effect(Effect::NotifyError {
                message: format!("Voice channel error ({kind}): {message}"),
            }))
        }
    }
}

// Helper functions

/// Speaking -> Connected, recording what was said and opening a new turn
fn dispatch_reply(
    state: &ConversationState,
    context: &SessionContext,
    text: String,
    category: String,
) -> TransitionResult {
    let epoch = state.epoch + 1;
    let selection = ReplySelection {
        selected_text: text.clone(),
        category,
        all_options: state.suggestions.clone(),
    };

    let next = ConversationState {
        phase: Phase::Speaking {
            utterance: text.clone(),
            epoch,
        },
        transcript: state.transcript.clone(),
        suggestions: vec![],
        suggestion_status: SuggestionStatus::Waiting,
        epoch,
    };

    TransitionResult::new(next).with_effects([
        Effect::unmute(),
        Effect::DispatchUtterance { epoch, text },
        Effect::ArmSpeechTimeout {
            epoch,
            after: context.speech_timeout,
        },
        Effect::RecordSelection(selection),
    ])
}

/// Open a new generation under a fresh epoch so any batch still in flight goes stale
fn request_suggestions(next: &mut ConversationState, context: &SessionContext) -> Effect {
    next.epoch += 1;
    next.suggestion_status = SuggestionStatus::Generating;
    Effect::RequestSuggestions {
        epoch: next.epoch,
        tail: next.transcript_tail(context.context_entries),
    }
}

fn finish_speaking(
    state: &ConversationState,
    utterance: &str,
    at: DateTime<Utc>,
) -> TransitionResult {
    let mut next = state.clone();
    next.transcript
        .push(TranscriptEntry::new(Role::User, utterance, at));
    next.phase = Phase::Connected;
    TransitionResult::new(next)
}

fn resolve_origin(origin: &ResearchOrigin, outcome: ResearchOutcome) -> Option<Effect> {
    match origin {
        ResearchOrigin::User => None,
        ResearchOrigin::Agent { call_id } => Some(Effect::ResolveResearch {
            call_id: call_id.clone(),
            outcome,
        }),
    }
}
