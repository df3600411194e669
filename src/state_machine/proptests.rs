//! Property-based tests for the state machine
//!
//! These tests verify key invariants hold across all possible inputs.

use super::state::*;
use super::transition::*;
use super::*;
use crate::voice::VoiceErrorKind;
use chrono::Utc;
use proptest::prelude::*;

// ============================================================================
// Test Helpers
// ============================================================================

fn test_context() -> SessionContext {
    SessionContext::new("test-session", "user-1")
}

fn started() -> ConversationState {
    transition(
        &ConversationState::default(),
        &test_context(),
        Event::Start {
            voice_id: Some("voice".to_string()),
        },
    )
    .unwrap()
    .new_state
}

fn count_mutes(effects: &[Effect]) -> usize {
    effects
        .iter()
        .filter(|e| matches!(e, Effect::SetOutputMuted { muted: true }))
        .count()
}

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_suggestion() -> impl Strategy<Value = Suggestion> {
    (
        "[1-5]",
        "[a-zA-Z ]{1,20}",
        prop_oneof![
            Just("affirmative".to_string()),
            Just("question".to_string()),
            Just("informational".to_string()),
        ],
    )
        .prop_map(|(id, text, category)| Suggestion { id, text, category })
}

fn arb_origin() -> impl Strategy<Value = ResearchOrigin> {
    prop_oneof![
        Just(ResearchOrigin::User),
        "[a-z]{6}".prop_map(|call_id| ResearchOrigin::Agent { call_id }),
    ]
}

fn arb_command() -> impl Strategy<Value = Event> {
    prop_oneof![
        proptest::option::of("[a-z]{0,6}").prop_map(|voice_id| Event::Start { voice_id }),
        "[1-5]".prop_map(|id| Event::SelectSuggestion { id }),
        "[a-zA-Z ]{0,20}".prop_map(|text| Event::SubmitCustomText { text }),
        Just(Event::RequestRegeneration),
        ("[a-z ]{0,15}", arb_origin())
            .prop_map(|(query, origin)| Event::RequestResearch { query, origin }),
        "[a-zA-Z ]{1,20}".prop_map(|result| Event::CompleteResearch {
            result,
            at: Utc::now(),
        }),
        Just(Event::CancelResearch),
        Just(Event::End),
    ]
}

fn arb_channel_event() -> impl Strategy<Value = Event> {
    prop_oneof![
        "[a-zA-Z? ]{0,20}".prop_map(|text| Event::PartnerUtterance {
            text,
            at: Utc::now(),
        }),
        Just(Event::AgentSpeechStarted),
        Just(Event::AgentSpeechEnded { at: Utc::now() }),
        (0u64..4, proptest::collection::vec(arb_suggestion(), 0..6))
            .prop_map(|(epoch, suggestions)| Event::SuggestionsReady { epoch, suggestions }),
        (0u64..4).prop_map(|epoch| Event::SuggestionsFailed {
            epoch,
            message: "boom".to_string(),
        }),
        (0u64..4).prop_map(|epoch| Event::SpeechTimeout {
            epoch,
            at: Utc::now(),
        }),
        (0u64..4).prop_map(|epoch| Event::UtteranceFailed {
            epoch,
            message: "send failed".to_string(),
        }),
        proptest::collection::vec(arb_suggestion(), 0..4)
            .prop_map(|suggestions| Event::AgentSuggestions { suggestions }),
        Just(Event::VoiceError {
            kind: VoiceErrorKind::Transport,
            message: "glitch".to_string(),
        }),
    ]
}

fn arb_event() -> impl Strategy<Value = Event> {
    prop_oneof![arb_command(), arb_channel_event()]
}

// ============================================================================
// State Validity Checkers
// ============================================================================

fn is_valid_state(state: &ConversationState) -> bool {
    let snapshot = state.snapshot();
    let speaking = snapshot.status == Status::Speaking;
    let researching = snapshot.status == Status::AwaitingResearch;

    snapshot.mute == !speaking
        && snapshot.pending_utterance.is_some() == speaking
        && snapshot.research_query.is_some() == researching
        && snapshot.suggestions.len() <= MAX_SUGGESTIONS
        && (snapshot.status != Status::Idle || state == &ConversationState::default())
}

fn effects_are_valid(effects: &[Effect], new_state: &ConversationState) -> bool {
    let status = new_state.status();
    effects.iter().all(|effect| match effect {
        Effect::SetOutputMuted { muted: false }
        | Effect::DispatchUtterance { .. }
        | Effect::ArmSpeechTimeout { .. } => status == Status::Speaking,
        Effect::SetOutputMuted { muted: true } => status != Status::Speaking,
        Effect::RequestSuggestions { epoch, tail } => {
            status == Status::Connected && *epoch == new_state.epoch && !tail.is_empty()
        }
        Effect::FlushTranscript { entries } => status == Status::Idle && !entries.is_empty(),
        Effect::Disconnect => status == Status::Idle,
        _ => true,
    })
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    // Invariant 1: mute, pending utterance and research request follow the phase
    #[test]
    fn prop_transitions_preserve_validity(events in proptest::collection::vec(arb_event(), 0..30)) {
        let mut state = ConversationState::default();
        let ctx = test_context();

        for event in events {
            if let Ok(result) = transition(&state, &ctx, event) {
                state = result.new_state;
                prop_assert!(is_valid_state(&state), "Invalid state: {:?}", state);
                prop_assert!(
                    effects_are_valid(&result.effects, &state),
                    "Invalid effects for state {:?}: {:?}",
                    state,
                    result.effects
                );
            }
        }
    }

    // Invariant 2: the transcript is append-only within a session
    #[test]
    fn prop_transcript_append_only(events in proptest::collection::vec(arb_event(), 0..30)) {
        let mut state = started();
        let ctx = test_context();

        for event in events {
            let is_end = matches!(event, Event::End);
            if let Ok(result) = transition(&state, &ctx, event) {
                if !is_end {
                    prop_assert!(result.new_state.transcript.starts_with(&state.transcript));
                }
                state = result.new_state;
            }
        }
    }

    // Invariant 3: the epoch never decreases while a session is live
    #[test]
    fn prop_epoch_monotonic(events in proptest::collection::vec(arb_event(), 0..30)) {
        let mut state = started();
        let ctx = test_context();

        for event in events {
            if let Ok(result) = transition(&state, &ctx, event) {
                if result.new_state.status() != Status::Idle {
                    prop_assert!(result.new_state.epoch >= state.epoch);
                }
                state = result.new_state;
            }
        }
    }

    // Invariant 4: a speech-ended event twice equals once
    #[test]
    fn prop_speech_ended_idempotent(events in proptest::collection::vec(arb_event(), 0..20)) {
        let mut state = started();
        let ctx = test_context();
        for event in events {
            if let Ok(result) = transition(&state, &ctx, event) {
                state = result.new_state;
            }
        }

        let at = Utc::now();
        let Ok(once) = transition(&state, &ctx, Event::AgentSpeechEnded { at }) else {
            return Ok(());
        };
        let twice = transition(&once.new_state, &ctx, Event::AgentSpeechEnded { at }).unwrap();
        prop_assert_eq!(&once.new_state, &twice.new_state);
        prop_assert!(twice.effects.is_empty());
    }

    // Invariant 5: the watchdog and the genuine completion re-mute exactly once
    #[test]
    fn prop_timer_race_single_remute(text in "[a-zA-Z]{1,20}", timer_first in any::<bool>()) {
        let ctx = test_context();
        let speaking = transition(&started(), &ctx, Event::SubmitCustomText { text }).unwrap().new_state;
        let epoch = speaking.epoch;
        let at = Utc::now();

        let (first, second) = if timer_first {
            (Event::SpeechTimeout { epoch, at }, Event::AgentSpeechEnded { at })
        } else {
            (Event::AgentSpeechEnded { at }, Event::SpeechTimeout { epoch, at })
        };

        let a = transition(&speaking, &ctx, first).unwrap();
        let b = transition(&a.new_state, &ctx, second).unwrap();

        prop_assert_eq!(count_mutes(&a.effects) + count_mutes(&b.effects), 1);
        prop_assert_eq!(b.new_state.status(), Status::Connected);
        prop_assert_eq!(b.new_state.transcript.len(), 1);
    }

    // Invariant 6: suggestions tagged with an old epoch never land
    #[test]
    fn prop_stale_suggestions_dropped(
        regenerations in 1u64..4,
        suggestions in proptest::collection::vec(arb_suggestion(), 1..4)
    ) {
        let ctx = test_context();
        let mut state = transition(&started(), &ctx, Event::PartnerUtterance {
            text: "Are you hungry?".to_string(),
            at: Utc::now(),
        }).unwrap().new_state;
        let issued_epoch = state.epoch;

        for _ in 0..regenerations {
            state = transition(&state, &ctx, Event::RequestRegeneration).unwrap().new_state;
        }

        let result = transition(&state, &ctx, Event::SuggestionsReady {
            epoch: issued_epoch,
            suggestions,
        }).unwrap();
        prop_assert!(result.new_state.suggestions.is_empty());
        prop_assert_eq!(result.new_state, state);
    }

    // Only the batch for the newest request lands, whatever order batches arrive in
    #[test]
    fn prop_latest_batch_wins(order in Just((0..4).collect::<Vec<usize>>()).prop_shuffle()) {
        let ctx = test_context();
        let mut state = started();
        let mut epochs = Vec::new();
        for i in 0..4 {
            let result = transition(&state, &ctx, Event::PartnerUtterance {
                text: format!("question {i}"),
                at: Utc::now(),
            }).unwrap();
            for effect in &result.effects {
                if let Effect::RequestSuggestions { epoch, .. } = effect {
                    epochs.push(*epoch);
                }
            }
            state = result.new_state;
        }
        prop_assert_eq!(epochs.len(), 4);

        for i in order {
            state = transition(&state, &ctx, Event::SuggestionsReady {
                epoch: epochs[i],
                suggestions: vec![Suggestion::new("1", format!("reply {i}"), "general")],
            }).unwrap().new_state;
        }
        prop_assert_eq!(state.suggestions.len(), 1);
        prop_assert_eq!(state.suggestions[0].text.as_str(), "reply 3");
        prop_assert_eq!(state.suggestion_status, SuggestionStatus::Ready);
    }

    // Invariant 7: rejected commands carry no effects and the caller keeps its state
    #[test]
    fn prop_research_single_slot(first in arb_origin(), second in arb_origin()) {
        let ctx = test_context();
        let state = transition(&started(), &ctx, Event::RequestResearch {
            query: "best sushi nearby".to_string(),
            origin: first,
        }).unwrap().new_state;

        let result = transition(&state, &ctx, Event::RequestResearch {
            query: "another".to_string(),
            origin: second,
        });
        let is_illegal = matches!(result, Err(TransitionError::IllegalState { .. }));
        prop_assert!(is_illegal);
    }
}
