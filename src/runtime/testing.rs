//! Mock implementations for testing
//!
//! These mocks enable integration testing of the session runtime without real I/O.

use super::traits::*;
use super::{SessionManager, SseEvent};
use crate::config::SessionConfig;
use crate::db::{Preferences, UserProfile};
use crate::state_machine::{
    ReplySelection, ResearchOutcome, SessionSnapshot, Suggestion, TranscriptEntry,
};
use crate::suggestions::{GenerationError, StyleHint, SuggestionGenerator};
use crate::voice::{VoiceChannel, VoiceError, VoiceEvent, VoiceProfile, VoiceSession};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

/// A user with or without a cloned voice
pub fn test_profile(auth_id: &str, voice_id: Option<&str>) -> UserProfile {
    let now = Utc::now();
    UserProfile {
        auth_id: auth_id.to_string(),
        email: None,
        name: Some("Sam".to_string()),
        voice_id: voice_id.map(String::from),
        voice_created_at: voice_id.map(|_| now),
        communication_style: None,
        memories: vec![],
        preferences: Preferences::default(),
        created_at: now,
        updated_at: now,
    }
}

// ============================================================================
// Mock Storage
// ============================================================================

/// In-memory storage with optional slow or failing transcript writes
#[derive(Default)]
pub struct MockStorage {
    profiles: Mutex<HashMap<String, UserProfile>>,
    pub transcripts: Mutex<Vec<(String, String, Vec<TranscriptEntry>)>>,
    pub selections: Mutex<Vec<(String, String, ReplySelection)>>,
    flush_delay: Mutex<Option<Duration>>,
    fail_flush: AtomicBool,
}

impl MockStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(self, profile: UserProfile) -> Self {
        self.profiles
            .lock()
            .unwrap()
            .insert(profile.auth_id.clone(), profile);
        self
    }

    pub fn set_flush_delay(&self, delay: Duration) {
        *self.flush_delay.lock().unwrap() = Some(delay);
    }

    pub fn set_fail_flush(&self, fail: bool) {
        self.fail_flush.store(fail, Ordering::SeqCst);
    }

    pub fn saved_transcripts(&self) -> Vec<(String, String, Vec<TranscriptEntry>)> {
        self.transcripts.lock().unwrap().clone()
    }

    pub fn recorded_selections(&self) -> Vec<ReplySelection> {
        self.selections
            .lock()
            .unwrap()
            .iter()
            .map(|(_, _, s)| s.clone())
            .collect()
    }
}

#[async_trait]
impl ProfileStore for MockStorage {
    async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>, String> {
        Ok(self.profiles.lock().unwrap().get(user_id).cloned())
    }
}

#[async_trait]
impl TranscriptStore for MockStorage {
    async fn save_transcript(
        &self,
        user_id: &str,
        session_id: &str,
        entries: &[TranscriptEntry],
    ) -> Result<(), String> {
        let delay = *self.flush_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_flush.load(Ordering::SeqCst) {
            return Err("disk full".to_string());
        }
        self.transcripts.lock().unwrap().push((
            user_id.to_string(),
            session_id.to_string(),
            entries.to_vec(),
        ));
        Ok(())
    }
}

#[async_trait]
impl AnalyticsStore for MockStorage {
    async fn record_selection(
        &self,
        user_id: &str,
        session_id: &str,
        selection: &ReplySelection,
    ) -> Result<(), String> {
        self.selections.lock().unwrap().push((
            user_id.to_string(),
            session_id.to_string(),
            selection.clone(),
        ));
        Ok(())
    }
}

// ============================================================================
// Mock Voice Channel
// ============================================================================

/// Calls made on the voice channel, in order
#[derive(Debug, Clone, PartialEq)]
pub enum VoiceCall {
    Connect { voice_id: String },
    Disconnect,
    SendUtterance(String),
    SetMuted(bool),
    Interrupt,
    ResolveResearch {
        call_id: String,
        outcome: ResearchOutcome,
    },
}

/// Voice channel that records calls and lets tests inject provider events
#[derive(Default)]
pub struct MockVoiceChannel {
    calls: Mutex<Vec<VoiceCall>>,
    senders: Mutex<HashMap<String, mpsc::Sender<VoiceEvent>>>,
    fail_connect: AtomicBool,
    fail_send: AtomicBool,
}

impl MockVoiceChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_send(&self, fail: bool) {
        self.fail_send.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<VoiceCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Only the mute toggles, in order
    pub fn mute_calls(&self) -> Vec<bool> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                VoiceCall::SetMuted(muted) => Some(muted),
                _ => None,
            })
            .collect()
    }

    /// Deliver a provider event to a connected session
    pub async fn emit(&self, session_id: &str, event: VoiceEvent) {
        let sender = self.senders.lock().unwrap().get(session_id).cloned();
        sender
            .expect("session not connected")
            .send(event)
            .await
            .expect("runtime stopped listening");
    }

    fn record(&self, call: VoiceCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl VoiceChannel for MockVoiceChannel {
    async fn connect(
        &self,
        session_id: &str,
        profile: &VoiceProfile,
    ) -> Result<VoiceSession, VoiceError> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(VoiceError::connect("provider unreachable"));
        }
        self.record(VoiceCall::Connect {
            voice_id: profile.voice_id.clone(),
        });
        let (tx, rx) = mpsc::channel(16);
        self.senders
            .lock()
            .unwrap()
            .insert(session_id.to_string(), tx);
        Ok(VoiceSession {
            events: rx,
            client_config: serde_json::json!({ "voice_id": profile.voice_id }),
        })
    }

    async fn disconnect(&self, session_id: &str) -> Result<(), VoiceError> {
        self.senders.lock().unwrap().remove(session_id);
        self.record(VoiceCall::Disconnect);
        Ok(())
    }

    async fn send_utterance(&self, _session_id: &str, text: &str) -> Result<(), VoiceError> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(VoiceError::transport("socket closed"));
        }
        self.record(VoiceCall::SendUtterance(text.to_string()));
        Ok(())
    }

    async fn set_output_muted(&self, _session_id: &str, muted: bool) -> Result<(), VoiceError> {
        self.record(VoiceCall::SetMuted(muted));
        Ok(())
    }

    async fn interrupt_output(&self, _session_id: &str) -> Result<(), VoiceError> {
        self.record(VoiceCall::Interrupt);
        Ok(())
    }

    async fn resolve_research(
        &self,
        _session_id: &str,
        call_id: &str,
        outcome: &ResearchOutcome,
    ) -> Result<(), VoiceError> {
        self.record(VoiceCall::ResolveResearch {
            call_id: call_id.to_string(),
            outcome: outcome.clone(),
        });
        Ok(())
    }
}

// ============================================================================
// Mock Suggestion Generator
// ============================================================================

type Scripted = (Duration, Result<Vec<Suggestion>, GenerationError>);

/// Generator that returns queued batches, optionally after a delay
#[derive(Default)]
pub struct MockSuggestionGenerator {
    queue: Mutex<VecDeque<Scripted>>,
    /// Tails passed to each request
    pub requests: Mutex<Vec<Vec<TranscriptEntry>>>,
}

impl MockSuggestionGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(&self, suggestions: Vec<Suggestion>) {
        self.queue_delayed(Duration::ZERO, Ok(suggestions));
    }

    pub fn queue_error(&self, error: GenerationError) {
        self.queue_delayed(Duration::ZERO, Err(error));
    }

    pub fn queue_delayed(
        &self,
        delay: Duration,
        result: Result<Vec<Suggestion>, GenerationError>,
    ) {
        self.queue.lock().unwrap().push_back((delay, result));
    }

    pub fn recorded_requests(&self) -> Vec<Vec<TranscriptEntry>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl SuggestionGenerator for MockSuggestionGenerator {
    async fn generate(
        &self,
        tail: &[TranscriptEntry],
        _style: &StyleHint,
    ) -> Result<Vec<Suggestion>, GenerationError> {
        self.requests.lock().unwrap().push(tail.to_vec());
        let scripted = self.queue.lock().unwrap().pop_front();
        let (delay, result) =
            scripted.unwrap_or_else(|| (Duration::ZERO, Ok(default_suggestions())));
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        result
    }
}

pub fn default_suggestions() -> Vec<Suggestion> {
    vec![
        Suggestion::new("1", "Yes, starving", "affirmative"),
        Suggestion::new("2", "What did you have in mind?", "question"),
        Suggestion::new("3", "I ate an hour ago", "informational"),
    ]
}

// ============================================================================
// Test Session Harness
// ============================================================================

pub type TestManager = SessionManager<Arc<MockStorage>, MockVoiceChannel, MockSuggestionGenerator>;

/// A manager wired to mocks, with one user who has a cloned voice
pub struct TestHarness {
    pub manager: Arc<TestManager>,
    pub storage: Arc<MockStorage>,
    pub voice: Arc<MockVoiceChannel>,
    pub generator: Arc<MockSuggestionGenerator>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(SessionConfig::default())
    }

    pub fn with_config(config: SessionConfig) -> Self {
        let storage = Arc::new(
            MockStorage::new()
                .with_profile(test_profile("user-1", Some("voice-123")))
                .with_profile(test_profile("no-voice", None)),
        );
        let voice = Arc::new(MockVoiceChannel::new());
        let generator = Arc::new(MockSuggestionGenerator::new());
        let manager = Arc::new(SessionManager::new(
            storage.clone(),
            voice.clone(),
            generator.clone(),
            config,
        ));
        Self {
            manager,
            storage,
            voice,
            generator,
        }
    }

    /// Start a session for the voiced user and subscribe to it
    pub async fn start(&self) -> TestSession {
        let started = self.manager.start("user-1").await.unwrap();
        let (_, events) = self.manager.subscribe(&started.session_id).await.unwrap();
        TestSession {
            id: started.session_id,
            manager: self.manager.clone(),
            events,
        }
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

pub struct TestSession {
    pub id: String,
    manager: Arc<TestManager>,
    events: broadcast::Receiver<SseEvent>,
}

impl TestSession {
    pub async fn snapshot(&self) -> SessionSnapshot {
        self.manager.snapshot(&self.id).await.unwrap()
    }

    /// Poll until `predicate` holds, returning the matching snapshot
    pub async fn wait_for<F>(&self, timeout: Duration, predicate: F) -> Option<SessionSnapshot>
    where
        F: Fn(&SessionSnapshot) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            let snapshot = self.snapshot().await;
            if predicate(&snapshot) {
                return Some(snapshot);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        None
    }

    /// Wait for the next broadcast error
    pub async fn wait_for_error(&mut self, timeout: Duration) -> Option<String> {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            match tokio::time::timeout(Duration::from_millis(50), self.events.recv()).await {
                Ok(Ok(SseEvent::Error { message })) => return Some(message),
                Ok(Err(broadcast::error::RecvError::Closed)) => return None,
                _ => continue,
            }
        }
        None
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::SessionError;
    use crate::state_machine::{Role, Status, SuggestionStatus, TransitionError};

    const WAIT: Duration = Duration::from_secs(2);

    async fn partner_says(h: &TestHarness, s: &TestSession, text: &str) {
        h.voice
            .emit(
                &s.id,
                VoiceEvent::PartnerUtterance {
                    text: text.to_string(),
                },
            )
            .await;
    }

    async fn ready_session(h: &TestHarness) -> TestSession {
        let s = h.start().await;
        partner_says(h, &s, "Are you hungry?").await;
        s.wait_for(WAIT, |snap| snap.suggestion_status == SuggestionStatus::Ready)
            .await
            .expect("suggestions never arrived");
        s
    }

    #[tokio::test]
    async fn test_start_connects_muted() {
        let h = TestHarness::new();
        let started = h.manager.start("user-1").await.unwrap();

        assert_eq!(started.snapshot.status, Status::Connected);
        assert!(started.snapshot.mute);
        assert!(started.snapshot.transcript.is_empty());
        assert_eq!(started.voice["voice_id"], "voice-123");

        let s = h.start().await;
        s.wait_for(WAIT, |_| h.voice.mute_calls().contains(&true))
            .await
            .expect("output never muted");
        assert_eq!(
            h.voice.calls().first(),
            Some(&VoiceCall::Connect {
                voice_id: "voice-123".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_start_without_voice_is_precondition_error() {
        let h = TestHarness::new();
        let err = h.manager.start("no-voice").await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Transition(TransitionError::Precondition)
        ));
        assert!(h.voice.calls().is_empty());
        assert_eq!(h.manager.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_start_unknown_user() {
        let h = TestHarness::new();
        let err = h.manager.start("ghost").await.unwrap_err();
        assert!(matches!(err, SessionError::UserNotFound(_)));
    }

    #[tokio::test]
    async fn test_failed_connect_keeps_no_session() {
        let h = TestHarness::new();
        h.voice.set_fail_connect(true);
        let err = h.manager.start("user-1").await.unwrap_err();
        assert!(matches!(err, SessionError::Voice(_)));
        assert_eq!(h.manager.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_partner_utterance_requests_suggestions() {
        let h = TestHarness::new();
        let s = ready_session(&h).await;

        let snap = s.snapshot().await;
        assert_eq!(snap.transcript.len(), 1);
        assert_eq!(snap.transcript[0].role, Role::Partner);
        assert_eq!(snap.suggestions, default_suggestions());

        let requests = h.generator.recorded_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0][0].text, "Are you hungry?");
    }

    #[tokio::test]
    async fn test_select_then_speech_end() {
        let h = TestHarness::new();
        let s = ready_session(&h).await;

        let snap = h.manager.select_suggestion(&s.id, "1").await.unwrap();
        assert_eq!(snap.status, Status::Speaking);
        assert!(!snap.mute);
        assert_eq!(snap.pending_utterance.as_deref(), Some("Yes, starving"));
        assert!(snap.suggestions.is_empty());

        h.voice.emit(&s.id, VoiceEvent::AgentSpeechStarted).await;
        h.voice.emit(&s.id, VoiceEvent::AgentSpeechEnded).await;
        let snap = s
            .wait_for(WAIT, |snap| snap.status == Status::Connected)
            .await
            .expect("speech never ended");
        assert!(snap.mute);
        assert!(snap.pending_utterance.is_none());
        let last = snap.transcript.last().unwrap();
        assert_eq!(last.role, Role::User);
        assert_eq!(last.text, "Yes, starving");

        // Unmute strictly before the utterance, re-mute after
        let calls = h.voice.calls();
        let unmute = calls.iter().position(|c| *c == VoiceCall::SetMuted(false));
        let speak = calls
            .iter()
            .position(|c| *c == VoiceCall::SendUtterance("Yes, starving".to_string()));
        assert!(unmute.is_some() && speak.is_some() && unmute < speak);
        s.wait_for(WAIT, |_| h.voice.mute_calls() == vec![true, false, true])
            .await
            .expect("output not re-muted exactly once");

        let selections = h.storage.recorded_selections();
        assert_eq!(selections.len(), 1);
        assert_eq!(selections[0].category, "affirmative");
        assert_eq!(selections[0].all_options.len(), 3);
    }

    #[tokio::test]
    async fn test_research_rejects_second_request() {
        let h = TestHarness::new();
        let s = h.start().await;

        let snap = h
            .manager
            .request_research(&s.id, "best sushi nearby")
            .await
            .unwrap();
        assert_eq!(snap.status, Status::AwaitingResearch);
        assert_eq!(snap.research_query.as_deref(), Some("best sushi nearby"));

        let err = h
            .manager
            .request_research(&s.id, "ramen")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::Transition(TransitionError::IllegalState { .. })
        ));
        assert_eq!(s.snapshot().await, snap);
    }

    #[tokio::test]
    async fn test_speech_timeout_forces_completion() {
        let h = TestHarness::with_config(SessionConfig {
            speech_timeout: Duration::from_millis(100),
            ..SessionConfig::default()
        });
        let s = ready_session(&h).await;

        h.manager.submit_custom_text(&s.id, "Not really").await.unwrap();
        let snap = s
            .wait_for(WAIT, |snap| snap.status == Status::Connected)
            .await
            .expect("timer never fired");
        assert!(snap.mute);
        assert!(snap.pending_utterance.is_none());
        assert_eq!(snap.transcript.last().unwrap().text, "Not really");

        // A late genuine end is a no-op
        h.voice.emit(&s.id, VoiceEvent::AgentSpeechEnded).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(s.snapshot().await, snap);
        assert_eq!(h.voice.mute_calls(), vec![true, false, true]);
    }

    #[tokio::test]
    async fn test_stale_suggestions_dropped() {
        let h = TestHarness::new();
        let s = h.start().await;
        let fresh = vec![Suggestion::new("9", "Sure", "affirmative")];
        h.generator.queue_delayed(
            Duration::from_millis(200),
            Ok(vec![Suggestion::new("1", "Old news", "general")]),
        );
        h.generator.queue(fresh.clone());

        partner_says(&h, &s, "Coffee?").await;
        s.wait_for(WAIT, |_| h.generator.recorded_requests().len() == 1)
            .await
            .unwrap();
        let snap = h.manager.request_regeneration(&s.id).await.unwrap();
        assert_eq!(snap.epoch, 2);

        s.wait_for(WAIT, |snap| snap.suggestion_status == SuggestionStatus::Ready)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(s.snapshot().await.suggestions, fresh);
    }

    #[tokio::test]
    async fn test_overlapping_generations_keep_newest_batch() {
        let h = TestHarness::new();
        let s = h.start().await;
        h.generator.queue_delayed(
            Duration::from_millis(200),
            Ok(vec![Suggestion::new("1", "Yes, starving", "affirmative")]),
        );
        let fresh = vec![Suggestion::new("1", "Sushi sounds great", "affirmative")];
        h.generator.queue(fresh.clone());

        partner_says(&h, &s, "Are you hungry?").await;
        s.wait_for(WAIT, |_| h.generator.recorded_requests().len() == 1)
            .await
            .unwrap();
        partner_says(&h, &s, "Want sushi?").await;

        s.wait_for(WAIT, |snap| snap.suggestion_status == SuggestionStatus::Ready)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        let snap = s.snapshot().await;
        assert_eq!(snap.suggestions, fresh);
        assert_eq!(snap.transcript.len(), 2);
    }

    #[tokio::test]
    async fn test_agent_offered_replies_are_shown() {
        let h = TestHarness::new();
        let s = ready_session(&h).await;
        let offered = vec![
            Suggestion::new("1", "Starving, let's go", "affirmative"),
            Suggestion::new("2", "Give me ten minutes", "informational"),
        ];

        h.voice
            .emit(
                &s.id,
                VoiceEvent::RepliesOffered {
                    suggestions: offered.clone(),
                },
            )
            .await;
        let snap = s
            .wait_for(WAIT, |snap| snap.suggestions == offered)
            .await
            .expect("offered replies never shown");
        assert_eq!(snap.suggestion_status, SuggestionStatus::Ready);

        let snap = h.manager.select_suggestion(&s.id, "2").await.unwrap();
        assert_eq!(snap.pending_utterance.as_deref(), Some("Give me ten minutes"));
    }

    #[tokio::test]
    async fn test_generation_failure_marks_unavailable() {
        let h = TestHarness::new();
        let s = h.start().await;
        h.generator
            .queue_error(GenerationError::Parse("not json".to_string()));

        partner_says(&h, &s, "Hello?").await;
        let snap = s
            .wait_for(WAIT, |snap| {
                snap.suggestion_status == SuggestionStatus::Unavailable
            })
            .await
            .expect("failure never surfaced");
        assert!(snap.suggestions.is_empty());
        assert_eq!(snap.status, Status::Connected);
    }

    #[tokio::test]
    async fn test_utterance_failure_returns_to_connected() {
        let h = TestHarness::new();
        let mut s = ready_session(&h).await;
        h.voice.set_fail_send(true);

        h.manager.select_suggestion(&s.id, "2").await.unwrap();
        let snap = s
            .wait_for(WAIT, |snap| snap.status == Status::Connected)
            .await
            .expect("failure never processed");
        assert!(snap.mute);
        // Nothing was said
        assert_eq!(snap.transcript.len(), 1);
        let message = s.wait_for_error(WAIT).await.unwrap();
        assert!(message.contains("socket closed"));
    }

    #[tokio::test]
    async fn test_agent_research_resolved_on_complete() {
        let h = TestHarness::new();
        let s = h.start().await;

        h.voice
            .emit(
                &s.id,
                VoiceEvent::ResearchRequested {
                    call_id: "call-1".to_string(),
                    query: "weather".to_string(),
                },
            )
            .await;
        s.wait_for(WAIT, |snap| snap.status == Status::AwaitingResearch)
            .await
            .unwrap();

        let snap = h
            .manager
            .complete_research(&s.id, "Sunny, 24C")
            .await
            .unwrap();
        assert_eq!(snap.status, Status::Connected);
        let note = snap.transcript.last().unwrap();
        assert_eq!(note.role, Role::System);
        assert_eq!(note.text, "Research: Sunny, 24C");

        s.wait_for(WAIT, |_| {
            h.voice.calls().contains(&VoiceCall::ResolveResearch {
                call_id: "call-1".to_string(),
                outcome: ResearchOutcome::Completed {
                    result: "Sunny, 24C".to_string(),
                },
            })
        })
        .await
        .expect("agent never answered");
        // Never spoken directly
        assert!(!h
            .voice
            .calls()
            .iter()
            .any(|c| matches!(c, VoiceCall::SendUtterance(_))));
    }

    #[tokio::test]
    async fn test_rejected_agent_research_is_cancelled() {
        let h = TestHarness::new();
        let s = h.start().await;
        h.manager.request_research(&s.id, "sushi").await.unwrap();

        h.voice
            .emit(
                &s.id,
                VoiceEvent::ResearchRequested {
                    call_id: "call-2".to_string(),
                    query: "ramen".to_string(),
                },
            )
            .await;
        s.wait_for(WAIT, |_| {
            h.voice.calls().contains(&VoiceCall::ResolveResearch {
                call_id: "call-2".to_string(),
                outcome: ResearchOutcome::Cancelled,
            })
        })
        .await
        .expect("rejected call never answered");
        assert_eq!(s.snapshot().await.research_query.as_deref(), Some("sushi"));
    }

    #[tokio::test]
    async fn test_end_flushes_and_disconnects() {
        let h = TestHarness::new();
        let s = ready_session(&h).await;
        h.manager.select_suggestion(&s.id, "1").await.unwrap();

        let snap = h.manager.end(&s.id).await.unwrap();
        assert_eq!(snap.status, Status::Idle);
        assert!(snap.transcript.is_empty());

        let saved = h.storage.saved_transcripts();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].0, "user-1");
        assert_eq!(saved[0].1, s.id);
        assert_eq!(saved[0].2.len(), 1);

        let calls = h.voice.calls();
        let interrupt = calls.iter().position(|c| *c == VoiceCall::Interrupt);
        let disconnect = calls.iter().position(|c| *c == VoiceCall::Disconnect);
        assert!(interrupt.is_some() && interrupt < disconnect);

        // The runtime removes itself once idle
        let deadline = tokio::time::Instant::now() + WAIT;
        while h.manager.session_count().await > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(matches!(
            h.manager.snapshot(&s.id).await,
            Err(SessionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_end_with_empty_transcript_skips_flush() {
        let h = TestHarness::new();
        let s = h.start().await;
        h.manager.end(&s.id).await.unwrap();
        assert!(h.storage.saved_transcripts().is_empty());
    }

    #[tokio::test]
    async fn test_slow_flush_times_out_but_session_ends() {
        let h = TestHarness::with_config(SessionConfig {
            flush_timeout: Duration::from_millis(50),
            ..SessionConfig::default()
        });
        h.storage.set_flush_delay(Duration::from_millis(500));
        let mut s = ready_session(&h).await;

        let snap = h.manager.end(&s.id).await.unwrap();
        assert_eq!(snap.status, Status::Idle);
        assert!(h.storage.saved_transcripts().is_empty());
        let message = s.wait_for_error(WAIT).await.unwrap();
        assert!(message.contains("timed out"));
        assert!(h.voice.calls().contains(&VoiceCall::Disconnect));
    }

    #[tokio::test]
    async fn test_failed_flush_is_reported() {
        let h = TestHarness::new();
        h.storage.set_fail_flush(true);
        let mut s = ready_session(&h).await;

        h.manager.end(&s.id).await.unwrap();
        let message = s.wait_for_error(WAIT).await.unwrap();
        assert!(message.contains("disk full"));
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let h = TestHarness::new();
        let err = h.manager.end("nope").await.unwrap_err();
        assert!(matches!(err, SessionError::NotFound(_)));
    }
}
