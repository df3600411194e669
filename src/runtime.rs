//! Runtime for live conversation sessions
//!
//! Each session runs in its own task that owns the coordinator state. The
//! manager routes commands to it and hands out broadcast subscriptions.

mod executor;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use executor::{RuntimeOptions, SessionRuntime};
pub use traits::*;

use crate::config::SessionConfig;
use crate::state_machine::{
    transition, ConversationState, Event, ResearchOrigin, SessionContext, SessionSnapshot,
    TransitionError,
};
use crate::suggestions::SuggestionGenerator;
use crate::voice::{VoiceBridge, VoiceChannel, VoiceError};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};

/// Type alias for the production manager with concrete implementations
pub type ProductionManager = SessionManager<DatabaseStorage, VoiceBridge, dyn SuggestionGenerator>;

type CommandReply = oneshot::Sender<Result<SessionSnapshot, TransitionError>>;

/// Messages processed by a session's runtime loop
#[derive(Debug)]
pub enum SessionMessage {
    Event {
        event: Event,
        /// Receives the post-transition snapshot once inline effects finish
        reply: Option<CommandReply>,
    },
    Snapshot(oneshot::Sender<SessionSnapshot>),
}

impl SessionMessage {
    /// Fire-and-forget event
    pub fn event(event: Event) -> Self {
        Self::Event { event, reply: None }
    }
}

/// Events sent to SSE clients
#[derive(Debug, Clone)]
pub enum SseEvent {
    Init { snapshot: SessionSnapshot },
    StateChange { snapshot: SessionSnapshot },
    Error { message: String },
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(String),
    #[error("User not found: {0}")]
    UserNotFound(String),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("Voice channel error: {0}")]
    Voice(#[from] VoiceError),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Session closed")]
    Closed,
}

/// Handle to interact with a running session
#[derive(Clone)]
pub struct SessionHandle {
    pub message_tx: mpsc::Sender<SessionMessage>,
    pub broadcast_tx: broadcast::Sender<SseEvent>,
}

/// Result of a successful start
#[derive(Debug, Clone)]
pub struct StartedSession {
    pub session_id: String,
    pub snapshot: SessionSnapshot,
    /// Provider settings for the browser
    pub voice: serde_json::Value,
}

/// Manager for all live sessions
pub struct SessionManager<S, V: ?Sized, G: ?Sized>
where
    S: Storage + Clone + 'static,
    V: VoiceChannel + 'static,
    G: SuggestionGenerator + 'static,
{
    storage: S,
    voice: Arc<V>,
    generator: Arc<G>,
    config: SessionConfig,
    sessions: Arc<RwLock<HashMap<String, SessionHandle>>>,
}

impl<S, V, G> SessionManager<S, V, G>
where
    S: Storage + Clone + 'static,
    V: VoiceChannel + ?Sized + 'static,
    G: SuggestionGenerator + ?Sized + 'static,
{
    pub fn new(storage: S, voice: Arc<V>, generator: Arc<G>, config: SessionConfig) -> Self {
        Self {
            storage,
            voice,
            generator,
            config,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start a session for `user_id`.
    ///
    /// Nothing is kept if the voice precondition fails or the provider
    /// cannot be reached.
    pub async fn start(&self, user_id: &str) -> Result<StartedSession, SessionError> {
        let profile = self
            .storage
            .get_profile(user_id)
            .await
            .map_err(SessionError::Storage)?
            .ok_or_else(|| SessionError::UserNotFound(user_id.to_string()))?;

        let session_id = uuid::Uuid::new_v4().to_string();
        let context = SessionContext::new(&session_id, user_id)
            .with_speech_timeout(self.config.speech_timeout)
            .with_context_entries(self.config.context_entries);

        let voice_profile = profile.voice_profile();
        let started = transition(
            &ConversationState::default(),
            &context,
            Event::Start {
                voice_id: voice_profile.as_ref().map(|p| p.voice_id.clone()),
            },
        )?;
        let voice_profile = voice_profile.ok_or(TransitionError::Precondition)?;

        let voice_session = self.voice.connect(&session_id, &voice_profile).await?;

        let (message_tx, message_rx) = mpsc::channel(64);
        let (broadcast_tx, _) = broadcast::channel(128);
        let snapshot = started.new_state.snapshot();

        let runtime = SessionRuntime::new(
            context,
            started.new_state,
            self.storage.clone(),
            self.voice.clone(),
            self.generator.clone(),
            RuntimeOptions {
                style: profile.style_hint(),
                retry: self.config.retry,
                flush_timeout: self.config.flush_timeout,
            },
            message_rx,
            message_tx.clone(),
            broadcast_tx.clone(),
        )
        .with_voice_events(voice_session.events);

        self.sessions.write().await.insert(
            session_id.clone(),
            SessionHandle {
                message_tx,
                broadcast_tx,
            },
        );

        let sessions = self.sessions.clone();
        let id = session_id.clone();
        tokio::spawn(async move {
            runtime.run(started.effects).await;
            sessions.write().await.remove(&id);
            tracing::info!(session_id = %id, "Session runtime finished");
        });

        tracing::info!(session_id = %session_id, user_id = %user_id, "Session started");

        Ok(StartedSession {
            session_id,
            snapshot,
            voice: voice_session.client_config,
        })
    }

    async fn handle(&self, session_id: &str) -> Result<SessionHandle, SessionError> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
    }

    /// Apply a command and wait for the resulting snapshot
    pub async fn send_command(
        &self,
        session_id: &str,
        event: Event,
    ) -> Result<SessionSnapshot, SessionError> {
        let handle = self.handle(session_id).await?;
        let (reply_tx, reply_rx) = oneshot::channel();
        handle
            .message_tx
            .send(SessionMessage::Event {
                event,
                reply: Some(reply_tx),
            })
            .await
            .map_err(|_| SessionError::Closed)?;
        let result = reply_rx.await.map_err(|_| SessionError::Closed)?;
        Ok(result?)
    }

    pub async fn snapshot(&self, session_id: &str) -> Result<SessionSnapshot, SessionError> {
        let handle = self.handle(session_id).await?;
        let (reply_tx, reply_rx) = oneshot::channel();
        handle
            .message_tx
            .send(SessionMessage::Snapshot(reply_tx))
            .await
            .map_err(|_| SessionError::Closed)?;
        reply_rx.await.map_err(|_| SessionError::Closed)
    }

    /// Subscribe to session updates, along with the current snapshot
    pub async fn subscribe(
        &self,
        session_id: &str,
    ) -> Result<(SessionSnapshot, broadcast::Receiver<SseEvent>), SessionError> {
        let handle = self.handle(session_id).await?;
        // Subscribe first so nothing is missed between the snapshot and the stream
        let rx = handle.broadcast_tx.subscribe();
        let snapshot = self.snapshot(session_id).await?;
        Ok((snapshot, rx))
    }

    pub async fn select_suggestion(
        &self,
        session_id: &str,
        id: &str,
    ) -> Result<SessionSnapshot, SessionError> {
        self.send_command(session_id, Event::SelectSuggestion { id: id.to_string() })
            .await
    }

    pub async fn submit_custom_text(
        &self,
        session_id: &str,
        text: &str,
    ) -> Result<SessionSnapshot, SessionError> {
        self.send_command(
            session_id,
            Event::SubmitCustomText {
                text: text.to_string(),
            },
        )
        .await
    }

    pub async fn request_regeneration(
        &self,
        session_id: &str,
    ) -> Result<SessionSnapshot, SessionError> {
        self.send_command(session_id, Event::RequestRegeneration).await
    }

    pub async fn request_research(
        &self,
        session_id: &str,
        query: &str,
    ) -> Result<SessionSnapshot, SessionError> {
        self.send_command(
            session_id,
            Event::RequestResearch {
                query: query.to_string(),
                origin: ResearchOrigin::User,
            },
        )
        .await
    }

    pub async fn complete_research(
        &self,
        session_id: &str,
        result: &str,
    ) -> Result<SessionSnapshot, SessionError> {
        self.send_command(
            session_id,
            Event::CompleteResearch {
                result: result.to_string(),
                at: Utc::now(),
            },
        )
        .await
    }

    pub async fn cancel_research(&self, session_id: &str) -> Result<SessionSnapshot, SessionError> {
        self.send_command(session_id, Event::CancelResearch).await
    }

    /// End the session; returns once the transcript flush has settled
    pub async fn end(&self, session_id: &str) -> Result<SessionSnapshot, SessionError> {
        self.send_command(session_id, Event::End).await
    }

    /// Number of live sessions
    #[allow(dead_code)]
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
