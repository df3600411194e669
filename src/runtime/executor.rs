//! Session runtime executor
//!
//! Owns one session's [`ConversationState`]. Commands, voice events,
//! generation results and timers all arrive on one queue, so transitions are
//! applied one at a time.

use super::traits::Storage;
use super::{SessionMessage, SseEvent};
use crate::state_machine::{
    transition, ConversationState, Effect, Event, ReplySelection, ResearchOrigin,
    ResearchOutcome, SessionContext, SessionSnapshot, Status, TranscriptEntry, TransitionError,
};
use crate::suggestions::{generate_with_retry, RetryPolicy, StyleHint, SuggestionGenerator};
use crate::voice::{VoiceChannel, VoiceEvent};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Per-session tuning
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub style: StyleHint,
    pub retry: RetryPolicy,
    pub flush_timeout: Duration,
}

/// Voice calls, applied strictly in order by the session's voice worker
#[derive(Debug)]
enum VoiceCommand {
    SetMuted(bool),
    Speak { epoch: u64, text: String },
    Interrupt,
    ResolveResearch {
        call_id: String,
        outcome: ResearchOutcome,
    },
}

/// Generic session runtime that can work with any storage, voice and generator implementations
pub struct SessionRuntime<S, V: ?Sized, G: ?Sized>
where
    S: Storage + Clone + 'static,
    V: VoiceChannel + 'static,
    G: SuggestionGenerator + 'static,
{
    context: SessionContext,
    state: ConversationState,
    storage: S,
    voice: Arc<V>,
    generator: Arc<G>,
    options: RuntimeOptions,
    rx: mpsc::Receiver<SessionMessage>,
    /// Feeds results of spawned work back into the queue
    tx: mpsc::Sender<SessionMessage>,
    broadcast_tx: broadcast::Sender<SseEvent>,
    voice_events: Option<mpsc::Receiver<VoiceEvent>>,
    voice_worker: Option<(mpsc::UnboundedSender<VoiceCommand>, JoinHandle<()>)>,
    /// Token to cancel the armed speech fallback timer
    speech_timer: Option<CancellationToken>,
}

impl<S, V, G> SessionRuntime<S, V, G>
where
    S: Storage + Clone + 'static,
    V: VoiceChannel + ?Sized + 'static,
    G: SuggestionGenerator + ?Sized + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        context: SessionContext,
        state: ConversationState,
        storage: S,
        voice: Arc<V>,
        generator: Arc<G>,
        options: RuntimeOptions,
        rx: mpsc::Receiver<SessionMessage>,
        tx: mpsc::Sender<SessionMessage>,
        broadcast_tx: broadcast::Sender<SseEvent>,
    ) -> Self {
        Self {
            context,
            state,
            storage,
            voice,
            generator,
            options,
            rx,
            tx,
            broadcast_tx,
            voice_events: None,
            voice_worker: None,
            speech_timer: None,
        }
    }

    /// Pump this stream of provider events into the queue
    pub fn with_voice_events(mut self, events: mpsc::Receiver<VoiceEvent>) -> Self {
        self.voice_events = Some(events);
        self
    }

    /// Execute `initial_effects`, then process messages until the session ends
    pub async fn run(mut self, initial_effects: Vec<Effect>) {
        tracing::info!(session_id = %self.context.session_id, "Starting session runtime");

        self.voice_worker = Some(self.spawn_voice_worker());
        for effect in initial_effects {
            self.execute_effect(effect).await;
        }

        // Process events in a loop until the session returns to idle
        while self.state.status() != Status::Idle {
            tokio::select! {
                msg = self.rx.recv() => {
                    let Some(msg) = msg else { break };
                    self.handle_message(msg).await;
                }
                voice_event = next_voice_event(&mut self.voice_events) => {
                    if let Some(voice_event) = voice_event {
                        // Rejections are already logged and broadcast
                        let _ = self.process_event(voice_event.into_event(Utc::now())).await;
                    } else {
                        tracing::warn!(session_id = %self.context.session_id, "Voice event stream closed");
                        self.voice_events = None;
                    }
                }
            }
        }

        self.shutdown().await;
        tracing::info!(session_id = %self.context.session_id, "Session runtime stopped");
    }

    async fn handle_message(&mut self, msg: SessionMessage) {
        match msg {
            SessionMessage::Event { event, reply } => {
                let result = self.process_event(event).await;
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            SessionMessage::Snapshot(reply) => {
                let _ = reply.send(self.state.snapshot());
            }
        }
    }

    async fn process_event(&mut self, event: Event) -> Result<SessionSnapshot, TransitionError> {
        let name = event.name();
        let agent_call = match &event {
            Event::RequestResearch {
                origin: ResearchOrigin::Agent { call_id },
                ..
            } => Some(call_id.clone()),
            _ => None,
        };

        // Pure state transition
        let result = match transition(&self.state, &self.context, event) {
            Ok(r) => r,
            Err(e) => {
                tracing::info!(
                    session_id = %self.context.session_id,
                    event = name,
                    status = %self.state.status(),
                    error = %e,
                    "Event rejected"
                );
                // The agent is blocked on its tool call until it gets an answer
                if let Some(call_id) = agent_call {
                    self.send_voice(VoiceCommand::ResolveResearch {
                        call_id,
                        outcome: ResearchOutcome::Cancelled,
                    });
                }
                let _ = self.broadcast_tx.send(SseEvent::Error {
                    message: e.to_string(),
                });
                return Err(e);
            }
        };

        let old_state = std::mem::replace(&mut self.state, result.new_state);
        if old_state.status() == self.state.status() {
            tracing::debug!(session_id = %self.context.session_id, event = name, "Event applied");
        } else {
            tracing::info!(
                session_id = %self.context.session_id,
                event = name,
                from = %old_state.status(),
                to = %self.state.status(),
                epoch = self.state.epoch,
                "Status changed"
            );
        }

        for effect in result.effects {
            self.execute_effect(effect).await;
        }

        let snapshot = self.state.snapshot();
        if old_state != self.state {
            let _ = self.broadcast_tx.send(SseEvent::StateChange {
                snapshot: snapshot.clone(),
            });
        }
        Ok(snapshot)
    }

    /// Execute an effect. Everything except the transcript flush and the final
    /// disconnect is handed off so the queue keeps moving.
    async fn execute_effect(&mut self, effect: Effect) {
        match effect {
            Effect::SetOutputMuted { muted } => self.send_voice(VoiceCommand::SetMuted(muted)),
            Effect::DispatchUtterance { epoch, text } => {
                self.send_voice(VoiceCommand::Speak { epoch, text });
            }
            Effect::InterruptOutput => self.send_voice(VoiceCommand::Interrupt),
            Effect::ArmSpeechTimeout { epoch, after } => self.arm_speech_timeout(epoch, after),
            Effect::CancelSpeechTimeout => {
                if let Some(timer) = self.speech_timer.take() {
                    timer.cancel();
                }
            }
            Effect::RequestSuggestions { epoch, tail } => self.request_suggestions(epoch, tail),
            Effect::RecordSelection(selection) => self.record_selection(selection),
            Effect::ResolveResearch { call_id, outcome } => {
                self.send_voice(VoiceCommand::ResolveResearch { call_id, outcome });
            }
            Effect::FlushTranscript { entries } => self.flush_transcript(&entries).await,
            Effect::Disconnect => self.disconnect_voice().await,
            Effect::NotifyError { message } => {
                tracing::warn!(session_id = %self.context.session_id, error = %message, "Session error");
                let _ = self.broadcast_tx.send(SseEvent::Error { message });
            }
        }
    }

    fn spawn_voice_worker(&self) -> (mpsc::UnboundedSender<VoiceCommand>, JoinHandle<()>) {
        let (command_tx, mut command_rx) = mpsc::unbounded_channel::<VoiceCommand>();
        let voice = self.voice.clone();
        let tx = self.tx.clone();
        let session_id = self.context.session_id.clone();

        let handle = tokio::spawn(async move {
            while let Some(command) = command_rx.recv().await {
                let result = match &command {
                    VoiceCommand::SetMuted(muted) => {
                        voice.set_output_muted(&session_id, *muted).await
                    }
                    VoiceCommand::Speak { text, .. } => voice.send_utterance(&session_id, text).await,
                    VoiceCommand::Interrupt => voice.interrupt_output(&session_id).await,
                    VoiceCommand::ResolveResearch { call_id, outcome } => {
                        voice.resolve_research(&session_id, call_id, outcome).await
                    }
                };

                let Err(e) = result else { continue };
                tracing::warn!(session_id = %session_id, kind = %e.kind, error = %e, "Voice command failed");
                if let VoiceCommand::Speak { epoch, .. } = command {
                    // Never block the worker on the queue; the loop may be draining us
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        let _ = tx
                            .send(SessionMessage::event(Event::UtteranceFailed {
                                epoch,
                                message: e.message,
                            }))
                            .await;
                    });
                }
            }
        });

        (command_tx, handle)
    }

    fn send_voice(&self, command: VoiceCommand) {
        let sent = self
            .voice_worker
            .as_ref()
            .is_some_and(|(worker, _)| worker.send(command).is_ok());
        if !sent {
            tracing::warn!(session_id = %self.context.session_id, "Voice worker stopped, dropping command");
        }
    }

    fn arm_speech_timeout(&mut self, epoch: u64, after: Duration) {
        if let Some(previous) = self.speech_timer.take() {
            previous.cancel();
        }
        let token = CancellationToken::new();
        self.speech_timer = Some(token.clone());

        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(after) => {
                    let _ = tx
                        .send(SessionMessage::event(Event::SpeechTimeout { epoch, at: Utc::now() }))
                        .await;
                }
            }
        });
    }

    fn request_suggestions(&self, epoch: u64, tail: Vec<TranscriptEntry>) {
        let generator = self.generator.clone();
        let style = self.options.style.clone();
        let retry = self.options.retry;
        let tx = self.tx.clone();
        let session_id = self.context.session_id.clone();

        tokio::spawn(async move {
            let event = match generate_with_retry(&*generator, &tail, &style, retry).await {
                Ok(suggestions) => {
                    tracing::debug!(session_id = %session_id, epoch, count = suggestions.len(), "Suggestions generated");
                    Event::SuggestionsReady { epoch, suggestions }
                }
                Err(e) => {
                    tracing::warn!(session_id = %session_id, epoch, error = %e, "Suggestion generation failed");
                    Event::SuggestionsFailed {
                        epoch,
                        message: e.to_string(),
                    }
                }
            };
            let _ = tx.send(SessionMessage::event(event)).await;
        });
    }

    fn record_selection(&self, selection: ReplySelection) {
        let storage = self.storage.clone();
        let user_id = self.context.user_id.clone();
        let session_id = self.context.session_id.clone();

        tokio::spawn(async move {
            if let Err(e) = storage
                .record_selection(&user_id, &session_id, &selection)
                .await
            {
                tracing::warn!(session_id = %session_id, error = %e, "Failed to record reply selection");
            }
        });
    }

    async fn flush_transcript(&self, entries: &[TranscriptEntry]) {
        let save =
            self.storage
                .save_transcript(&self.context.user_id, &self.context.session_id, entries);

        let message = match tokio::time::timeout(self.options.flush_timeout, save).await {
            Ok(Ok(())) => {
                tracing::info!(session_id = %self.context.session_id, entries = entries.len(), "Transcript saved");
                return;
            }
            Ok(Err(e)) => {
                tracing::error!(session_id = %self.context.session_id, error = %e, "Failed to save transcript");
                format!("Failed to save transcript: {e}")
            }
            Err(_) => {
                tracing::error!(
                    session_id = %self.context.session_id,
                    timeout_ms = %self.options.flush_timeout.as_millis(),
                    "Transcript save timed out"
                );
                "Saving the transcript timed out".to_string()
            }
        };
        let _ = self.broadcast_tx.send(SseEvent::Error { message });
    }

    /// Drain queued voice commands, then close the voice session
    async fn disconnect_voice(&mut self) {
        self.stop_voice_worker().await;
        if let Err(e) = self.voice.disconnect(&self.context.session_id).await {
            tracing::warn!(session_id = %self.context.session_id, error = %e, "Voice disconnect failed");
        }
        self.voice_events = None;
    }

    async fn stop_voice_worker(&mut self) {
        if let Some((worker, handle)) = self.voice_worker.take() {
            drop(worker);
            if let Err(e) = handle.await {
                tracing::warn!(session_id = %self.context.session_id, error = %e, "Voice worker panicked");
            }
        }
    }

    async fn shutdown(&mut self) {
        if let Some(timer) = self.speech_timer.take() {
            timer.cancel();
        }
        self.stop_voice_worker().await;
    }
}

async fn next_voice_event(events: &mut Option<mpsc::Receiver<VoiceEvent>>) -> Option<VoiceEvent> {
    if let Some(events) = events {
        events.recv().await
    } else {
        std::future::pending().await
    }
}
