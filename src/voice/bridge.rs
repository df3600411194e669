//! WebSocket bridge to a browser-hosted voice agent
//!
//! The browser runs the vendor voice SDK and relays its events here. Commands
//! queue until the socket attaches, so a session can start before the browser
//! finishes connecting.

use super::{
    ElevenLabsClient, VoiceChannel, VoiceError, VoiceErrorKind, VoiceEvent, VoiceProfile,
    VoiceSession,
};
use crate::state_machine::ResearchOutcome;
use crate::suggestions::{finalize_batch, DraftSuggestion};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Messages from the browser
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    PartnerUtterance {
        text: String,
    },
    AgentSpeechStarted,
    AgentSpeechEnded,
    ResearchRequested {
        call_id: String,
        query: String,
    },
    /// The agent's smart-replies tool fired
    SmartReplies {
        options: Vec<DraftSuggestion>,
    },
    Error {
        #[serde(default)]
        kind: Option<String>,
        message: String,
    },
}

impl From<InboundMessage> for VoiceEvent {
    fn from(msg: InboundMessage) -> Self {
        match msg {
            InboundMessage::PartnerUtterance { text } => VoiceEvent::PartnerUtterance { text },
            InboundMessage::AgentSpeechStarted => VoiceEvent::AgentSpeechStarted,
            InboundMessage::AgentSpeechEnded => VoiceEvent::AgentSpeechEnded,
            InboundMessage::ResearchRequested { call_id, query } => {
                VoiceEvent::ResearchRequested { call_id, query }
            }
            InboundMessage::SmartReplies { options } => VoiceEvent::RepliesOffered {
                suggestions: finalize_batch(options),
            },
            InboundMessage::Error { kind, message } => VoiceEvent::Error {
                kind: VoiceErrorKind::Provider,
                message: match kind {
                    Some(kind) => format!("{kind}: {message}"),
                    None => message,
                },
            },
        }
    }
}

/// Commands for the browser
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    SendUtterance { text: String },
    SetOutputMuted { muted: bool },
    Interrupt,
    ResearchResult { call_id: String, result: String },
    ResearchCancelled { call_id: String },
    Disconnect,
}

/// What the socket handler needs to pump one session
#[derive(Debug)]
pub struct BridgeAttachment {
    pub commands: mpsc::UnboundedReceiver<OutboundMessage>,
    pub events: mpsc::Sender<VoiceEvent>,
}

struct BridgeSlot {
    commands: mpsc::UnboundedSender<OutboundMessage>,
    /// Taken while a socket is attached
    pending: Option<mpsc::UnboundedReceiver<OutboundMessage>>,
    events: mpsc::Sender<VoiceEvent>,
}

/// [`VoiceChannel`] backed by one browser WebSocket per session
pub struct VoiceBridge {
    slots: Mutex<HashMap<String, BridgeSlot>>,
    agent_id: Option<String>,
    signer: Option<ElevenLabsClient>,
}

impl VoiceBridge {
    pub fn new(agent_id: Option<String>, signer: Option<ElevenLabsClient>) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            agent_id,
            signer,
        }
    }

    /// Claim the session's queues for a newly opened socket
    pub fn attach(&self, session_id: &str) -> Result<BridgeAttachment, VoiceError> {
        let mut slots = self.slots.lock().unwrap();
        let slot = slots
            .get_mut(session_id)
            .ok_or_else(|| VoiceError::not_connected(session_id))?;
        let commands = slot.pending.take().ok_or_else(|| {
            VoiceError::transport(format!("Session {session_id} already has a voice socket"))
        })?;
        Ok(BridgeAttachment {
            commands,
            events: slot.events.clone(),
        })
    }

    /// Return the command queue after a socket closes so the browser can reconnect
    pub fn detach(&self, session_id: &str, commands: mpsc::UnboundedReceiver<OutboundMessage>) {
        let mut slots = self.slots.lock().unwrap();
        if let Some(slot) = slots.get_mut(session_id) {
            slot.pending = Some(commands);
        }
    }

    pub fn is_connected(&self, session_id: &str) -> bool {
        self.slots.lock().unwrap().contains_key(session_id)
    }

    fn send(&self, session_id: &str, msg: OutboundMessage) -> Result<(), VoiceError> {
        let slots = self.slots.lock().unwrap();
        let slot = slots
            .get(session_id)
            .ok_or_else(|| VoiceError::not_connected(session_id))?;
        slot.commands
            .send(msg)
            .map_err(|_| VoiceError::transport("Voice command queue closed"))
    }

    async fn signed_url(&self) -> Option<String> {
        let (signer, agent_id) = (self.signer.as_ref()?, self.agent_id.as_deref()?);
        match signer.signed_url(agent_id).await {
            Ok(url) => Some(url),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to get signed URL, falling back to agent id");
                None
            }
        }
    }
}

#[async_trait]
impl VoiceChannel for VoiceBridge {
    async fn connect(
        &self,
        session_id: &str,
        profile: &VoiceProfile,
    ) -> Result<VoiceSession, VoiceError> {
        let signed_url = self.signed_url().await;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(64);
        {
            let mut slots = self.slots.lock().unwrap();
            if slots.contains_key(session_id) {
                return Err(VoiceError::connect(format!(
                    "Session {session_id} is already connected"
                )));
            }
            slots.insert(
                session_id.to_string(),
                BridgeSlot {
                    commands: command_tx,
                    pending: Some(command_rx),
                    events: event_tx,
                },
            );
        }

        tracing::info!(session_id = %session_id, signed = signed_url.is_some(), "Voice bridge opened");

        Ok(VoiceSession {
            events: event_rx,
            client_config: json!({
                "agent_id": self.agent_id,
                "signed_url": signed_url,
                "overrides": { "tts": { "voice_id": profile.voice_id } },
                "dynamic_variables": profile.dynamic_variables(),
                "socket": format!("/api/sessions/{session_id}/voice"),
            }),
        })
    }

    async fn disconnect(&self, session_id: &str) -> Result<(), VoiceError> {
        let slot = self.slots.lock().unwrap().remove(session_id);
        let Some(slot) = slot else {
            return Err(VoiceError::not_connected(session_id));
        };
        // The socket loop closes once it forwards this and the sender drops
        let _ = slot.commands.send(OutboundMessage::Disconnect);
        tracing::info!(session_id = %session_id, "Voice bridge closed");
        Ok(())
    }

    async fn send_utterance(&self, session_id: &str, text: &str) -> Result<(), VoiceError> {
        self.send(
            session_id,
            OutboundMessage::SendUtterance {
                text: text.to_string(),
            },
        )
    }

    async fn set_output_muted(&self, session_id: &str, muted: bool) -> Result<(), VoiceError> {
        self.send(session_id, OutboundMessage::SetOutputMuted { muted })
    }

    async fn interrupt_output(&self, session_id: &str) -> Result<(), VoiceError> {
        self.send(session_id, OutboundMessage::Interrupt)
    }

    async fn resolve_research(
        &self,
        session_id: &str,
        call_id: &str,
        outcome: &ResearchOutcome,
    ) -> Result<(), VoiceError> {
        let call_id = call_id.to_string();
        let msg = match outcome {
            ResearchOutcome::Completed { result } => OutboundMessage::ResearchResult {
                call_id,
                result: result.clone(),
            },
            ResearchOutcome::Cancelled => OutboundMessage::ResearchCancelled { call_id },
        };
        self.send(session_id, msg)
    }
}
