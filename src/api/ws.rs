//! Voice bridge socket
//!
//! Pumps one browser WebSocket against the session's bridge queues: commands
//! go out as JSON text frames, provider events come back in.

use super::handlers::AppError;
use super::AppState;
use crate::voice::{
    InboundMessage, OutboundMessage, VoiceBridge, VoiceError, VoiceErrorKind, VoiceEvent,
};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;

pub async fn voice_socket(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    if !state.voice.is_connected(&id) {
        return Err(VoiceError::not_connected(&id).into());
    }
    let bridge = state.voice.clone();
    Ok(ws.on_upgrade(move |socket| pump(socket, bridge, id)))
}

async fn pump(mut socket: WebSocket, bridge: Arc<VoiceBridge>, session_id: String) {
    let attachment = match bridge.attach(&session_id) {
        Ok(attachment) => attachment,
        Err(e) => {
            tracing::warn!(session_id = %session_id, error = %e, "Rejecting voice socket");
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };
    let mut commands = attachment.commands;
    let events = attachment.events;
    let (mut sender, mut receiver) = socket.split();
    tracing::info!(session_id = %session_id, "Voice socket attached");

    let mut ended = false;
    loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else {
                    ended = true;
                    break;
                };
                let last = command == OutboundMessage::Disconnect;
                let text = match serde_json::to_string(&command) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!(session_id = %session_id, error = %e, "Failed to encode voice command");
                        continue;
                    }
                };
                if sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
                if last {
                    ended = true;
                    break;
                }
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<InboundMessage>(&text) {
                    Ok(msg) => {
                        if events.send(VoiceEvent::from(msg)).await.is_err() {
                            ended = true;
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(session_id = %session_id, error = %e, "Ignoring malformed voice message");
                    }
                },
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    if ended {
        let _ = sender.send(Message::Close(None)).await;
        tracing::info!(session_id = %session_id, "Voice socket finished");
        return;
    }

    // The session is still live; keep its queue for a reconnect
    bridge.detach(&session_id, commands);
    tracing::warn!(session_id = %session_id, "Voice socket dropped");
    let _ = events
        .send(VoiceEvent::Error {
            kind: VoiceErrorKind::Disconnected,
            message: "Voice socket closed".to_string(),
        })
        .await;
}
