//! WebSocket event feed

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use crate::review::ReviewEvent;
use crate::AppState;

/// WebSocket handler
pub async fn handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.engine.subscribe();
    // None follows every work item
    let mut filter: Option<Uuid> = None;

    loop {
        tokio::select! {
            msg = receiver.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                };

                let reply = match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(ClientMessage::Subscribe { work_item_id }) => {
                        filter = work_item_id;
                        ServerMessage::Subscribed { work_item_id }
                    }
                    Ok(ClientMessage::Ping) => ServerMessage::Pong,
                    Err(e) => ServerMessage::Error {
                        message: format!("Invalid message: {}", e),
                    },
                };
                if send(&mut sender, &reply).await.is_err() {
                    break;
                }
            }
            event = events.recv() => {
                let msg = match event {
                    Ok(event) => {
                        if matches!(filter, Some(id) if id != event.work_item_id()) {
                            continue;
                        }
                        ServerMessage::Event {
                            notify_assignee: event.crosses_assignee_boundary(),
                            event,
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("Event feed subscriber lagged by {} events", skipped);
                        ServerMessage::Lagged { skipped }
                    }
                    Err(RecvError::Closed) => break,
                };
                if send(&mut sender, &msg).await.is_err() {
                    break;
                }
            }
        }
    }

    tracing::debug!("Event feed connection closed");
}

async fn send(sender: &mut SplitSink<WebSocket, Message>, msg: &ServerMessage) -> Result<(), ()> {
    let text = match serde_json::to_string(msg) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!("Failed to encode event: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(text)).await.map_err(|e| {
        tracing::debug!("Failed to send to event feed: {}", e);
    })
}

/// Messages from client to server
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Restrict the feed to one work item, or clear the restriction
    Subscribe {
        #[serde(default)]
        work_item_id: Option<Uuid>,
    },
    Ping,
}

/// Messages from server to client
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Filter acknowledged
    Subscribed { work_item_id: Option<Uuid> },
    /// An engine event
    Event {
        event: ReviewEvent,
        notify_assignee: bool,
    },
    /// Events were dropped because this connection fell behind
    Lagged { skipped: u64 },
    Pong,
    /// Error occurred
    Error { message: String },
}
