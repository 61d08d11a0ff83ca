//! Event feed message types for the Handoff server
//!
//! These mirror the server's `/ws` protocol. Engine events are kept as raw
//! JSON so the CLI keeps working when the server grows new event kinds.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Messages from client to server
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe {
        #[serde(skip_serializing_if = "Option::is_none")]
        work_item_id: Option<Uuid>,
    },
}

/// Messages from server to client
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Subscribed {
        #[serde(default)]
        work_item_id: Option<Uuid>,
    },
    Event {
        event: Value,
        notify_assignee: bool,
    },
    Lagged {
        skipped: u64,
    },
    Pong,
    Error {
        message: String,
    },
}

/// Error body returned by every failing API call
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    pub error: String,
    pub message: String,
}

/// One-line rendering of an engine event
pub fn describe_event(event: &Value) -> String {
    let kind = event["type"].as_str().unwrap_or("unknown");
    let item = event["work_item_id"].as_str().unwrap_or("-");
    match kind {
        "work_item_created" => format!(
            "[{item}] created \"{}\"",
            event["title"].as_str().unwrap_or_default()
        ),
        "status_changed" => {
            let mut line = format!(
                "[{item}] {} -> {}",
                event["from"].as_str().unwrap_or("?"),
                event["to"].as_str().unwrap_or("?")
            );
            if let Some(note) = event["note"].as_str() {
                line.push_str(&format!(" ({note})"));
            }
            line
        }
        "delivery_submitted" => format!(
            "[{item}] delivery v{} for {}",
            event["version"],
            event["label"].as_str().unwrap_or("(whole item)")
        ),
        "decision_applied" => format!(
            "[{item}] {} on {}",
            event["decision"].as_str().unwrap_or("?"),
            event["sub_item_label"].as_str().unwrap_or("(whole item)")
        ),
        "review_link_issued" => format!(
            "[{item}] review link {} issued, expires {}",
            event["link_id"].as_str().unwrap_or("?"),
            event["expires_at"].as_str().unwrap_or("?")
        ),
        "review_link_revoked" => format!(
            "[{item}] review link {} revoked",
            event["link_id"].as_str().unwrap_or("?")
        ),
        other => format!("[{item}] {other}"),
    }
}
