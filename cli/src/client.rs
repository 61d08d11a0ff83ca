//! HTTP and event feed client for the Handoff server

use futures::{SinkExt, StreamExt};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde_json::Value;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;
use uuid::Uuid;

use crate::messages::{ApiErrorBody, ClientMessage, ServerMessage};

/// Header carrying the acting user's id
const ACTOR_HEADER: &str = "x-actor-id";

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("{code}: {message} ({status})")]
    Api {
        status: StatusCode,
        code: String,
        message: String,
    },

    #[error("this command needs --actor")]
    MissingActor,

    #[error("invalid server url: {0}")]
    Url(#[from] url::ParseError),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("bad message: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Thin wrapper over the server's HTTP API
pub struct HandoffClient {
    http: reqwest::Client,
    base: Url,
    actor: Option<Uuid>,
}

impl HandoffClient {
    pub fn new(server: &str, actor: Option<Uuid>) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::new(),
            base: Url::parse(server)?,
            actor,
        })
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let url = self.base.join(path)?;
        let mut req = self.http.request(method, url);
        if let Some(actor) = self.actor {
            req = req.header(ACTOR_HEADER, actor.to_string());
        }
        Ok(req)
    }

    fn require_actor(&self) -> Result<()> {
        self.actor.map(|_| ()).ok_or(ClientError::MissingActor)
    }

    async fn execute(req: RequestBuilder) -> Result<Value> {
        let response = req.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;

        if !status.is_success() {
            let (code, message) = match serde_json::from_slice::<ApiErrorBody>(&bytes) {
                Ok(body) => (body.error, body.message),
                Err(_) => (
                    "http".to_string(),
                    String::from_utf8_lossy(&bytes).into_owned(),
                ),
            };
            return Err(ClientError::Api {
                status,
                code,
                message,
            });
        }

        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn get(&self, path: &str) -> Result<Value> {
        Self::execute(self.request(Method::GET, path)?).await
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        Self::execute(self.request(Method::POST, path)?.json(body)).await
    }

    pub async fn create_work_item(&self, body: &Value) -> Result<Value> {
        self.post("/work-items", body).await
    }

    pub async fn get_work_item(&self, id: Uuid) -> Result<Value> {
        self.get(&format!("/work-items/{id}")).await
    }

    pub async fn list_work_items(&self, status: Option<&str>) -> Result<Value> {
        let req = self.request(Method::GET, "/work-items")?;
        let req = match status {
            Some(status) => req.query(&[("status", status)]),
            None => req,
        };
        Self::execute(req).await
    }

    /// POST to a lifecycle endpoint such as `start` or `submit`
    pub async fn transition(&self, id: Uuid, action: &str, body: &Value) -> Result<Value> {
        self.require_actor()?;
        self.post(&format!("/work-items/{id}/{action}"), body).await
    }

    pub async fn submit_delivery(&self, id: Uuid, body: &Value) -> Result<Value> {
        self.require_actor()?;
        self.post(&format!("/work-items/{id}/deliveries"), body).await
    }

    pub async fn batches(&self, id: Uuid, history: bool, label: Option<&str>) -> Result<Value> {
        let mut req = self.request(Method::GET, &format!("/work-items/{id}/batches"))?;
        if history {
            req = req.query(&[("history", "true")]);
        }
        if let Some(label) = label {
            req = req.query(&[("label", label)]);
        }
        Self::execute(req).await
    }

    pub async fn decide(&self, body: &Value) -> Result<Value> {
        self.require_actor()?;
        self.post("/decisions", body).await
    }

    pub async fn guest_decide(&self, token: &str, body: &Value) -> Result<Value> {
        self.post(&format!("/review/{token}/decisions"), body).await
    }

    pub async fn issue_link(&self, body: &Value) -> Result<Value> {
        self.post("/review-links", body).await
    }

    pub async fn revoke_link(&self, id: Uuid) -> Result<Value> {
        Self::execute(self.request(Method::DELETE, &format!("/review-links/{id}"))?).await
    }

    pub async fn resolve(&self, token: &str) -> Result<Value> {
        self.get(&format!("/review/{token}")).await
    }

    pub async fn lateness(&self, id: Uuid, at: Option<&str>) -> Result<Value> {
        let req = self.request(Method::GET, &format!("/work-items/{id}/lateness"))?;
        let req = match at {
            Some(at) => req.query(&[("at", at)]),
            None => req,
        };
        Self::execute(req).await
    }

    /// Event feed URL derived from the HTTP base
    pub fn feed_url(&self) -> Result<Url> {
        let mut url = self.base.join("/ws")?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        // http(s) -> ws(s) always succeeds for special schemes
        let _ = url.set_scheme(scheme);
        Ok(url)
    }

    /// Follow the event feed, handing each message to `callback` until it
    /// returns false or the server closes the connection
    pub async fn watch<F>(&self, work_item_id: Option<Uuid>, mut callback: F) -> Result<()>
    where
        F: FnMut(ServerMessage) -> bool,
    {
        let url = self.feed_url()?;
        tracing::info!("Connecting to {}", url);

        let (ws_stream, _) = connect_async(url.as_str()).await?;
        let (mut write, mut read) = ws_stream.split();

        let subscribe = serde_json::to_string(&ClientMessage::Subscribe { work_item_id })?;
        write.send(Message::Text(subscribe)).await?;

        while let Some(frame) = read.next().await {
            match frame? {
                Message::Text(text) => match serde_json::from_str::<ServerMessage>(&text) {
                    Ok(msg) => {
                        if !callback(msg) {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!("Failed to parse message: {} - {}", e, text),
                },
                Message::Ping(payload) => write.send(Message::Pong(payload)).await?,
                Message::Close(_) => break,
                _ => {}
            }
        }

        Ok(())
    }
}
