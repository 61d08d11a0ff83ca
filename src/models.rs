//! Data models for deliveries, feedback and review links

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One submitted artifact. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    pub id: Uuid,
    pub work_item_id: Uuid,
    /// Sub-item label; `None` covers the whole work item
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub kind: DeliveryKind,
    /// Storage path or URL
    pub payload_ref: String,
    pub submitted_at: DateTime<Utc>,
    /// Monotonic per work item
    pub version: i64,
    pub submitted_by: Uuid,
}

/// How a delivery is handed over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryKind {
    File,
    ExternalLink,
}

impl DeliveryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryKind::File => "file",
            DeliveryKind::ExternalLink => "external_link",
        }
    }
}

impl std::str::FromStr for DeliveryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(DeliveryKind::File),
            "external_link" => Ok(DeliveryKind::ExternalLink),
            _ => Err(format!("Invalid delivery kind: {}", s)),
        }
    }
}

/// A submission request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDelivery {
    #[serde(default)]
    pub label: Option<String>,
    pub kind: DeliveryKind,
    pub payload_ref: String,
    /// Client-generated key; resubmitting with the same key returns the first delivery
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl NewDelivery {
    pub fn file(label: Option<&str>, payload_ref: impl Into<String>) -> Self {
        Self {
            label: label.map(str::to_string),
            kind: DeliveryKind::File,
            payload_ref: payload_ref.into(),
            idempotency_key: None,
        }
    }

    pub fn link(label: Option<&str>, url: impl Into<String>) -> Self {
        Self {
            label: label.map(str::to_string),
            kind: DeliveryKind::ExternalLink,
            payload_ref: url.into(),
            idempotency_key: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// A reviewer's verdict on a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    RevisionRequested,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Approved => "approved",
            Decision::RevisionRequested => "revision_requested",
        }
    }
}

impl std::str::FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approved" => Ok(Decision::Approved),
            "revision_requested" => Ok(Decision::RevisionRequested),
            _ => Err(format!("Invalid decision: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    Image,
    Audio,
}

/// Media attached to a revision request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub kind: AttachmentKind,
    pub reference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u32>,
}

impl Attachment {
    pub fn image(reference: impl Into<String>) -> Self {
        Self {
            kind: AttachmentKind::Image,
            reference: reference.into(),
            duration_secs: None,
        }
    }

    pub fn audio(reference: impl Into<String>, duration_secs: u32) -> Self {
        Self {
            kind: AttachmentKind::Audio,
            reference: reference.into(),
            duration_secs: Some(duration_secs),
        }
    }
}

/// Who made a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Actor {
    /// An authenticated team member
    Member { id: Uuid },
    /// An external reviewer acting through a review link
    Guest { link_id: Uuid },
}

impl Actor {
    pub fn member(id: Uuid) -> Self {
        Actor::Member { id }
    }

    pub fn kind_str(&self) -> &'static str {
        match self {
            Actor::Member { .. } => "member",
            Actor::Guest { .. } => "guest",
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            Actor::Member { id } => *id,
            Actor::Guest { link_id } => *link_id,
        }
    }
}

/// An append-only reviewer decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    pub id: Uuid,
    pub work_item_id: Uuid,
    /// Primary delivery of the decided batch
    pub delivery_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_link_id: Option<Uuid>,
    pub decision: Decision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    pub actor: Actor,
    pub reviewed_at: DateTime<Utc>,
}

/// What a review link opens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum ReviewTarget {
    Delivery(Uuid),
    WorkItem(Uuid),
}

impl ReviewTarget {
    pub fn kind_str(&self) -> &'static str {
        match self {
            ReviewTarget::Delivery(_) => "delivery",
            ReviewTarget::WorkItem(_) => "work_item",
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            ReviewTarget::Delivery(id) | ReviewTarget::WorkItem(id) => *id,
        }
    }

    pub fn from_parts(kind: &str, id: Uuid) -> Result<Self, String> {
        match kind {
            "delivery" => Ok(ReviewTarget::Delivery(id)),
            "work_item" => Ok(ReviewTarget::WorkItem(id)),
            _ => Err(format!("Invalid review target kind: {}", kind)),
        }
    }
}

/// A capability token for unauthenticated review access
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewLink {
    pub id: Uuid,
    pub token: String,
    pub target: ReviewTarget,
    /// Work item owning the target
    pub work_item_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
    /// Created only to anchor feedback in the audit trail; never handed out
    pub internal: bool,
    pub view_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_viewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
