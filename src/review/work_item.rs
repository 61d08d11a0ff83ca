//! Work items and their lifecycle state machine
//!
//! A work item is one paid production unit (a video edit or a design task).
//! Status changes are planned here as pure values and applied by the store
//! with a compare-and-swap on the current status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use super::lateness::MAX_ALLOWED_DURATION_MINUTES;
use crate::error::{AppError, Result};

/// Status of a work item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemStatus {
    /// Ordered but not started
    New,
    /// The producer is working on it
    Active,
    /// Persisted lateness, written only by the reconciliation job
    Late,
    /// Waiting for the internal reviewer
    ReviewAdmin,
    /// Waiting for the external client
    ReviewClient,
    /// Sent back to the producer
    RevisionRequested,
    /// Closed out
    Completed,
    /// Administratively stopped
    Cancelled,
}

impl WorkItemStatus {
    pub const ALL: [WorkItemStatus; 8] = [
        WorkItemStatus::New,
        WorkItemStatus::Active,
        WorkItemStatus::Late,
        WorkItemStatus::ReviewAdmin,
        WorkItemStatus::ReviewClient,
        WorkItemStatus::RevisionRequested,
        WorkItemStatus::Completed,
        WorkItemStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkItemStatus::New => "new",
            WorkItemStatus::Active => "active",
            WorkItemStatus::Late => "late",
            WorkItemStatus::ReviewAdmin => "review_admin",
            WorkItemStatus::ReviewClient => "review_client",
            WorkItemStatus::RevisionRequested => "revision_requested",
            WorkItemStatus::Completed => "completed",
            WorkItemStatus::Cancelled => "cancelled",
        }
    }

    /// Check if this is a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkItemStatus::Completed | WorkItemStatus::Cancelled)
    }

    /// Check if a reviewer is currently looking at the work
    pub fn is_in_review(&self) -> bool {
        matches!(
            self,
            WorkItemStatus::ReviewAdmin | WorkItemStatus::ReviewClient
        )
    }

    /// Statuses reachable from this one in a single step
    pub fn next_statuses(&self) -> &'static [WorkItemStatus] {
        use WorkItemStatus::*;
        match self {
            New => &[Active, Cancelled],
            Active => &[ReviewAdmin, Late, Cancelled],
            Late => &[ReviewAdmin, Cancelled],
            ReviewAdmin => &[ReviewClient, Completed, RevisionRequested, Cancelled],
            ReviewClient => &[Completed, RevisionRequested, Cancelled],
            RevisionRequested => &[Active, Cancelled],
            Completed | Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, next: WorkItemStatus) -> bool {
        self.next_statuses().contains(&next)
    }
}

impl std::str::FromStr for WorkItemStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "new" => Ok(WorkItemStatus::New),
            "active" => Ok(WorkItemStatus::Active),
            "late" => Ok(WorkItemStatus::Late),
            "review_admin" => Ok(WorkItemStatus::ReviewAdmin),
            "review_client" => Ok(WorkItemStatus::ReviewClient),
            "revision_requested" => Ok(WorkItemStatus::RevisionRequested),
            "completed" => Ok(WorkItemStatus::Completed),
            "cancelled" => Ok(WorkItemStatus::Cancelled),
            _ => Err(format!("Invalid work item status: {}", s)),
        }
    }
}

/// What is being produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemKind {
    Video,
    Design,
}

impl WorkItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkItemKind::Video => "video",
            WorkItemKind::Design => "design",
        }
    }
}

impl std::str::FromStr for WorkItemKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "video" => Ok(WorkItemKind::Video),
            "design" => Ok(WorkItemKind::Design),
            _ => Err(format!("Invalid work item kind: {}", s)),
        }
    }
}

/// Where an internal approval sends the work item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowVariant {
    /// Internal approval forwards to the client
    #[default]
    ClientReview,
    /// Internal approval closes the item
    Direct,
}

impl WorkflowVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowVariant::ClientReview => "client_review",
            WorkflowVariant::Direct => "direct",
        }
    }
}

impl std::str::FromStr for WorkflowVariant {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "client_review" => Ok(WorkflowVariant::ClientReview),
            "direct" => Ok(WorkflowVariant::Direct),
            _ => Err(format!("Invalid workflow variant: {}", s)),
        }
    }
}

/// Kind of deliverable inside a work item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubItemKind {
    Video,
    Thumbnail,
    Post,
    Carousel,
    Story,
    Cover,
    Other,
}

impl SubItemKind {
    /// Human label prefix, e.g. "Thumbnail" in "Thumbnail 2"
    pub fn display_name(&self) -> &'static str {
        match self {
            SubItemKind::Video => "Video",
            SubItemKind::Thumbnail => "Thumbnail",
            SubItemKind::Post => "Post",
            SubItemKind::Carousel => "Carousel",
            SubItemKind::Story => "Story",
            SubItemKind::Cover => "Cover",
            SubItemKind::Other => "Item",
        }
    }
}

/// One entry of a work item's manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubItem {
    #[serde(rename = "type")]
    pub kind: SubItemKind,
    pub label: String,
    pub ordinal: u32,
}

impl SubItem {
    pub fn new(kind: SubItemKind, label: impl Into<String>, ordinal: u32) -> Self {
        Self {
            kind,
            label: label.into(),
            ordinal,
        }
    }

    /// Sub-item labelled from its kind and ordinal ("Post 3")
    pub fn numbered(kind: SubItemKind, ordinal: u32) -> Self {
        Self::new(kind, format!("{} {}", kind.display_name(), ordinal), ordinal)
    }
}

/// Check labels and ordinals are present and unique, returning the manifest sorted by ordinal
pub fn validate_manifest(mut manifest: Vec<SubItem>) -> Result<Vec<SubItem>> {
    let mut labels = HashSet::new();
    let mut ordinals = HashSet::new();
    for item in &manifest {
        if item.label.trim().is_empty() {
            return Err(AppError::Validation(
                "Sub-item labels cannot be empty".to_string(),
            ));
        }
        if !labels.insert(item.label.as_str()) {
            return Err(AppError::Validation(format!(
                "Duplicate sub-item label: {}",
                item.label
            )));
        }
        if !ordinals.insert(item.ordinal) {
            return Err(AppError::Validation(format!(
                "Duplicate sub-item ordinal: {}",
                item.ordinal
            )));
        }
    }
    manifest.sort_by_key(|s| s.ordinal);
    Ok(manifest)
}

/// Fields supplied when a production order is placed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewWorkItem {
    pub title: String,
    pub kind: WorkItemKind,
    #[serde(default)]
    pub assigned_to: Option<Uuid>,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub allowed_duration_minutes: Option<i64>,
    #[serde(default)]
    pub workflow: WorkflowVariant,
    #[serde(default)]
    pub manifest: Vec<SubItem>,
}

impl NewWorkItem {
    pub fn new(title: impl Into<String>, kind: WorkItemKind) -> Self {
        Self {
            title: title.into(),
            kind,
            assigned_to: None,
            deadline: None,
            allowed_duration_minutes: None,
            workflow: WorkflowVariant::default(),
            manifest: Vec::new(),
        }
    }

    pub fn assigned_to(mut self, assignee: Uuid) -> Self {
        self.assigned_to = Some(assignee);
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_allowed_duration(mut self, minutes: i64) -> Self {
        self.allowed_duration_minutes = Some(minutes);
        self
    }

    pub fn with_workflow(mut self, workflow: WorkflowVariant) -> Self {
        self.workflow = workflow;
        self
    }

    pub fn with_sub_item(mut self, sub_item: SubItem) -> Self {
        self.manifest.push(sub_item);
        self
    }
}

/// A work item tracked through the review lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: Uuid,
    pub title: String,
    pub kind: WorkItemKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    pub status: WorkItemStatus,
    pub workflow: WorkflowVariant,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_duration_minutes: Option<i64>,
    pub revision_count: i64,
    /// Number of sub-item approvals recorded
    pub approved_count: i64,
    pub manifest: Vec<SubItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A validated status change, applied by the store only if the status is still `from`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionPlan {
    pub from: WorkItemStatus,
    pub to: WorkItemStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub revision_increment: i64,
    pub at: DateTime<Utc>,
}

impl TransitionPlan {
    /// Mirror the stored update onto an in-memory copy
    pub fn apply_to(&self, item: &mut WorkItem) {
        item.status = self.to;
        if let Some(started_at) = self.started_at {
            item.started_at = Some(started_at);
        }
        if let Some(completed_at) = self.completed_at {
            item.completed_at = Some(completed_at);
        }
        item.revision_count += self.revision_increment;
        item.updated_at = self.at;
    }
}

impl WorkItem {
    /// Build the stored record for a new production order
    pub fn create(new: NewWorkItem, now: DateTime<Utc>) -> Result<Self> {
        if new.title.trim().is_empty() {
            return Err(AppError::Validation("Title cannot be empty".to_string()));
        }
        if matches!(new.allowed_duration_minutes, Some(m) if m <= 0) {
            return Err(AppError::Validation(
                "Allowed duration must be positive".to_string(),
            ));
        }
        if matches!(new.allowed_duration_minutes, Some(m) if m > MAX_ALLOWED_DURATION_MINUTES) {
            return Err(AppError::Validation(format!(
                "Allowed duration cannot exceed {} minutes",
                MAX_ALLOWED_DURATION_MINUTES
            )));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            title: new.title,
            kind: new.kind,
            assigned_to: new.assigned_to,
            deadline: new.deadline,
            status: WorkItemStatus::New,
            workflow: new.workflow,
            started_at: None,
            completed_at: None,
            allowed_duration_minutes: new.allowed_duration_minutes,
            revision_count: 0,
            approved_count: 0,
            manifest: validate_manifest(new.manifest)?,
            created_at: now,
            updated_at: now,
        })
    }

    /// Plan a bare move to `to`, checking only the transition table
    pub fn transition(&self, to: WorkItemStatus, now: DateTime<Utc>) -> Result<TransitionPlan> {
        if !self.status.can_transition_to(to) {
            return Err(AppError::InvalidTransition {
                current: self.status,
                requested: to,
            });
        }
        Ok(TransitionPlan {
            from: self.status,
            to,
            started_at: None,
            completed_at: None,
            revision_increment: 0,
            at: now,
        })
    }

    fn ensure_assignee(&self, actor: Uuid) -> Result<()> {
        match self.assigned_to {
            Some(assignee) if assignee == actor => Ok(()),
            _ => Err(AppError::NotAssignee),
        }
    }

    fn ensure_status(&self, allowed: &[WorkItemStatus], requested: WorkItemStatus) -> Result<()> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(AppError::InvalidTransition {
                current: self.status,
                requested,
            })
        }
    }

    /// new -> active, by the assignee
    pub fn start(&self, actor: Uuid, now: DateTime<Utc>) -> Result<TransitionPlan> {
        self.ensure_status(&[WorkItemStatus::New], WorkItemStatus::Active)?;
        self.ensure_assignee(actor)?;
        let mut plan = self.transition(WorkItemStatus::Active, now)?;
        plan.started_at = Some(now);
        Ok(plan)
    }

    /// active|late -> review_admin, by the assignee
    pub fn submit_for_review(&self, actor: Uuid, now: DateTime<Utc>) -> Result<TransitionPlan> {
        self.ensure_status(
            &[WorkItemStatus::Active, WorkItemStatus::Late],
            WorkItemStatus::ReviewAdmin,
        )?;
        self.ensure_assignee(actor)?;
        self.transition(WorkItemStatus::ReviewAdmin, now)
    }

    /// Internal approval: forwards to the client or closes, depending on workflow
    pub fn approve_internally(&self, now: DateTime<Utc>) -> Result<TransitionPlan> {
        let to = match self.workflow {
            WorkflowVariant::ClientReview => WorkItemStatus::ReviewClient,
            WorkflowVariant::Direct => WorkItemStatus::Completed,
        };
        self.ensure_status(&[WorkItemStatus::ReviewAdmin], to)?;
        let mut plan = self.transition(to, now)?;
        if to == WorkItemStatus::Completed {
            plan.completed_at = Some(now);
        }
        Ok(plan)
    }

    /// review_admin|review_client -> revision_requested, counting the revision
    pub fn request_revision(&self, now: DateTime<Utc>) -> Result<TransitionPlan> {
        self.ensure_status(
            &[WorkItemStatus::ReviewAdmin, WorkItemStatus::ReviewClient],
            WorkItemStatus::RevisionRequested,
        )?;
        let mut plan = self.transition(WorkItemStatus::RevisionRequested, now)?;
        plan.revision_increment = 1;
        Ok(plan)
    }

    /// revision_requested -> active, restarting the work timer
    pub fn acknowledge_revision(&self, actor: Uuid, now: DateTime<Utc>) -> Result<TransitionPlan> {
        self.ensure_status(&[WorkItemStatus::RevisionRequested], WorkItemStatus::Active)?;
        self.ensure_assignee(actor)?;
        let mut plan = self.transition(WorkItemStatus::Active, now)?;
        plan.started_at = Some(now);
        Ok(plan)
    }

    /// Close out after review. Sub-item approval is checked by the caller.
    pub fn complete(&self, now: DateTime<Utc>) -> Result<TransitionPlan> {
        if !self.can_complete_on_approval() {
            return Err(AppError::InvalidTransition {
                current: self.status,
                requested: WorkItemStatus::Completed,
            });
        }
        let mut plan = self.transition(WorkItemStatus::Completed, now)?;
        plan.completed_at = Some(now);
        Ok(plan)
    }

    /// Whether approving the last sub-item closes the item from its current status
    pub fn can_complete_on_approval(&self) -> bool {
        match self.status {
            WorkItemStatus::ReviewClient => true,
            WorkItemStatus::ReviewAdmin => self.workflow == WorkflowVariant::Direct,
            _ => false,
        }
    }

    /// any non-terminal -> cancelled
    pub fn cancel(&self, now: DateTime<Utc>) -> Result<TransitionPlan> {
        self.transition(WorkItemStatus::Cancelled, now)
    }

    /// active -> late, persisted by reconciliation only
    pub fn mark_late(&self, now: DateTime<Utc>) -> Result<TransitionPlan> {
        self.ensure_status(&[WorkItemStatus::Active], WorkItemStatus::Late)?;
        self.transition(WorkItemStatus::Late, now)
    }

    /// Derived lateness at `now`
    pub fn is_late(&self, now: DateTime<Utc>) -> bool {
        super::lateness::is_late(
            self.status,
            self.deadline,
            self.started_at,
            self.allowed_duration_minutes,
            now,
        )
    }
}
