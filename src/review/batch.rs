//! Delivery batch resolution
//!
//! Deliveries for one sub-item label are grouped into review rounds. A round
//! is every delivery submitted within [`BATCH_WINDOW_SECS`] of the newest one
//! still unassigned, so a producer uploading carousel pages one by one lands
//! a single batch. Rounds are anchored on delivery timestamps, never on the
//! wall clock, and are recomputed from storage on every read.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use super::work_item::{SubItemKind, WorkItem};
use crate::models::{Decision, Delivery, DeliveryKind, Feedback};

/// Width of the grouping window, measured back from a round's newest delivery
pub const BATCH_WINDOW_SECS: i64 = 120;

pub fn batch_window() -> Duration {
    Duration::seconds(BATCH_WINDOW_SECS)
}

/// Derived approval status of a sub-item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubItemStatus {
    /// Nothing delivered yet
    Pending,
    /// Delivered, no decision yet
    Delivered,
    Approved,
    Revision,
}

impl SubItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubItemStatus::Pending => "pending",
            SubItemStatus::Delivered => "delivered",
            SubItemStatus::Approved => "approved",
            SubItemStatus::Revision => "revision",
        }
    }
}

impl From<Option<Decision>> for SubItemStatus {
    fn from(decision: Option<Decision>) -> Self {
        match decision {
            None => SubItemStatus::Delivered,
            Some(Decision::Approved) => SubItemStatus::Approved,
            Some(Decision::RevisionRequested) => SubItemStatus::Revision,
        }
    }
}

/// Stable handle on one round, keyed by its primary delivery
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchRef {
    pub work_item_id: Uuid,
    #[serde(default)]
    pub label: Option<String>,
    pub primary_delivery_id: Uuid,
}

/// One review round for a label
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryBatch {
    pub label: Option<String>,
    /// Oldest first
    pub deliveries: Vec<Delivery>,
    /// Newest delivery of the round
    pub primary: Delivery,
    pub decision: Option<Feedback>,
}

impl DeliveryBatch {
    fn build(label: Option<&str>, deliveries: Vec<Delivery>, feedback: &[Feedback]) -> Option<Self> {
        let primary = deliveries.last()?.clone();
        let decision = resolve_decision(&deliveries, feedback);
        Some(Self {
            label: label.map(str::to_string),
            deliveries,
            primary,
            decision,
        })
    }

    pub fn status(&self) -> SubItemStatus {
        self.decision.as_ref().map(|f| f.decision).into()
    }

    /// File deliveries of the round, oldest first. Empty when the primary is a link.
    pub fn files(&self) -> Vec<&Delivery> {
        if self.primary.kind == DeliveryKind::ExternalLink {
            return Vec::new();
        }
        self.deliveries
            .iter()
            .filter(|d| d.kind == DeliveryKind::File)
            .collect()
    }

    pub fn contains(&self, delivery_id: Uuid) -> bool {
        self.deliveries.iter().any(|d| d.id == delivery_id)
    }

    pub fn batch_ref(&self) -> BatchRef {
        BatchRef {
            work_item_id: self.primary.work_item_id,
            label: self.label.clone(),
            primary_delivery_id: self.primary.id,
        }
    }
}

/// Pick the decision governing a round.
///
/// Normally there is at most one. If several exist the most recently reviewed
/// wins, with the feedback id as a final tie-break.
pub fn resolve_decision(deliveries: &[Delivery], feedback: &[Feedback]) -> Option<Feedback> {
    let ids: HashSet<Uuid> = deliveries.iter().map(|d| d.id).collect();
    feedback
        .iter()
        .filter(|f| ids.contains(&f.delivery_id))
        .max_by(|a, b| (a.reviewed_at, a.id).cmp(&(b.reviewed_at, b.id)))
        .cloned()
}

/// Split a label's history into rounds, newest round first
pub fn batch_history(
    deliveries: &[Delivery],
    feedback: &[Feedback],
    label: Option<&str>,
) -> Vec<DeliveryBatch> {
    let mut matching: Vec<&Delivery> = deliveries
        .iter()
        .filter(|d| d.label.as_deref() == label)
        .collect();
    matching.sort_by(|a, b| (a.submitted_at, a.version).cmp(&(b.submitted_at, b.version)));

    let mut rounds = Vec::new();
    loop {
        let cutoff = match matching.last() {
            Some(anchor) => anchor.submitted_at - batch_window(),
            None => break,
        };
        let split = matching.partition_point(|d| d.submitted_at < cutoff);
        let round: Vec<Delivery> = matching.drain(split..).cloned().collect();
        if let Some(batch) = DeliveryBatch::build(label, round, feedback) {
            rounds.push(batch);
        }
    }
    rounds
}

/// The current round for a label, if anything was delivered
pub fn current_batch(
    deliveries: &[Delivery],
    feedback: &[Feedback],
    label: Option<&str>,
) -> Option<DeliveryBatch> {
    batch_history(deliveries, feedback, label).into_iter().next()
}

/// Find the round a batch reference points at, current or historical
pub fn find_batch(
    deliveries: &[Delivery],
    feedback: &[Feedback],
    batch: &BatchRef,
) -> Option<DeliveryBatch> {
    batch_history(deliveries, feedback, batch.label.as_deref())
        .into_iter()
        .find(|b| b.primary.id == batch.primary_delivery_id)
}

/// Current state of one sub-item, as shown to reviewers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubItemView {
    pub label: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<SubItemKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ordinal: Option<u32>,
    pub status: SubItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch: Option<BatchRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_delivery: Option<Delivery>,
    pub files: Vec<Delivery>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<Feedback>,
}

impl SubItemView {
    fn from_batch(
        label: Option<&str>,
        kind: Option<SubItemKind>,
        ordinal: Option<u32>,
        batch: Option<DeliveryBatch>,
    ) -> Self {
        match batch {
            Some(batch) => Self {
                label: label.map(str::to_string),
                kind,
                ordinal,
                status: batch.status(),
                batch: Some(batch.batch_ref()),
                files: batch.files().into_iter().cloned().collect(),
                primary_delivery: Some(batch.primary),
                decision: batch.decision,
            },
            None => Self {
                label: label.map(str::to_string),
                kind,
                ordinal,
                status: SubItemStatus::Pending,
                batch: None,
                primary_delivery: None,
                files: Vec::new(),
                decision: None,
            },
        }
    }
}

/// Derive every sub-item's current round and status.
///
/// Manifest entries come first in ordinal order, followed by labels that were
/// delivered without being in the manifest (whole-item deliveries included),
/// in order of first submission. An item with neither has a single pending
/// whole-item entry.
pub fn resolve_sub_items(
    item: &WorkItem,
    deliveries: &[Delivery],
    feedback: &[Feedback],
) -> Vec<SubItemView> {
    let mut views: Vec<SubItemView> = item
        .manifest
        .iter()
        .map(|sub| {
            let label = Some(sub.label.as_str());
            SubItemView::from_batch(
                label,
                Some(sub.kind),
                Some(sub.ordinal),
                current_batch(deliveries, feedback, label),
            )
        })
        .collect();

    let manifest_labels: HashSet<&str> = item.manifest.iter().map(|s| s.label.as_str()).collect();
    let mut ordered: Vec<&Delivery> = deliveries.iter().collect();
    ordered.sort_by(|a, b| (a.submitted_at, a.version).cmp(&(b.submitted_at, b.version)));

    let mut seen: HashSet<Option<&str>> = HashSet::new();
    for delivery in ordered {
        let label = delivery.label.as_deref();
        if matches!(label, Some(l) if manifest_labels.contains(l)) || !seen.insert(label) {
            continue;
        }
        views.push(SubItemView::from_batch(
            label,
            None,
            None,
            current_batch(deliveries, feedback, label),
        ));
    }

    if views.is_empty() {
        views.push(SubItemView::from_batch(None, None, None, None));
    }
    views
}

/// Whether every sub-item's current round is approved
pub fn all_approved(views: &[SubItemView]) -> bool {
    !views.is_empty() && views.iter().all(|v| v.status == SubItemStatus::Approved)
}
