//! Review engine coordinating the lifecycle, deliveries, decisions and links
//!
//! The engine handles:
//! - Work item administration and lifecycle transitions
//! - Delivery submission and batch derivation
//! - Reviewer decisions from members and link guests
//! - Review link issue, resolution and revocation
//! - Event broadcasting for the notification feed

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::batch::{self, all_approved, resolve_sub_items, DeliveryBatch, SubItemView};
use super::feedback::DecisionRequest;
use super::links::{default_ttl, max_ttl, LinkRejection, MAX_TTL_DAYS};
use super::work_item::{NewWorkItem, TransitionPlan, WorkItem, WorkItemStatus};
use crate::clock::Clock;
use crate::error::{AppError, Result};
use crate::models::{Actor, Decision, Delivery, Feedback, NewDelivery, ReviewLink, ReviewTarget};
use crate::store::{DecisionEffect, Store};

/// Engine settings that do not come from the request
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Lifetime of a review link issued without an explicit TTL
    pub default_link_ttl: Duration,
    /// Create internal tracking links for member decisions made without one
    pub audit_links: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_link_ttl: default_ttl(),
            audit_links: true,
        }
    }
}

/// Events emitted by the review engine
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReviewEvent {
    /// A production order was placed
    WorkItemCreated {
        work_item_id: Uuid,
        title: String,
        assigned_to: Option<Uuid>,
    },
    /// A work item moved through the state machine
    StatusChanged {
        work_item_id: Uuid,
        from: WorkItemStatus,
        to: WorkItemStatus,
        /// `None` for system transitions such as lateness reconciliation
        actor: Option<Actor>,
        note: Option<String>,
        at: DateTime<Utc>,
    },
    /// A producer handed over a file or link
    DeliverySubmitted {
        work_item_id: Uuid,
        delivery_id: Uuid,
        label: Option<String>,
        version: i64,
        at: DateTime<Utc>,
    },
    /// A reviewer decided on a batch
    DecisionApplied {
        work_item_id: Uuid,
        actor: Actor,
        decision: Decision,
        sub_item_label: Option<String>,
        at: DateTime<Utc>,
    },
    ReviewLinkIssued {
        link_id: Uuid,
        work_item_id: Uuid,
        expires_at: DateTime<Utc>,
    },
    ReviewLinkRevoked {
        link_id: Uuid,
        work_item_id: Uuid,
    },
}

impl ReviewEvent {
    pub fn work_item_id(&self) -> Uuid {
        match self {
            ReviewEvent::WorkItemCreated { work_item_id, .. }
            | ReviewEvent::StatusChanged { work_item_id, .. }
            | ReviewEvent::DeliverySubmitted { work_item_id, .. }
            | ReviewEvent::DecisionApplied { work_item_id, .. }
            | ReviewEvent::ReviewLinkIssued { work_item_id, .. }
            | ReviewEvent::ReviewLinkRevoked { work_item_id, .. } => *work_item_id,
        }
    }

    /// Whether the assignee should hear about this event.
    ///
    /// True for transitions that hand work back to the producer or close it,
    /// and for every decision.
    pub fn crosses_assignee_boundary(&self) -> bool {
        match self {
            ReviewEvent::StatusChanged { to, .. } => matches!(
                to,
                WorkItemStatus::RevisionRequested
                    | WorkItemStatus::Completed
                    | WorkItemStatus::Cancelled
            ),
            ReviewEvent::DecisionApplied { .. } => true,
            _ => false,
        }
    }
}

/// What a guest sees after opening a review link
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedLink {
    pub link: ReviewLink,
    pub work_item: WorkItem,
    /// Set when the link targets one delivery
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery: Option<Delivery>,
    /// Sub-items in the link's scope with their current rounds
    pub sub_items: Vec<SubItemView>,
}

/// Coordinates the review lifecycle on top of the store
pub struct ReviewEngine {
    store: Store,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    event_tx: broadcast::Sender<ReviewEvent>,
}

impl ReviewEngine {
    pub fn new(store: Store, clock: Arc<dyn Clock>, config: EngineConfig) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            store,
            clock,
            config,
            event_tx,
        }
    }

    /// Subscribe to review events
    pub fn subscribe(&self) -> broadcast::Receiver<ReviewEvent> {
        self.event_tx.subscribe()
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn emit(&self, event: ReviewEvent) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }

    // Administration

    pub async fn create_work_item(&self, new: NewWorkItem) -> Result<WorkItem> {
        let item = WorkItem::create(new, self.now())?;
        self.store.insert_work_item(&item).await?;

        tracing::info!("Created work item {} ({})", item.id, item.title);
        self.emit(ReviewEvent::WorkItemCreated {
            work_item_id: item.id,
            title: item.title.clone(),
            assigned_to: item.assigned_to,
        });

        Ok(item)
    }

    pub async fn get_work_item(&self, id: Uuid) -> Result<WorkItem> {
        self.store.get_work_item(id).await
    }

    /// Newest first
    pub async fn list_work_items(&self, status: Option<WorkItemStatus>) -> Result<Vec<WorkItem>> {
        let Some(status) = status else {
            return self.store.list_work_items().await;
        };
        let mut items = self.store.list_work_items_with_status(status).await?;
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(items)
    }

    pub async fn delete_work_item(&self, id: Uuid) -> Result<()> {
        if !self.store.delete_work_item(id).await? {
            return Err(AppError::NotFound(format!("Work item {} not found", id)));
        }
        tracing::info!("Deleted work item {}", id);
        Ok(())
    }

    /// Set or replace the assignee. Only allowed before work starts.
    pub async fn assign(&self, id: Uuid, assignee: Uuid) -> Result<WorkItem> {
        let item = self.store.get_work_item(id).await?;
        if item.status != WorkItemStatus::New {
            return Err(AppError::Conflict(format!(
                "Cannot reassign a work item in status {}",
                item.status.as_str()
            )));
        }

        if !self.store.assign_work_item(id, assignee, self.now()).await? {
            return Err(AppError::Conflict(
                "Work item started while being reassigned".to_string(),
            ));
        }

        tracing::info!("Assigned work item {} to {}", id, assignee);
        self.store.get_work_item(id).await
    }

    // Lifecycle

    /// Persist a planned transition, reporting a lost race as `InvalidTransition`
    async fn commit(
        &self,
        mut item: WorkItem,
        plan: TransitionPlan,
        actor: Option<Actor>,
        note: Option<String>,
    ) -> Result<WorkItem> {
        if !self.store.apply_transition(item.id, &plan).await? {
            let current = self.store.get_work_item(item.id).await?;
            return Err(AppError::InvalidTransition {
                current: current.status,
                requested: plan.to,
            });
        }

        plan.apply_to(&mut item);
        tracing::info!(
            "Work item {} moved {} -> {}",
            item.id,
            plan.from.as_str(),
            plan.to.as_str()
        );
        self.emit(ReviewEvent::StatusChanged {
            work_item_id: item.id,
            from: plan.from,
            to: plan.to,
            actor,
            note,
            at: plan.at,
        });

        Ok(item)
    }

    /// new -> active, by the assignee
    pub async fn start(&self, id: Uuid, actor: Uuid) -> Result<WorkItem> {
        let item = self.store.get_work_item(id).await?;
        let plan = item.start(actor, self.now())?;
        self.commit(item, plan, Some(Actor::member(actor)), None).await
    }

    /// active|late -> review_admin, once something was delivered in this work period
    pub async fn submit_for_review(&self, id: Uuid, actor: Uuid) -> Result<WorkItem> {
        let item = self.store.get_work_item(id).await?;
        let plan = item.submit_for_review(actor, self.now())?;

        let deliveries = self.store.list_deliveries(id).await?;
        let has_fresh = deliveries
            .iter()
            .any(|d| item.started_at.map_or(true, |started| d.submitted_at >= started));
        if !has_fresh {
            return Err(AppError::Conflict(
                "Nothing delivered since work started".to_string(),
            ));
        }

        self.commit(item, plan, Some(Actor::member(actor)), None).await
    }

    /// Internal reviewer verdict on an item in `review_admin`
    pub async fn internal_review(
        &self,
        id: Uuid,
        verdict: Decision,
        notes: Option<String>,
        actor: Uuid,
    ) -> Result<WorkItem> {
        let item = self.store.get_work_item(id).await?;
        let now = self.now();
        let notes = notes
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());

        let plan = match verdict {
            Decision::Approved => item.approve_internally(now)?,
            Decision::RevisionRequested => {
                if item.status != WorkItemStatus::ReviewAdmin {
                    return Err(AppError::InvalidTransition {
                        current: item.status,
                        requested: WorkItemStatus::RevisionRequested,
                    });
                }
                if notes.is_none() {
                    return Err(AppError::EmptyFeedback);
                }
                item.request_revision(now)?
            }
        };

        self.commit(item, plan, Some(Actor::member(actor)), notes).await
    }

    /// revision_requested -> active, restarting the work timer
    pub async fn acknowledge_revision(&self, id: Uuid, actor: Uuid) -> Result<WorkItem> {
        let item = self.store.get_work_item(id).await?;
        let plan = item.acknowledge_revision(actor, self.now())?;
        self.commit(item, plan, Some(Actor::member(actor)), None).await
    }

    /// Close out once every sub-item's current round is approved
    pub async fn complete(&self, id: Uuid, actor: Uuid) -> Result<WorkItem> {
        let item = self.store.get_work_item(id).await?;
        let plan = item.complete(self.now())?;

        let views = self.sub_item_views(&item).await?;
        if !all_approved(&views) {
            return Err(AppError::InvalidTransition {
                current: item.status,
                requested: WorkItemStatus::Completed,
            });
        }

        self.commit(item, plan, Some(Actor::member(actor)), None).await
    }

    pub async fn cancel(&self, id: Uuid, actor: Uuid) -> Result<WorkItem> {
        let item = self.store.get_work_item(id).await?;
        let plan = item.cancel(self.now())?;
        self.commit(item, plan, Some(Actor::member(actor)), None).await
    }

    /// Persist `active -> late`. Only the reconciliation job calls this.
    pub async fn mark_late(&self, id: Uuid) -> Result<WorkItem> {
        let item = self.store.get_work_item(id).await?;
        let plan = item.mark_late(self.now())?;
        self.commit(item, plan, None, None).await
    }

    /// Derived lateness at `now`; never writes
    pub async fn is_late(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let item = self.store.get_work_item(id).await?;
        Ok(item.is_late(now))
    }

    /// Persist `late` for every active item that has run over. Returns how many moved.
    pub async fn reconcile_lateness(&self) -> Result<usize> {
        let now = self.now();
        let mut moved = 0;

        for item in self
            .store
            .list_work_items_with_status(WorkItemStatus::Active)
            .await?
        {
            if !item.is_late(now) {
                continue;
            }
            let id = item.id;
            let plan = item.mark_late(now)?;
            match self.commit(item, plan, None, None).await {
                Ok(_) => moved += 1,
                Err(AppError::InvalidTransition { current, .. }) => {
                    tracing::debug!(
                        "Work item {} left active ({}) before reconciliation",
                        id,
                        current.as_str()
                    );
                }
                Err(e) => return Err(e),
            }
        }

        if moved > 0 {
            tracing::info!("Marked {} work items late", moved);
        }
        Ok(moved)
    }

    // Deliveries and batches

    pub async fn submit_delivery(
        &self,
        work_item_id: Uuid,
        new: NewDelivery,
        actor: Uuid,
    ) -> Result<Delivery> {
        if new.payload_ref.trim().is_empty() {
            return Err(AppError::Validation(
                "Payload reference cannot be empty".to_string(),
            ));
        }
        if matches!(new.label.as_deref(), Some(l) if l.trim().is_empty()) {
            return Err(AppError::Validation(
                "Sub-item label cannot be blank".to_string(),
            ));
        }

        let item = self.store.get_work_item(work_item_id).await?;
        if item.status.is_terminal() {
            return Err(AppError::Conflict(format!(
                "Cannot deliver to a {} work item",
                item.status.as_str()
            )));
        }

        if let Some(key) = new.idempotency_key.as_deref() {
            if let Some(existing) = self
                .store
                .find_delivery_by_key(work_item_id, new.label.as_deref(), key)
                .await?
            {
                tracing::debug!("Delivery retry with key {} matched {}", key, existing.id);
                return Ok(existing);
            }
        }

        let delivery = self
            .store
            .insert_delivery(work_item_id, &new, actor, self.now())
            .await?;

        tracing::info!(
            "Delivery v{} for work item {} ({})",
            delivery.version,
            work_item_id,
            delivery.label.as_deref().unwrap_or("whole item")
        );
        self.emit(ReviewEvent::DeliverySubmitted {
            work_item_id,
            delivery_id: delivery.id,
            label: delivery.label.clone(),
            version: delivery.version,
            at: delivery.submitted_at,
        });

        Ok(delivery)
    }

    /// Every delivery of a work item, oldest version first
    pub async fn list_deliveries(&self, work_item_id: Uuid) -> Result<Vec<Delivery>> {
        self.store.get_work_item(work_item_id).await?;
        self.store.list_deliveries(work_item_id).await
    }

    async fn sub_item_views(&self, item: &WorkItem) -> Result<Vec<SubItemView>> {
        let deliveries = self.store.list_deliveries(item.id).await?;
        let feedback = self.store.list_feedback(item.id).await?;
        Ok(resolve_sub_items(item, &deliveries, &feedback))
    }

    /// Current round and derived status of every sub-item
    pub async fn get_batches(&self, work_item_id: Uuid) -> Result<Vec<SubItemView>> {
        let item = self.store.get_work_item(work_item_id).await?;
        tracing::debug!("Resolving batches for work item {}", work_item_id);
        self.sub_item_views(&item).await
    }

    /// Every round of one label, newest first
    pub async fn batch_history(
        &self,
        work_item_id: Uuid,
        label: Option<&str>,
    ) -> Result<Vec<DeliveryBatch>> {
        self.store.get_work_item(work_item_id).await?;
        let deliveries = self.store.list_deliveries(work_item_id).await?;
        let feedback = self.store.list_feedback(work_item_id).await?;
        Ok(batch::batch_history(&deliveries, &feedback, label))
    }

    // Decisions

    /// Record a reviewer decision on a batch and apply its counter and status effects
    pub async fn apply_decision(&self, req: DecisionRequest, actor: Actor) -> Result<Feedback> {
        req.validate()?;

        let item = self.store.get_work_item(req.batch.work_item_id).await?;
        if item.status.is_terminal() {
            return Err(AppError::InvalidTransition {
                current: item.status,
                requested: match req.decision {
                    Decision::Approved => WorkItemStatus::Completed,
                    Decision::RevisionRequested => WorkItemStatus::RevisionRequested,
                },
            });
        }

        let deliveries = self.store.list_deliveries(item.id).await?;
        let mut feedback = self.store.list_feedback(item.id).await?;
        let batch = batch::find_batch(&deliveries, &feedback, &req.batch).ok_or_else(|| {
            AppError::NotFound(format!(
                "No delivery batch with primary {}",
                req.batch.primary_delivery_id
            ))
        })?;
        if batch.decision.is_some() {
            return Err(AppError::AlreadyDecided);
        }

        let now = self.now();
        let mut effect = DecisionEffect::default();
        let review_link_id = match actor {
            Actor::Guest { link_id } => Some(link_id),
            Actor::Member { .. } => {
                let links = self.store.list_review_links(item.id).await?;
                let existing = links
                    .iter()
                    .filter(|l| l.is_usable(now) && covers(l, &batch))
                    .max_by_key(|l| l.created_at)
                    .map(|l| l.id);
                match existing {
                    Some(id) => Some(id),
                    None if self.config.audit_links => {
                        let link = ReviewLink::internal_tracking(
                            ReviewTarget::Delivery(batch.primary.id),
                            item.id,
                            now,
                        );
                        let id = link.id;
                        effect.audit_link = Some(link);
                        Some(id)
                    }
                    None => None,
                }
            }
        };

        let record = Feedback {
            id: Uuid::new_v4(),
            work_item_id: item.id,
            delivery_id: batch.primary.id,
            review_link_id,
            decision: req.decision,
            notes: req.normalized_notes(),
            attachments: req.attachments.clone(),
            actor,
            reviewed_at: now,
        };

        match req.decision {
            Decision::Approved => {
                effect.approved_increment = 1;
                feedback.push(record.clone());
                let views = resolve_sub_items(&item, &deliveries, &feedback);
                if all_approved(&views) && item.can_complete_on_approval() {
                    effect.transition = Some(item.complete(now)?);
                }
            }
            Decision::RevisionRequested => {
                if item.status.is_in_review() {
                    effect.transition = Some(item.request_revision(now)?);
                } else {
                    effect.revision_increment = 1;
                }
            }
        }

        if !self.store.record_decision(&record, &effect).await? {
            let current = self.store.get_work_item(item.id).await?;
            let requested = effect.transition.map_or(current.status, |p| p.to);
            return Err(AppError::InvalidTransition {
                current: current.status,
                requested,
            });
        }

        tracing::info!(
            "{} on work item {} ({}) by {}",
            record.decision.as_str(),
            item.id,
            batch.label.as_deref().unwrap_or("whole item"),
            actor.kind_str()
        );
        self.emit(ReviewEvent::DecisionApplied {
            work_item_id: item.id,
            actor,
            decision: record.decision,
            sub_item_label: batch.label.clone(),
            at: now,
        });
        if let Some(plan) = effect.transition {
            tracing::info!(
                "Work item {} moved {} -> {}",
                item.id,
                plan.from.as_str(),
                plan.to.as_str()
            );
            self.emit(ReviewEvent::StatusChanged {
                work_item_id: item.id,
                from: plan.from,
                to: plan.to,
                actor: Some(actor),
                note: record.notes.clone(),
                at: now,
            });
        } else if record.decision == Decision::Approved {
            self.complete_if_all_approved(item.id, actor).await?;
        }

        Ok(record)
    }

    /// Re-check completion after an approval committed without a transition.
    /// Approvals of the last sub-items can commit side by side, each having
    /// seen the other as pending; whichever re-reads last closes the item.
    async fn complete_if_all_approved(&self, id: Uuid, actor: Actor) -> Result<()> {
        let item = self.store.get_work_item(id).await?;
        if !item.can_complete_on_approval() {
            return Ok(());
        }
        let views = self.sub_item_views(&item).await?;
        if !all_approved(&views) {
            return Ok(());
        }

        let Ok(plan) = item.complete(self.now()) else {
            return Ok(());
        };
        match self.commit(item, plan, Some(actor), None).await {
            Ok(_) => Ok(()),
            Err(AppError::InvalidTransition { current, .. }) => {
                tracing::debug!(
                    "Work item {} already moved to {} before completion",
                    id,
                    current.as_str()
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// A guest decision through a review link. Opening the link counts as one view.
    pub async fn apply_guest_decision(&self, token: &str, req: DecisionRequest) -> Result<Feedback> {
        req.validate()?;
        let resolved = self.resolve_review_link(token).await?;
        let current = resolved
            .sub_items
            .iter()
            .any(|v| v.batch.as_ref() == Some(&req.batch));
        let in_scope = current
            && match resolved.link.target {
                ReviewTarget::WorkItem(_) => true,
                ReviewTarget::Delivery(id) => {
                    let deliveries = self.store.list_deliveries(resolved.work_item.id).await?;
                    let feedback = self.store.list_feedback(resolved.work_item.id).await?;
                    batch::find_batch(&deliveries, &feedback, &req.batch)
                        .is_some_and(|b| b.contains(id))
                }
            };
        if !in_scope {
            return Err(AppError::Validation(
                "Batch is not reviewable through this link".to_string(),
            ));
        }

        self.apply_decision(
            req,
            Actor::Guest {
                link_id: resolved.link.id,
            },
        )
        .await
    }

    // Review links

    /// Hand out a new link. Earlier links for the same target stay valid.
    pub async fn issue_review_link(
        &self,
        target: ReviewTarget,
        ttl: Option<Duration>,
    ) -> Result<ReviewLink> {
        let ttl = ttl.unwrap_or(self.config.default_link_ttl);
        if ttl <= Duration::zero() {
            return Err(AppError::Validation(
                "Review link TTL must be positive".to_string(),
            ));
        }
        if ttl > max_ttl() {
            return Err(AppError::Validation(format!(
                "Review link TTL cannot exceed {} days",
                MAX_TTL_DAYS
            )));
        }

        let work_item_id = match target {
            ReviewTarget::WorkItem(id) => self.store.get_work_item(id).await?.id,
            ReviewTarget::Delivery(id) => self.store.get_delivery(id).await?.work_item_id,
        };

        let link = ReviewLink::issue(target, work_item_id, ttl, self.now())?;
        self.store.insert_review_link(&link).await?;

        tracing::info!(
            "Issued review link {} for {} {} until {}",
            link.id,
            target.kind_str(),
            target.id(),
            link.expires_at
        );
        self.emit(ReviewEvent::ReviewLinkIssued {
            link_id: link.id,
            work_item_id,
            expires_at: link.expires_at,
        });

        Ok(link)
    }

    /// Open a link, counting one view. Every refusal is the same `InvalidLink`.
    pub async fn resolve_review_link(&self, token: &str) -> Result<ResolvedLink> {
        let now = self.now();

        let mut link = match self.store.find_review_link_by_token(token).await? {
            Some(link) => link,
            None => {
                tracing::warn!("Review link rejected: {}", LinkRejection::Unknown.as_str());
                return Err(AppError::InvalidLink);
            }
        };
        if let Err(reason) = link.check(now) {
            tracing::warn!("Review link {} rejected: {}", link.id, reason.as_str());
            return Err(AppError::InvalidLink);
        }
        if !self.store.record_link_view(link.id, now).await? {
            tracing::warn!(
                "Review link {} rejected: {}",
                link.id,
                LinkRejection::Revoked.as_str()
            );
            return Err(AppError::InvalidLink);
        }
        link.view_count += 1;
        link.last_viewed_at = Some(now);

        let work_item = self.store.get_work_item(link.work_item_id).await?;
        let deliveries = self.store.list_deliveries(work_item.id).await?;
        let feedback = self.store.list_feedback(work_item.id).await?;
        let mut sub_items = resolve_sub_items(&work_item, &deliveries, &feedback);

        let delivery = match link.target {
            ReviewTarget::Delivery(id) => {
                let delivery = deliveries
                    .into_iter()
                    .find(|d| d.id == id)
                    .ok_or_else(|| AppError::NotFound(format!("Delivery {} not found", id)))?;
                sub_items.retain(|v| v.label == delivery.label);
                Some(delivery)
            }
            ReviewTarget::WorkItem(_) => None,
        };

        tracing::debug!("Review link {} viewed ({} views)", link.id, link.view_count);
        Ok(ResolvedLink {
            link,
            work_item,
            delivery,
            sub_items,
        })
    }

    /// Deactivate a link. Revoking twice is fine.
    pub async fn revoke_review_link(&self, link_id: Uuid) -> Result<ReviewLink> {
        let mut link = self.store.get_review_link(link_id).await?;
        let was_active = link.is_active;
        self.store.revoke_review_link(link_id).await?;
        link.is_active = false;

        if was_active {
            tracing::info!("Revoked review link {}", link_id);
            self.emit(ReviewEvent::ReviewLinkRevoked {
                link_id,
                work_item_id: link.work_item_id,
            });
        }
        Ok(link)
    }
}

/// Whether a link's target includes the batch
fn covers(link: &ReviewLink, batch: &DeliveryBatch) -> bool {
    match link.target {
        ReviewTarget::WorkItem(id) => id == batch.primary.work_item_id,
        ReviewTarget::Delivery(id) => batch.contains(id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::review::{SubItem, SubItemKind, WorkItemKind};
    use sqlx::sqlite::SqlitePoolOptions;

    async fn engine() -> (ReviewEngine, Arc<ManualClock>) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create in-memory database");
        crate::store::MIGRATOR.run(&pool).await.unwrap();

        let clock = Arc::new(ManualClock::default());
        let engine = ReviewEngine::new(Store::new(pool), clock.clone(), EngineConfig::default());
        (engine, clock)
    }

    #[test]
    fn test_crosses_assignee_boundary() {
        let changed = |to| ReviewEvent::StatusChanged {
            work_item_id: Uuid::new_v4(),
            from: WorkItemStatus::ReviewClient,
            to,
            actor: None,
            note: None,
            at: Utc::now(),
        };
        assert!(changed(WorkItemStatus::RevisionRequested).crosses_assignee_boundary());
        assert!(changed(WorkItemStatus::Completed).crosses_assignee_boundary());
        assert!(!changed(WorkItemStatus::ReviewAdmin).crosses_assignee_boundary());

        let issued = ReviewEvent::ReviewLinkIssued {
            link_id: Uuid::new_v4(),
            work_item_id: Uuid::new_v4(),
            expires_at: Utc::now(),
        };
        assert!(!issued.crosses_assignee_boundary());
    }

    #[test]
    fn test_event_serialization() {
        let id = Uuid::new_v4();
        let json = serde_json::to_value(ReviewEvent::DecisionApplied {
            work_item_id: id,
            actor: Actor::member(id),
            decision: Decision::Approved,
            sub_item_label: Some("Post 1".to_string()),
            at: Utc::now(),
        })
        .unwrap();
        assert_eq!(json["type"], "decision_applied");
        assert_eq!(json["decision"], "approved");
        assert_eq!(json["actor"]["type"], "member");
    }

    #[tokio::test]
    async fn test_member_decision_gets_audit_link() {
        let (engine, _clock) = engine().await;
        let producer = Uuid::new_v4();
        let item = engine
            .create_work_item(
                NewWorkItem::new("Carousel", WorkItemKind::Design)
                    .assigned_to(producer)
                    .with_sub_item(SubItem::numbered(SubItemKind::Carousel, 1)),
            )
            .await
            .unwrap();
        engine
            .submit_delivery(item.id, NewDelivery::file(Some("Carousel 1"), "c1.png"), producer)
            .await
            .unwrap();
        let views = engine.get_batches(item.id).await.unwrap();
        let batch = views[0].batch.clone().unwrap();

        let fb = engine
            .apply_decision(DecisionRequest::approve(batch), Actor::member(Uuid::new_v4()))
            .await
            .unwrap();

        let links = engine.store().list_review_links(item.id).await.unwrap();
        assert_eq!(links.len(), 1);
        assert!(links[0].internal);
        assert!(!links[0].is_active);
        assert_eq!(fb.review_link_id, Some(links[0].id));
    }

    #[tokio::test]
    async fn test_member_decision_references_active_link() {
        let (engine, _clock) = engine().await;
        let producer = Uuid::new_v4();
        let item = engine
            .create_work_item(NewWorkItem::new("Cover", WorkItemKind::Design).assigned_to(producer))
            .await
            .unwrap();
        let d = engine
            .submit_delivery(item.id, NewDelivery::file(None, "cover.png"), producer)
            .await
            .unwrap();
        let link = engine
            .issue_review_link(ReviewTarget::Delivery(d.id), None)
            .await
            .unwrap();

        let views = engine.get_batches(item.id).await.unwrap();
        let fb = engine
            .apply_decision(
                DecisionRequest::approve(views[0].batch.clone().unwrap()),
                Actor::member(Uuid::new_v4()),
            )
            .await
            .unwrap();
        assert_eq!(fb.review_link_id, Some(link.id));
        assert_eq!(engine.store().list_review_links(item.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reconcile_marks_overrun_items_late() {
        let (engine, clock) = engine().await;
        let producer = Uuid::new_v4();
        let item = engine
            .create_work_item(
                NewWorkItem::new("Edit", WorkItemKind::Video)
                    .assigned_to(producer)
                    .with_allowed_duration(60),
            )
            .await
            .unwrap();
        engine.start(item.id, producer).await.unwrap();

        assert_eq!(engine.reconcile_lateness().await.unwrap(), 0);
        clock.advance(Duration::minutes(61));
        assert!(engine.is_late(item.id, engine.now()).await.unwrap());
        assert_eq!(engine.reconcile_lateness().await.unwrap(), 1);
        assert_eq!(
            engine.get_work_item(item.id).await.unwrap().status,
            WorkItemStatus::Late
        );
        assert_eq!(engine.reconcile_lateness().await.unwrap(), 0);
    }
}
