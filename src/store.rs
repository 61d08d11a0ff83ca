//! Database store for work items, deliveries, feedback and review links

use chrono::{DateTime, Utc};
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{Actor, Delivery, Feedback, NewDelivery, ReviewLink, ReviewTarget};
use crate::review::{TransitionPlan, WorkItem, WorkItemStatus};

/// Embedded schema migrations
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Counter and status changes that accompany one recorded decision
#[derive(Debug, Clone, Default)]
pub struct DecisionEffect {
    pub approved_increment: i64,
    /// Only used when no transition is applied; a transition carries its own
    pub revision_increment: i64,
    pub transition: Option<TransitionPlan>,
    /// Tracking link to create alongside the feedback
    pub audit_link: Option<ReviewLink>,
}

/// Database store
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // Work item operations

    pub async fn insert_work_item(&self, item: &WorkItem) -> Result<()> {
        let manifest = serde_json::to_string(&item.manifest)
            .map_err(|e| AppError::Internal(format!("Invalid manifest: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO work_items (id, title, kind, assigned_to, deadline, status, workflow,
                started_at, completed_at, allowed_duration_minutes, revision_count, approved_count,
                manifest, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(item.id.to_string())
        .bind(&item.title)
        .bind(item.kind.as_str())
        .bind(item.assigned_to.map(|u| u.to_string()))
        .bind(item.deadline)
        .bind(item.status.as_str())
        .bind(item.workflow.as_str())
        .bind(item.started_at)
        .bind(item.completed_at)
        .bind(item.allowed_duration_minutes)
        .bind(item.revision_count)
        .bind(item.approved_count)
        .bind(manifest)
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_work_item(&self, id: Uuid) -> Result<WorkItem> {
        let row = sqlx::query_as::<_, WorkItemRow>(
            r#"
            SELECT id, title, kind, assigned_to, deadline, status, workflow, started_at,
                completed_at, allowed_duration_minutes, revision_count, approved_count,
                manifest, created_at, updated_at
            FROM work_items
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Work item {} not found", id)))?;

        row.try_into()
    }

    pub async fn list_work_items(&self) -> Result<Vec<WorkItem>> {
        let rows = sqlx::query_as::<_, WorkItemRow>(
            r#"
            SELECT id, title, kind, assigned_to, deadline, status, workflow, started_at,
                completed_at, allowed_duration_minutes, revision_count, approved_count,
                manifest, created_at, updated_at
            FROM work_items
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut items = rows
            .into_iter()
            .map(|r| r.try_into())
            .collect::<Result<Vec<WorkItem>>>()?;
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(items)
    }

    pub async fn list_work_items_with_status(
        &self,
        status: WorkItemStatus,
    ) -> Result<Vec<WorkItem>> {
        let rows = sqlx::query_as::<_, WorkItemRow>(
            r#"
            SELECT id, title, kind, assigned_to, deadline, status, workflow, started_at,
                completed_at, allowed_duration_minutes, revision_count, approved_count,
                manifest, created_at, updated_at
            FROM work_items
            WHERE status = ?
            "#,
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    /// Set the assignee while the item is still `new`. Returns false if it no longer is.
    pub async fn assign_work_item(
        &self,
        id: Uuid,
        assignee: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE work_items SET assigned_to = ?, updated_at = ?
            WHERE id = ? AND status = 'new'
            "#,
        )
        .bind(assignee.to_string())
        .bind(now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Compare-and-swap a status change. Returns false if the status moved underneath us.
    pub async fn apply_transition(&self, id: Uuid, plan: &TransitionPlan) -> Result<bool> {
        let result = transition_query(id, plan, 0).execute(&self.pool).await?;
        Ok(result.rows_affected() == 1)
    }

    /// Delete a work item together with its deliveries, feedback and links
    pub async fn delete_work_item(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM work_items WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    // Delivery operations

    /// Store a delivery, assigning the next version number for its work item.
    ///
    /// With an idempotency key, a repeated submission returns the original row.
    pub async fn insert_delivery(
        &self,
        work_item_id: Uuid,
        new: &NewDelivery,
        submitted_by: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Delivery> {
        if let Some(key) = new.idempotency_key.as_deref() {
            if let Some(existing) = self
                .find_delivery_by_key(work_item_id, new.label.as_deref(), key)
                .await?
            {
                return Ok(existing);
            }
        }

        let id = Uuid::new_v4();
        let inserted = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO deliveries (id, work_item_id, label, kind, payload_ref, submitted_at,
                version, submitted_by, idempotency_key)
            SELECT ?, ?, ?, ?, ?, ?, COALESCE(MAX(version), 0) + 1, ?, ?
            FROM deliveries
            WHERE work_item_id = ?
            RETURNING version
            "#,
        )
        .bind(id.to_string())
        .bind(work_item_id.to_string())
        .bind(new.label.as_deref())
        .bind(new.kind.as_str())
        .bind(&new.payload_ref)
        .bind(now)
        .bind(submitted_by.to_string())
        .bind(new.idempotency_key.as_deref())
        .bind(work_item_id.to_string())
        .fetch_one(&self.pool)
        .await;

        let version = match inserted {
            Ok(version) => version,
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                // Lost a race with a retry carrying the same key
                let key = new.idempotency_key.as_deref().ok_or_else(|| {
                    AppError::Conflict("Concurrent delivery version clash".to_string())
                })?;
                return self
                    .find_delivery_by_key(work_item_id, new.label.as_deref(), key)
                    .await?
                    .ok_or_else(|| AppError::Internal("Idempotent delivery vanished".to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Delivery {
            id,
            work_item_id,
            label: new.label.clone(),
            kind: new.kind,
            payload_ref: new.payload_ref.clone(),
            submitted_at: now,
            version,
            submitted_by,
        })
    }

    pub async fn find_delivery_by_key(
        &self,
        work_item_id: Uuid,
        label: Option<&str>,
        key: &str,
    ) -> Result<Option<Delivery>> {
        let row = sqlx::query_as::<_, DeliveryRow>(
            r#"
            SELECT id, work_item_id, label, kind, payload_ref, submitted_at, version, submitted_by
            FROM deliveries
            WHERE work_item_id = ? AND COALESCE(label, '') = COALESCE(?, '') AND idempotency_key = ?
            "#,
        )
        .bind(work_item_id.to_string())
        .bind(label)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.try_into()).transpose()
    }

    pub async fn get_delivery(&self, id: Uuid) -> Result<Delivery> {
        let row = sqlx::query_as::<_, DeliveryRow>(
            r#"
            SELECT id, work_item_id, label, kind, payload_ref, submitted_at, version, submitted_by
            FROM deliveries
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Delivery {} not found", id)))?;

        row.try_into()
    }

    pub async fn list_deliveries(&self, work_item_id: Uuid) -> Result<Vec<Delivery>> {
        let rows = sqlx::query_as::<_, DeliveryRow>(
            r#"
            SELECT id, work_item_id, label, kind, payload_ref, submitted_at, version, submitted_by
            FROM deliveries
            WHERE work_item_id = ?
            ORDER BY version ASC
            "#,
        )
        .bind(work_item_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    // Feedback operations

    pub async fn list_feedback(&self, work_item_id: Uuid) -> Result<Vec<Feedback>> {
        let rows = sqlx::query_as::<_, FeedbackRow>(
            r#"
            SELECT id, work_item_id, delivery_id, review_link_id, decision, notes, attachments,
                actor_kind, actor_id, reviewed_at
            FROM feedback
            WHERE work_item_id = ?
            "#,
        )
        .bind(work_item_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    /// Insert a decision and its counter/status effects in one transaction.
    ///
    /// Fails with `AlreadyDecided` if the batch's primary delivery already has
    /// feedback. Returns false, with nothing written, if a planned transition
    /// lost its compare-and-swap.
    pub async fn record_decision(&self, feedback: &Feedback, effect: &DecisionEffect) -> Result<bool> {
        let attachments = serde_json::to_string(&feedback.attachments)
            .map_err(|e| AppError::Internal(format!("Invalid attachments: {}", e)))?;

        let mut tx = self.pool.begin().await?;

        if let Some(link) = &effect.audit_link {
            insert_link_query(link).execute(&mut *tx).await?;
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO feedback (id, work_item_id, delivery_id, review_link_id, decision, notes,
                attachments, actor_kind, actor_id, reviewed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(feedback.id.to_string())
        .bind(feedback.work_item_id.to_string())
        .bind(feedback.delivery_id.to_string())
        .bind(feedback.review_link_id.map(|u| u.to_string()))
        .bind(feedback.decision.as_str())
        .bind(feedback.notes.as_deref())
        .bind(attachments)
        .bind(feedback.actor.kind_str())
        .bind(feedback.actor.id().to_string())
        .bind(feedback.reviewed_at)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                return Err(AppError::AlreadyDecided)
            }
            Err(e) => return Err(e.into()),
        }

        match &effect.transition {
            Some(plan) => {
                let result = transition_query(feedback.work_item_id, plan, effect.approved_increment)
                    .execute(&mut *tx)
                    .await?;
                if result.rows_affected() != 1 {
                    return Ok(false);
                }
            }
            None => {
                sqlx::query(
                    r#"
                    UPDATE work_items
                    SET approved_count = approved_count + ?,
                        revision_count = revision_count + ?,
                        updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(effect.approved_increment)
                .bind(effect.revision_increment)
                .bind(feedback.reviewed_at)
                .bind(feedback.work_item_id.to_string())
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(true)
    }

    // Review link operations

    pub async fn insert_review_link(&self, link: &ReviewLink) -> Result<()> {
        insert_link_query(link).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn get_review_link(&self, id: Uuid) -> Result<ReviewLink> {
        let row = sqlx::query_as::<_, ReviewLinkRow>(
            r#"
            SELECT id, token, target_kind, target_id, work_item_id, expires_at, is_active,
                internal, view_count, last_viewed_at, created_at
            FROM review_links
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Review link {} not found", id)))?;

        row.try_into()
    }

    pub async fn find_review_link_by_token(&self, token: &str) -> Result<Option<ReviewLink>> {
        let row = sqlx::query_as::<_, ReviewLinkRow>(
            r#"
            SELECT id, token, target_kind, target_id, work_item_id, expires_at, is_active,
                internal, view_count, last_viewed_at, created_at
            FROM review_links
            WHERE token = ?
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.try_into()).transpose()
    }

    pub async fn list_review_links(&self, work_item_id: Uuid) -> Result<Vec<ReviewLink>> {
        let rows = sqlx::query_as::<_, ReviewLinkRow>(
            r#"
            SELECT id, token, target_kind, target_id, work_item_id, expires_at, is_active,
                internal, view_count, last_viewed_at, created_at
            FROM review_links
            WHERE work_item_id = ?
            "#,
        )
        .bind(work_item_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    /// Count one view, provided the link is still active. The increment is a
    /// single statement, so concurrent views never lose updates.
    pub async fn record_link_view(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE review_links
            SET view_count = view_count + 1, last_viewed_at = ?
            WHERE id = ? AND is_active = 1 AND internal = 0
            "#,
        )
        .bind(now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn revoke_review_link(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("UPDATE review_links SET is_active = 0 WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Review link {} not found", id)));
        }
        Ok(())
    }
}

fn transition_query(
    id: Uuid,
    plan: &TransitionPlan,
    approved_increment: i64,
) -> Query<'static, Sqlite, SqliteArguments<'static>> {
    sqlx::query(
        r#"
        UPDATE work_items
        SET status = ?,
            started_at = COALESCE(?, started_at),
            completed_at = COALESCE(?, completed_at),
            revision_count = revision_count + ?,
            approved_count = approved_count + ?,
            updated_at = ?
        WHERE id = ? AND status = ?
        "#,
    )
    .bind(plan.to.as_str())
    .bind(plan.started_at)
    .bind(plan.completed_at)
    .bind(plan.revision_increment)
    .bind(approved_increment)
    .bind(plan.at)
    .bind(id.to_string())
    .bind(plan.from.as_str())
}

fn insert_link_query(link: &ReviewLink) -> Query<'static, Sqlite, SqliteArguments<'static>> {
    sqlx::query(
        r#"
        INSERT INTO review_links (id, token, target_kind, target_id, work_item_id, expires_at,
            is_active, internal, view_count, last_viewed_at, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(link.id.to_string())
    .bind(link.token.clone())
    .bind(link.target.kind_str())
    .bind(link.target.id().to_string())
    .bind(link.work_item_id.to_string())
    .bind(link.expires_at)
    .bind(link.is_active)
    .bind(link.internal)
    .bind(link.view_count)
    .bind(link.last_viewed_at)
    .bind(link.created_at)
}

// Internal row types for sqlx

fn parse_uuid(value: &str, field: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| AppError::Internal(format!("Invalid {} UUID: {}", field, e)))
}

#[derive(sqlx::FromRow)]
struct WorkItemRow {
    id: String,
    title: String,
    kind: String,
    assigned_to: Option<String>,
    deadline: Option<DateTime<Utc>>,
    status: String,
    workflow: String,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    allowed_duration_minutes: Option<i64>,
    revision_count: i64,
    approved_count: i64,
    manifest: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<WorkItemRow> for WorkItem {
    type Error = AppError;

    fn try_from(row: WorkItemRow) -> Result<Self> {
        Ok(WorkItem {
            id: parse_uuid(&row.id, "work item")?,
            title: row.title,
            kind: row
                .kind
                .parse()
                .map_err(|e| AppError::Internal(format!("Invalid kind: {}", e)))?,
            assigned_to: row
                .assigned_to
                .as_deref()
                .map(|s| parse_uuid(s, "assignee"))
                .transpose()?,
            deadline: row.deadline,
            status: row
                .status
                .parse()
                .map_err(|e| AppError::Internal(format!("Invalid status: {}", e)))?,
            workflow: row
                .workflow
                .parse()
                .map_err(|e| AppError::Internal(format!("Invalid workflow: {}", e)))?,
            started_at: row.started_at,
            completed_at: row.completed_at,
            allowed_duration_minutes: row.allowed_duration_minutes,
            revision_count: row.revision_count,
            approved_count: row.approved_count,
            manifest: serde_json::from_str(&row.manifest)
                .map_err(|e| AppError::Internal(format!("Invalid manifest: {}", e)))?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct DeliveryRow {
    id: String,
    work_item_id: String,
    label: Option<String>,
    kind: String,
    payload_ref: String,
    submitted_at: DateTime<Utc>,
    version: i64,
    submitted_by: String,
}

impl TryFrom<DeliveryRow> for Delivery {
    type Error = AppError;

    fn try_from(row: DeliveryRow) -> Result<Self> {
        Ok(Delivery {
            id: parse_uuid(&row.id, "delivery")?,
            work_item_id: parse_uuid(&row.work_item_id, "work item")?,
            label: row.label,
            kind: row
                .kind
                .parse()
                .map_err(|e| AppError::Internal(format!("Invalid delivery kind: {}", e)))?,
            payload_ref: row.payload_ref,
            submitted_at: row.submitted_at,
            version: row.version,
            submitted_by: parse_uuid(&row.submitted_by, "submitter")?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct FeedbackRow {
    id: String,
    work_item_id: String,
    delivery_id: String,
    review_link_id: Option<String>,
    decision: String,
    notes: Option<String>,
    attachments: String,
    actor_kind: String,
    actor_id: String,
    reviewed_at: DateTime<Utc>,
}

impl TryFrom<FeedbackRow> for Feedback {
    type Error = AppError;

    fn try_from(row: FeedbackRow) -> Result<Self> {
        let actor_id = parse_uuid(&row.actor_id, "actor")?;
        let actor = match row.actor_kind.as_str() {
            "member" => Actor::Member { id: actor_id },
            "guest" => Actor::Guest { link_id: actor_id },
            other => return Err(AppError::Internal(format!("Invalid actor kind: {}", other))),
        };

        Ok(Feedback {
            id: parse_uuid(&row.id, "feedback")?,
            work_item_id: parse_uuid(&row.work_item_id, "work item")?,
            delivery_id: parse_uuid(&row.delivery_id, "delivery")?,
            review_link_id: row
                .review_link_id
                .as_deref()
                .map(|s| parse_uuid(s, "review link"))
                .transpose()?,
            decision: row
                .decision
                .parse()
                .map_err(|e| AppError::Internal(format!("Invalid decision: {}", e)))?,
            notes: row.notes,
            attachments: serde_json::from_str(&row.attachments)
                .map_err(|e| AppError::Internal(format!("Invalid attachments: {}", e)))?,
            actor,
            reviewed_at: row.reviewed_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ReviewLinkRow {
    id: String,
    token: String,
    target_kind: String,
    target_id: String,
    work_item_id: String,
    expires_at: DateTime<Utc>,
    is_active: bool,
    internal: bool,
    view_count: i64,
    last_viewed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<ReviewLinkRow> for ReviewLink {
    type Error = AppError;

    fn try_from(row: ReviewLinkRow) -> Result<Self> {
        let target_id = parse_uuid(&row.target_id, "target")?;
        Ok(ReviewLink {
            id: parse_uuid(&row.id, "review link")?,
            token: row.token,
            target: ReviewTarget::from_parts(&row.target_kind, target_id)
                .map_err(AppError::Internal)?,
            work_item_id: parse_uuid(&row.work_item_id, "work item")?,
            expires_at: row.expires_at,
            is_active: row.is_active,
            internal: row.internal,
            view_count: row.view_count,
            last_viewed_at: row.last_viewed_at,
            created_at: row.created_at,
        })
    }
}
