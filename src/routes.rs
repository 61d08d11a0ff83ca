//! HTTP routes

use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{Actor, Decision, NewDelivery, ReviewTarget};
use crate::review::{DecisionRequest, NewWorkItem, WorkItem, WorkItemStatus};
use crate::{websocket, AppState};

/// Header carrying the caller's identity, set by the identity proxy in front of us
pub const ACTOR_HEADER: &str = "x-actor-id";

/// Build the application router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/work-items", post(create_work_item).get(list_work_items))
        .route(
            "/work-items/:id",
            get(get_work_item).delete(delete_work_item),
        )
        .route("/work-items/:id/assign", post(assign))
        .route("/work-items/:id/start", post(start))
        .route("/work-items/:id/submit", post(submit_for_review))
        .route("/work-items/:id/internal-review", post(internal_review))
        .route("/work-items/:id/acknowledge", post(acknowledge_revision))
        .route("/work-items/:id/complete", post(complete))
        .route("/work-items/:id/cancel", post(cancel))
        .route(
            "/work-items/:id/deliveries",
            get(list_deliveries).post(submit_delivery),
        )
        .route("/work-items/:id/batches", get(get_batches))
        .route("/work-items/:id/lateness", get(lateness))
        .route("/decisions", post(apply_decision))
        .route("/review-links", post(issue_review_link))
        .route("/review-links/:id", delete(revoke_review_link))
        .route("/review/:token", get(resolve_review_link))
        .route("/review/:token/decisions", post(apply_guest_decision))
        .route("/ws", get(websocket::handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Authenticated team member making the request
#[derive(Debug, Clone, Copy)]
pub struct ActorId(pub Uuid);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for ActorId {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(ACTOR_HEADER)
            .ok_or_else(|| AppError::Validation(format!("Missing {} header", ACTOR_HEADER)))?;
        value
            .to_str()
            .ok()
            .and_then(|s| Uuid::parse_str(s.trim()).ok())
            .map(ActorId)
            .ok_or_else(|| AppError::Validation(format!("Malformed {} header", ACTOR_HEADER)))
    }
}

/// A work item with its lateness at the time of the read
#[derive(Debug, Serialize)]
pub struct WorkItemView {
    #[serde(flatten)]
    pub item: WorkItem,
    pub is_late: bool,
}

impl WorkItemView {
    fn at(item: WorkItem, now: DateTime<Utc>) -> Self {
        let is_late = item.is_late(now);
        Self { item, is_late }
    }
}

async fn health() -> &'static str {
    "ok"
}

// Work items

async fn create_work_item(
    State(state): State<Arc<AppState>>,
    Json(new): Json<NewWorkItem>,
) -> Result<(StatusCode, Json<WorkItemView>)> {
    let item = state.engine.create_work_item(new).await?;
    let now = state.engine.now();
    Ok((StatusCode::CREATED, Json(WorkItemView::at(item, now))))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub status: Option<WorkItemStatus>,
}

async fn list_work_items(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<WorkItemView>>> {
    let now = state.engine.now();
    let items = state.engine.list_work_items(query.status).await?;
    Ok(Json(
        items
            .into_iter()
            .map(|item| WorkItemView::at(item, now))
            .collect(),
    ))
}

async fn get_work_item(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<WorkItemView>> {
    let item = state.engine.get_work_item(id).await?;
    Ok(Json(WorkItemView::at(item, state.engine.now())))
}

async fn delete_work_item(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    state.engine.delete_work_item(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub assignee: Uuid,
}

async fn assign(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<AssignRequest>,
) -> Result<Json<WorkItemView>> {
    let item = state.engine.assign(id, req.assignee).await?;
    Ok(Json(WorkItemView::at(item, state.engine.now())))
}

// Lifecycle

async fn start(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    ActorId(actor): ActorId,
) -> Result<Json<WorkItemView>> {
    let item = state.engine.start(id, actor).await?;
    Ok(Json(WorkItemView::at(item, state.engine.now())))
}

async fn submit_for_review(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    ActorId(actor): ActorId,
) -> Result<Json<WorkItemView>> {
    let item = state.engine.submit_for_review(id, actor).await?;
    Ok(Json(WorkItemView::at(item, state.engine.now())))
}

#[derive(Debug, Deserialize)]
pub struct InternalReviewRequest {
    pub verdict: Decision,
    #[serde(default)]
    pub notes: Option<String>,
}

async fn internal_review(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    ActorId(actor): ActorId,
    Json(req): Json<InternalReviewRequest>,
) -> Result<Json<WorkItemView>> {
    let item = state
        .engine
        .internal_review(id, req.verdict, req.notes, actor)
        .await?;
    Ok(Json(WorkItemView::at(item, state.engine.now())))
}

async fn acknowledge_revision(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    ActorId(actor): ActorId,
) -> Result<Json<WorkItemView>> {
    let item = state.engine.acknowledge_revision(id, actor).await?;
    Ok(Json(WorkItemView::at(item, state.engine.now())))
}

async fn complete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    ActorId(actor): ActorId,
) -> Result<Json<WorkItemView>> {
    let item = state.engine.complete(id, actor).await?;
    Ok(Json(WorkItemView::at(item, state.engine.now())))
}

async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    ActorId(actor): ActorId,
) -> Result<Json<WorkItemView>> {
    let item = state.engine.cancel(id, actor).await?;
    Ok(Json(WorkItemView::at(item, state.engine.now())))
}

// Deliveries and batches

async fn list_deliveries(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Response> {
    let deliveries = state.engine.list_deliveries(id).await?;
    Ok(Json(deliveries).into_response())
}

async fn submit_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    ActorId(actor): ActorId,
    Json(new): Json<NewDelivery>,
) -> Result<Response> {
    let delivery = state.engine.submit_delivery(id, new, actor).await?;
    Ok((StatusCode::CREATED, Json(delivery)).into_response())
}

#[derive(Debug, Default, Deserialize)]
pub struct BatchQuery {
    /// Return every round of `label` instead of the current round of each sub-item
    #[serde(default)]
    pub history: bool,
    /// Sub-item label; absent means whole-item deliveries
    #[serde(default)]
    pub label: Option<String>,
}

async fn get_batches(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<BatchQuery>,
) -> Result<Response> {
    if query.history {
        let rounds = state
            .engine
            .batch_history(id, query.label.as_deref())
            .await?;
        return Ok(Json(rounds).into_response());
    }
    let views = state.engine.get_batches(id).await?;
    Ok(Json(views).into_response())
}

#[derive(Debug, Deserialize)]
pub struct LatenessQuery {
    #[serde(default)]
    pub at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct LatenessResponse {
    pub work_item_id: Uuid,
    pub is_late: bool,
    pub at: DateTime<Utc>,
}

async fn lateness(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<LatenessQuery>,
) -> Result<Json<LatenessResponse>> {
    let at = query.at.unwrap_or_else(|| state.engine.now());
    let is_late = state.engine.is_late(id, at).await?;
    Ok(Json(LatenessResponse {
        work_item_id: id,
        is_late,
        at,
    }))
}

// Decisions

async fn apply_decision(
    State(state): State<Arc<AppState>>,
    ActorId(actor): ActorId,
    Json(req): Json<DecisionRequest>,
) -> Result<Response> {
    let feedback = state
        .engine
        .apply_decision(req, Actor::member(actor))
        .await?;
    Ok((StatusCode::CREATED, Json(feedback)).into_response())
}

async fn apply_guest_decision(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    Json(req): Json<DecisionRequest>,
) -> Result<Response> {
    let feedback = state.engine.apply_guest_decision(&token, req).await?;
    Ok((StatusCode::CREATED, Json(feedback)).into_response())
}

// Review links

#[derive(Debug, Deserialize)]
pub struct IssueLinkRequest {
    pub target: ReviewTarget,
    /// Lifetime in seconds; the server default applies when absent
    #[serde(default)]
    pub ttl_secs: Option<i64>,
}

async fn issue_review_link(
    State(state): State<Arc<AppState>>,
    Json(req): Json<IssueLinkRequest>,
) -> Result<Response> {
    let ttl = req
        .ttl_secs
        .map(|secs| {
            Duration::try_seconds(secs)
                .ok_or_else(|| AppError::Validation("Review link TTL is out of range".to_string()))
        })
        .transpose()?;
    let link = state.engine.issue_review_link(req.target, ttl).await?;
    Ok((StatusCode::CREATED, Json(link)).into_response())
}

async fn revoke_review_link(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Response> {
    let link = state.engine.revoke_review_link(id).await?;
    Ok(Json(link).into_response())
}

async fn resolve_review_link(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<Response> {
    let resolved = state.engine.resolve_review_link(&token).await?;
    Ok(Json(resolved).into_response())
}
