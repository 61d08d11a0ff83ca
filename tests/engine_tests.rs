//! Review engine integration tests

use chrono::{DateTime, Duration, Utc};
use handoff::clock::ManualClock;
use handoff::error::AppError;
use handoff::models::{Actor, Attachment, Decision, NewDelivery, ReviewTarget};
use handoff::review::{
    BatchRef, DecisionRequest, EngineConfig, NewWorkItem, ReviewEngine, ReviewEvent, SubItem,
    SubItemKind, SubItemStatus, WorkItem, WorkItemKind, WorkItemStatus, WorkflowVariant,
};
use handoff::store::{Store, MIGRATOR};
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use uuid::Uuid;

fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-06-03T09:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

async fn setup_with(config: EngineConfig) -> (Arc<ReviewEngine>, Arc<ManualClock>) {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");
    MIGRATOR.run(&pool).await.expect("Failed to run migrations");

    let clock = Arc::new(ManualClock::new(t0()));
    let engine = ReviewEngine::new(Store::new(pool), clock.clone(), config);
    (Arc::new(engine), clock)
}

async fn setup() -> (Arc<ReviewEngine>, Arc<ManualClock>) {
    setup_with(EngineConfig::default()).await
}

async fn create_item(engine: &ReviewEngine, producer: Uuid, labels: &[&str]) -> WorkItem {
    let mut new = NewWorkItem::new("Weekly content", WorkItemKind::Design).assigned_to(producer);
    for (i, label) in labels.iter().enumerate() {
        new = new.with_sub_item(SubItem::new(SubItemKind::Post, *label, i as u32 + 1));
    }
    engine.create_work_item(new).await.unwrap()
}

async fn current_batch(engine: &ReviewEngine, id: Uuid, label: &str) -> BatchRef {
    engine
        .get_batches(id)
        .await
        .unwrap()
        .into_iter()
        .find(|v| v.label.as_deref() == Some(label))
        .and_then(|v| v.batch)
        .expect("label has a current batch")
}

/// Drive an item to review_client with one delivery per label
async fn item_in_client_review(
    engine: &ReviewEngine,
    clock: &ManualClock,
    labels: &[&str],
) -> (WorkItem, Uuid) {
    let producer = Uuid::new_v4();
    let item = create_item(engine, producer, labels).await;
    engine.start(item.id, producer).await.unwrap();
    clock.advance(Duration::minutes(10));
    for label in labels {
        engine
            .submit_delivery(
                item.id,
                NewDelivery::file(Some(*label), format!("{label}.png")),
                producer,
            )
            .await
            .unwrap();
    }
    engine.submit_for_review(item.id, producer).await.unwrap();
    let item = engine
        .internal_review(item.id, Decision::Approved, None, Uuid::new_v4())
        .await
        .unwrap();
    assert_eq!(item.status, WorkItemStatus::ReviewClient);
    (item, producer)
}

#[tokio::test]
async fn scenario_a_start_deliver_approve() {
    let (engine, clock) = setup().await;
    let producer = Uuid::new_v4();
    let item = create_item(&engine, producer, &["Miniature 1"]).await;
    assert_eq!(item.status, WorkItemStatus::New);
    assert!(item.deadline.is_none());

    let started = engine.start(item.id, producer).await.unwrap();
    assert_eq!(started.status, WorkItemStatus::Active);
    assert_eq!(started.started_at, Some(t0()));

    clock.advance(Duration::minutes(5));
    engine
        .submit_delivery(item.id, NewDelivery::file(Some("Miniature 1"), "m1.png"), producer)
        .await
        .unwrap();

    let views = engine.get_batches(item.id).await.unwrap();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].status, SubItemStatus::Delivered);

    let batch = views[0].batch.clone().unwrap();
    engine
        .apply_decision(DecisionRequest::approve(batch), Actor::member(Uuid::new_v4()))
        .await
        .unwrap();
    let views = engine.get_batches(item.id).await.unwrap();
    assert_eq!(views[0].status, SubItemStatus::Approved);

    let err = engine.start(item.id, producer).await.unwrap_err();
    assert!(matches!(
        err,
        AppError::InvalidTransition {
            current: WorkItemStatus::Active,
            requested: WorkItemStatus::Active
        }
    ));
    let stored = engine.get_work_item(item.id).await.unwrap();
    assert_eq!(stored.approved_count, 1);
    assert_eq!(stored.status, WorkItemStatus::Active);
}

#[tokio::test]
async fn scenario_b_rounds_split_after_window() {
    let (engine, clock) = setup().await;
    let producer = Uuid::new_v4();
    let item = create_item(&engine, producer, &["Post 1"]).await;

    let first = engine
        .submit_delivery(item.id, NewDelivery::file(Some("Post 1"), "p1-a.png"), producer)
        .await
        .unwrap();
    clock.advance(Duration::seconds(30));
    let second = engine
        .submit_delivery(item.id, NewDelivery::file(Some("Post 1"), "p1-b.png"), producer)
        .await
        .unwrap();

    let views = engine.get_batches(item.id).await.unwrap();
    assert_eq!(views[0].files.len(), 2);
    assert_eq!(views[0].files[0].id, first.id);
    assert_eq!(views[0].primary_delivery.as_ref().unwrap().id, second.id);

    engine
        .apply_decision(
            DecisionRequest::approve(views[0].batch.clone().unwrap()),
            Actor::member(Uuid::new_v4()),
        )
        .await
        .unwrap();

    clock.advance(Duration::minutes(5));
    let third = engine
        .submit_delivery(item.id, NewDelivery::file(Some("Post 1"), "p1-c.png"), producer)
        .await
        .unwrap();
    assert_eq!(third.version, 3);

    let views = engine.get_batches(item.id).await.unwrap();
    assert_eq!(views[0].status, SubItemStatus::Delivered);
    assert_eq!(views[0].files.len(), 1);

    let history = engine.batch_history(item.id, Some("Post 1")).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].primary.id, third.id);
    assert_eq!(history[1].primary.id, second.id);
    assert_eq!(history[1].status(), SubItemStatus::Approved);
}

#[tokio::test]
async fn scenario_c_link_expires() {
    let (engine, clock) = setup().await;
    let item = create_item(&engine, Uuid::new_v4(), &[]).await;

    let link = engine
        .issue_review_link(ReviewTarget::WorkItem(item.id), Some(Duration::seconds(1)))
        .await
        .unwrap();
    assert_eq!(link.expires_at, t0() + Duration::seconds(1));

    clock.advance(Duration::seconds(2));
    let err = engine.resolve_review_link(&link.token).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidLink));

    let stored = engine.store().get_review_link(link.id).await.unwrap();
    assert_eq!(stored.view_count, 0);
}

#[tokio::test]
async fn scenario_d_revision_needs_content() {
    let (engine, clock) = setup().await;
    let (item, producer) = item_in_client_review(&engine, &clock, &["Post 1"]).await;
    let batch = current_batch(&engine, item.id, "Post 1").await;
    let reviewer = Actor::member(Uuid::new_v4());

    let err = engine
        .apply_decision(DecisionRequest::request_revision(batch.clone(), ""), reviewer)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::EmptyFeedback));
    assert_eq!(engine.get_work_item(item.id).await.unwrap().revision_count, 0);

    engine
        .apply_decision(
            DecisionRequest::request_revision(batch, "Logo is too small"),
            reviewer,
        )
        .await
        .unwrap();
    let stored = engine.get_work_item(item.id).await.unwrap();
    assert_eq!(stored.revision_count, 1);
    assert_eq!(stored.status, WorkItemStatus::RevisionRequested);

    clock.advance(Duration::hours(1));
    let restarted = engine.acknowledge_revision(item.id, producer).await.unwrap();
    assert_eq!(restarted.status, WorkItemStatus::Active);
    assert_eq!(restarted.started_at, Some(engine.now()));
}

#[tokio::test]
async fn revision_with_attachment_only() {
    let (engine, clock) = setup().await;
    let (item, _) = item_in_client_review(&engine, &clock, &["Post 1"]).await;
    let batch = current_batch(&engine, item.id, "Post 1").await;

    let fb = engine
        .apply_decision(
            DecisionRequest::request_revision(batch, "")
                .with_attachment(Attachment::audio("voice/1.ogg", 90)),
            Actor::member(Uuid::new_v4()),
        )
        .await
        .unwrap();
    assert!(fb.notes.is_none());
    assert_eq!(fb.attachments.len(), 1);
}

#[tokio::test]
async fn property_double_transition_has_one_winner() {
    let (engine, _clock) = setup().await;
    let producer = Uuid::new_v4();
    let item = create_item(&engine, producer, &[]).await;

    let a = tokio::spawn({
        let engine = engine.clone();
        async move { engine.start(item.id, producer).await }
    });
    let b = tokio::spawn({
        let engine = engine.clone();
        async move { engine.start(item.id, producer).await }
    });
    let results = [a.await.unwrap(), b.await.unwrap()];

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(AppError::InvalidTransition { .. }))));
}

#[tokio::test]
async fn property_failed_transition_leaves_state() {
    let (engine, _clock) = setup().await;
    let producer = Uuid::new_v4();
    let item = create_item(&engine, producer, &[]).await;

    assert!(matches!(
        engine.complete(item.id, producer).await,
        Err(AppError::InvalidTransition {
            current: WorkItemStatus::New,
            requested: WorkItemStatus::Completed
        })
    ));
    assert!(matches!(
        engine.submit_for_review(item.id, producer).await,
        Err(AppError::InvalidTransition { .. })
    ));
    assert!(matches!(
        engine.start(item.id, Uuid::new_v4()).await,
        Err(AppError::NotAssignee)
    ));

    let stored = engine.get_work_item(item.id).await.unwrap();
    assert_eq!(stored.status, WorkItemStatus::New);
    assert!(stored.started_at.is_none());
}

#[tokio::test]
async fn property_decision_is_final() {
    let (engine, clock) = setup().await;
    let (item, _) = item_in_client_review(&engine, &clock, &["Post 1", "Post 2"]).await;
    let batch = current_batch(&engine, item.id, "Post 1").await;
    let reviewer = Actor::member(Uuid::new_v4());

    engine
        .apply_decision(DecisionRequest::approve(batch.clone()), reviewer)
        .await
        .unwrap();
    for _ in 0..3 {
        let err = engine
            .apply_decision(DecisionRequest::approve(batch.clone()), reviewer)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AlreadyDecided));
    }
    let err = engine
        .apply_decision(DecisionRequest::request_revision(batch, "changed my mind"), reviewer)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::AlreadyDecided));

    let stored = engine.get_work_item(item.id).await.unwrap();
    assert_eq!(stored.approved_count, 1);
    assert_eq!(stored.revision_count, 0);
}

#[tokio::test]
async fn property_concurrent_decisions_count_once() {
    let (engine, clock) = setup().await;
    let (item, _) = item_in_client_review(&engine, &clock, &["Post 1", "Post 2"]).await;
    let batch = current_batch(&engine, item.id, "Post 1").await;

    let mut handles = Vec::new();
    for _ in 0..4 {
        let engine = engine.clone();
        let batch = batch.clone();
        handles.push(tokio::spawn(async move {
            engine
                .apply_decision(DecisionRequest::approve(batch), Actor::member(Uuid::new_v4()))
                .await
        }));
    }
    let mut ok = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => ok += 1,
            Err(e) => assert!(matches!(e, AppError::AlreadyDecided), "{e}"),
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(engine.get_work_item(item.id).await.unwrap().approved_count, 1);
}

#[tokio::test]
async fn property_token_usable_only_while_active_and_unexpired() {
    let (engine, clock) = setup().await;
    let item = create_item(&engine, Uuid::new_v4(), &[]).await;
    let link = engine
        .issue_review_link(ReviewTarget::WorkItem(item.id), Some(Duration::hours(1)))
        .await
        .unwrap();

    let resolved = engine.resolve_review_link(&link.token).await.unwrap();
    assert_eq!(resolved.link.view_count, 1);
    assert_eq!(resolved.work_item.id, item.id);

    // Exactly at expiry is already too late
    clock.set(link.expires_at);
    assert!(matches!(
        engine.resolve_review_link(&link.token).await,
        Err(AppError::InvalidLink)
    ));
    clock.set(t0());
    assert!(engine.resolve_review_link(&link.token).await.is_ok());

    engine.revoke_review_link(link.id).await.unwrap();
    engine.revoke_review_link(link.id).await.unwrap();
    for _ in 0..3 {
        assert!(matches!(
            engine.resolve_review_link(&link.token).await,
            Err(AppError::InvalidLink)
        ));
    }
    assert!(matches!(
        engine.resolve_review_link("no-such-token").await,
        Err(AppError::InvalidLink)
    ));

    let stored = engine.store().get_review_link(link.id).await.unwrap();
    assert_eq!(stored.view_count, 2);
    assert!(!stored.is_active);

    let fresh = engine
        .issue_review_link(ReviewTarget::WorkItem(item.id), None)
        .await
        .unwrap();
    assert_ne!(fresh.token, link.token);
    assert_eq!(fresh.expires_at, t0() + Duration::days(7));
    assert!(engine.resolve_review_link(&fresh.token).await.is_ok());
}

#[tokio::test]
async fn property_concurrent_views_all_count() {
    let (engine, _clock) = setup().await;
    let item = create_item(&engine, Uuid::new_v4(), &[]).await;
    let link = engine
        .issue_review_link(ReviewTarget::WorkItem(item.id), None)
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..20 {
        let engine = engine.clone();
        let token = link.token.clone();
        handles.push(tokio::spawn(async move {
            engine.resolve_review_link(&token).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let stored = engine.store().get_review_link(link.id).await.unwrap();
    assert_eq!(stored.view_count, 20);
    assert!(stored.last_viewed_at.is_some());
}

#[tokio::test]
async fn last_approval_completes_item() {
    let (engine, clock) = setup().await;
    let (item, _) = item_in_client_review(&engine, &clock, &["Post 1", "Post 2"]).await;
    let reviewer = Actor::member(Uuid::new_v4());

    let first = current_batch(&engine, item.id, "Post 1").await;
    engine
        .apply_decision(DecisionRequest::approve(first), reviewer)
        .await
        .unwrap();
    assert_eq!(
        engine.get_work_item(item.id).await.unwrap().status,
        WorkItemStatus::ReviewClient
    );
    assert!(matches!(
        engine.complete(item.id, Uuid::new_v4()).await,
        Err(AppError::InvalidTransition { .. })
    ));

    let second = current_batch(&engine, item.id, "Post 2").await;
    engine
        .apply_decision(DecisionRequest::approve(second), reviewer)
        .await
        .unwrap();
    let stored = engine.get_work_item(item.id).await.unwrap();
    assert_eq!(stored.status, WorkItemStatus::Completed);
    assert_eq!(stored.completed_at, Some(engine.now()));
    assert_eq!(stored.approved_count, 2);
    assert!(!stored.is_late(engine.now() + Duration::days(365)));
}

#[tokio::test]
async fn decisions_refused_on_terminal_items() {
    let (engine, clock) = setup().await;
    let (item, _) = item_in_client_review(&engine, &clock, &["Post 1"]).await;
    let batch = current_batch(&engine, item.id, "Post 1").await;
    engine.cancel(item.id, Uuid::new_v4()).await.unwrap();

    let err = engine
        .apply_decision(DecisionRequest::approve(batch), Actor::member(Uuid::new_v4()))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::InvalidTransition {
            current: WorkItemStatus::Cancelled,
            ..
        }
    ));
    assert!(matches!(
        engine.cancel(item.id, Uuid::new_v4()).await,
        Err(AppError::InvalidTransition { .. })
    ));
    assert!(matches!(
        engine
            .submit_delivery(item.id, NewDelivery::file(None, "late.png"), Uuid::new_v4())
            .await,
        Err(AppError::Conflict(_))
    ));
}

#[tokio::test]
async fn guest_decision_through_link() {
    let (engine, clock) = setup().await;
    let (item, _) = item_in_client_review(&engine, &clock, &["Post 1"]).await;
    let link = engine
        .issue_review_link(ReviewTarget::WorkItem(item.id), None)
        .await
        .unwrap();

    let resolved = engine.resolve_review_link(&link.token).await.unwrap();
    let batch = resolved.sub_items[0].batch.clone().unwrap();

    let fb = engine
        .apply_guest_decision(&link.token, DecisionRequest::approve(batch))
        .await
        .unwrap();
    assert_eq!(fb.actor, Actor::Guest { link_id: link.id });
    assert_eq!(fb.review_link_id, Some(link.id));
    assert_eq!(
        engine.get_work_item(item.id).await.unwrap().status,
        WorkItemStatus::Completed
    );
    assert_eq!(
        engine.store().get_review_link(link.id).await.unwrap().view_count,
        2
    );
}

#[tokio::test]
async fn guest_cannot_decide_outside_link_scope() {
    let (engine, clock) = setup().await;
    let (item, _) = item_in_client_review(&engine, &clock, &["Post 1", "Post 2"]).await;
    let deliveries = engine.list_deliveries(item.id).await.unwrap();
    let post_1 = deliveries
        .iter()
        .find(|d| d.label.as_deref() == Some("Post 1"))
        .unwrap();
    let link = engine
        .issue_review_link(ReviewTarget::Delivery(post_1.id), None)
        .await
        .unwrap();

    let resolved = engine.resolve_review_link(&link.token).await.unwrap();
    assert_eq!(resolved.sub_items.len(), 1);
    assert_eq!(resolved.delivery.as_ref().unwrap().id, post_1.id);

    let other = current_batch(&engine, item.id, "Post 2").await;
    let err = engine
        .apply_guest_decision(&link.token, DecisionRequest::approve(other))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn guest_decision_with_revoked_link() {
    let (engine, clock) = setup().await;
    let (item, _) = item_in_client_review(&engine, &clock, &["Post 1"]).await;
    let link = engine
        .issue_review_link(ReviewTarget::WorkItem(item.id), None)
        .await
        .unwrap();
    let batch = current_batch(&engine, item.id, "Post 1").await;
    engine.revoke_review_link(link.id).await.unwrap();

    let err = engine
        .apply_guest_decision(&link.token, DecisionRequest::approve(batch))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidLink));
}

#[tokio::test]
async fn guest_delivery_link_does_not_reach_later_rounds() {
    let (engine, clock) = setup().await;
    let (item, producer) = item_in_client_review(&engine, &clock, &["Post 1"]).await;
    let first = engine.list_deliveries(item.id).await.unwrap()[0].clone();
    let link = engine
        .issue_review_link(ReviewTarget::Delivery(first.id), None)
        .await
        .unwrap();

    clock.advance(Duration::minutes(10));
    let second = engine
        .submit_delivery(item.id, NewDelivery::file(Some("Post 1"), "p1-v2.png"), producer)
        .await
        .unwrap();
    let batch = current_batch(&engine, item.id, "Post 1").await;
    assert_ne!(batch.primary_delivery_id, first.id);
    assert!(engine.list_deliveries(item.id).await.unwrap().iter().any(|d| d.id == second.id));

    let err = engine
        .apply_guest_decision(&link.token, DecisionRequest::approve(batch))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let views = engine.get_batches(item.id).await.unwrap();
    assert_eq!(views[0].status, SubItemStatus::Delivered);
    assert!(engine.store().list_feedback(item.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn invalid_guest_request_does_not_count_a_view() {
    let (engine, clock) = setup().await;
    let (item, _) = item_in_client_review(&engine, &clock, &["Post 1"]).await;
    let link = engine
        .issue_review_link(ReviewTarget::WorkItem(item.id), None)
        .await
        .unwrap();
    let batch = current_batch(&engine, item.id, "Post 1").await;

    let err = engine
        .apply_guest_decision(&link.token, DecisionRequest::request_revision(batch, "   "))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::EmptyFeedback));
    assert_eq!(
        engine.store().get_review_link(link.id).await.unwrap().view_count,
        0
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_last_approvals_complete_item() {
    for _ in 0..10 {
        let (engine, clock) = setup().await;
        let (item, _) = item_in_client_review(&engine, &clock, &["Post 1", "Post 2"]).await;

        let mut handles = Vec::new();
        for label in ["Post 1", "Post 2"] {
            let engine = engine.clone();
            let batch = current_batch(&engine, item.id, label).await;
            handles.push(tokio::spawn(async move {
                engine
                    .apply_decision(DecisionRequest::approve(batch), Actor::member(Uuid::new_v4()))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let stored = engine.get_work_item(item.id).await.unwrap();
        assert_eq!(stored.approved_count, 2);
        assert_eq!(stored.status, WorkItemStatus::Completed);
        assert!(stored.completed_at.is_some());
    }
}

#[tokio::test]
async fn oversized_allowed_duration_is_rejected() {
    let (engine, _clock) = setup().await;
    let err = engine
        .create_work_item(
            NewWorkItem::new("Forever", WorkItemKind::Video).with_allowed_duration(i64::MAX),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    assert!(engine.list_work_items(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn oversized_link_ttl_is_rejected() {
    let (engine, _clock) = setup().await;
    let item = create_item(&engine, Uuid::new_v4(), &[]).await;
    let target = ReviewTarget::WorkItem(item.id);

    for ttl in [Duration::seconds(1_000_000_000_000_000), Duration::days(366)] {
        let err = engine
            .issue_review_link(target, Some(ttl))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
    let link = engine
        .issue_review_link(target, Some(Duration::days(365)))
        .await
        .unwrap();
    assert_eq!(link.expires_at, t0() + Duration::days(365));
    assert_eq!(engine.store().list_review_links(item.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn audit_links_can_be_disabled() {
    let (engine, _clock) = setup_with(EngineConfig {
        audit_links: false,
        ..EngineConfig::default()
    })
    .await;
    let producer = Uuid::new_v4();
    let item = create_item(&engine, producer, &["Post 1"]).await;
    engine
        .submit_delivery(item.id, NewDelivery::file(Some("Post 1"), "p.png"), producer)
        .await
        .unwrap();
    let batch = current_batch(&engine, item.id, "Post 1").await;

    let fb = engine
        .apply_decision(DecisionRequest::approve(batch), Actor::member(Uuid::new_v4()))
        .await
        .unwrap();
    assert!(fb.review_link_id.is_none());
    assert!(engine
        .store()
        .list_review_links(item.id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn submit_for_review_needs_fresh_delivery() {
    let (engine, clock) = setup().await;
    let (item, producer) = item_in_client_review(&engine, &clock, &["Post 1"]).await;
    let batch = current_batch(&engine, item.id, "Post 1").await;
    engine
        .apply_decision(
            DecisionRequest::request_revision(batch, "Brighter"),
            Actor::member(Uuid::new_v4()),
        )
        .await
        .unwrap();

    clock.advance(Duration::minutes(30));
    engine.acknowledge_revision(item.id, producer).await.unwrap();
    assert!(matches!(
        engine.submit_for_review(item.id, producer).await,
        Err(AppError::Conflict(_))
    ));

    clock.advance(Duration::minutes(30));
    engine
        .submit_delivery(item.id, NewDelivery::file(Some("Post 1"), "p1-v2.png"), producer)
        .await
        .unwrap();
    let item = engine.submit_for_review(item.id, producer).await.unwrap();
    assert_eq!(item.status, WorkItemStatus::ReviewAdmin);
    assert_eq!(item.revision_count, 1);
}

#[tokio::test]
async fn internal_review_variants() {
    let (engine, clock) = setup().await;
    let producer = Uuid::new_v4();
    let item = engine
        .create_work_item(
            NewWorkItem::new("Reel", WorkItemKind::Video)
                .assigned_to(producer)
                .with_workflow(WorkflowVariant::Direct),
        )
        .await
        .unwrap();
    engine.start(item.id, producer).await.unwrap();
    clock.advance(Duration::minutes(1));
    engine
        .submit_delivery(item.id, NewDelivery::link(None, "https://vimeo.com/1"), producer)
        .await
        .unwrap();
    engine.submit_for_review(item.id, producer).await.unwrap();

    let reviewer = Uuid::new_v4();
    assert!(matches!(
        engine
            .internal_review(
                item.id,
                Decision::RevisionRequested,
                Some("  ".into()),
                reviewer
            )
            .await,
        Err(AppError::EmptyFeedback)
    ));

    let rejected = engine
        .internal_review(
            item.id,
            Decision::RevisionRequested,
            Some("Audio is clipping".into()),
            reviewer,
        )
        .await
        .unwrap();
    assert_eq!(rejected.status, WorkItemStatus::RevisionRequested);
    assert_eq!(rejected.revision_count, 1);

    engine.acknowledge_revision(item.id, producer).await.unwrap();
    clock.advance(Duration::minutes(1));
    engine
        .submit_delivery(item.id, NewDelivery::link(None, "https://vimeo.com/2"), producer)
        .await
        .unwrap();
    engine.submit_for_review(item.id, producer).await.unwrap();
    let done = engine
        .internal_review(item.id, Decision::Approved, None, reviewer)
        .await
        .unwrap();
    assert_eq!(done.status, WorkItemStatus::Completed);
    assert!(done.completed_at.is_some());
}

#[tokio::test]
async fn idempotent_delivery_submission() {
    let (engine, _clock) = setup().await;
    let producer = Uuid::new_v4();
    let item = create_item(&engine, producer, &["Post 1"]).await;
    let mut events = engine.subscribe();

    let new = NewDelivery::file(Some("Post 1"), "p1.png").with_idempotency_key("upload-42");
    let first = engine
        .submit_delivery(item.id, new.clone(), producer)
        .await
        .unwrap();
    let retry = engine.submit_delivery(item.id, new, producer).await.unwrap();
    assert_eq!(first, retry);
    assert_eq!(engine.list_deliveries(item.id).await.unwrap().len(), 1);

    assert!(matches!(
        events.try_recv().unwrap(),
        ReviewEvent::DeliverySubmitted { .. }
    ));
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn lateness_is_derived_on_read() {
    let (engine, clock) = setup().await;
    let producer = Uuid::new_v4();
    let item = engine
        .create_work_item(
            NewWorkItem::new("Banner", WorkItemKind::Design)
                .assigned_to(producer)
                .with_deadline(t0() + Duration::days(1)),
        )
        .await
        .unwrap();

    assert!(!engine.is_late(item.id, t0()).await.unwrap());
    assert!(engine
        .is_late(item.id, t0() + Duration::days(2))
        .await
        .unwrap());

    // Reading never writes
    clock.advance(Duration::days(2));
    assert_eq!(
        engine.get_work_item(item.id).await.unwrap().status,
        WorkItemStatus::New
    );
    // Only active items are persisted as late
    assert_eq!(engine.reconcile_lateness().await.unwrap(), 0);
}

#[tokio::test]
async fn assign_only_before_start() {
    let (engine, _clock) = setup().await;
    let item = engine
        .create_work_item(NewWorkItem::new("Logo", WorkItemKind::Design))
        .await
        .unwrap();
    let producer = Uuid::new_v4();

    assert!(matches!(
        engine.start(item.id, producer).await,
        Err(AppError::NotAssignee)
    ));
    let assigned = engine.assign(item.id, producer).await.unwrap();
    assert_eq!(assigned.assigned_to, Some(producer));
    engine.start(item.id, producer).await.unwrap();

    assert!(matches!(
        engine.assign(item.id, Uuid::new_v4()).await,
        Err(AppError::Conflict(_))
    ));
}

#[tokio::test]
async fn delete_removes_everything() {
    let (engine, clock) = setup().await;
    let (item, _) = item_in_client_review(&engine, &clock, &["Post 1"]).await;
    let link = engine
        .issue_review_link(ReviewTarget::WorkItem(item.id), None)
        .await
        .unwrap();

    engine.delete_work_item(item.id).await.unwrap();
    assert!(matches!(
        engine.get_work_item(item.id).await,
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        engine.resolve_review_link(&link.token).await,
        Err(AppError::InvalidLink)
    ));
    assert!(matches!(
        engine.delete_work_item(item.id).await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn revision_events_reach_the_assignee() {
    let (engine, clock) = setup().await;
    let (item, _) = item_in_client_review(&engine, &clock, &["Post 1"]).await;
    let batch = current_batch(&engine, item.id, "Post 1").await;
    let mut events = engine.subscribe();

    engine
        .apply_decision(
            DecisionRequest::request_revision(batch, "Swap the photo"),
            Actor::member(Uuid::new_v4()),
        )
        .await
        .unwrap();

    match events.recv().await.unwrap() {
        ReviewEvent::DecisionApplied {
            work_item_id,
            sub_item_label,
            ..
        } => {
            assert_eq!(work_item_id, item.id);
            assert_eq!(sub_item_label.as_deref(), Some("Post 1"));
        }
        other => panic!("unexpected event {other:?}"),
    }
    let changed = events.recv().await.unwrap();
    assert!(changed.crosses_assignee_boundary());
    assert!(matches!(
        changed,
        ReviewEvent::StatusChanged {
            to: WorkItemStatus::RevisionRequested,
            ..
        }
    ));
}
