//! Export Maintenance Job Tests
//!
//! Drain, reclaim and expiry sweep behavior.
//!
//! Run with: `cargo test --test export_jobs_test -- --nocapture`

mod helpers;

use chrono::{Duration, Utc};
use helpers::{create_test_user, set_expires_at};
use insights_server::config::ExportSettings;
use insights_server::governance::jobs::reclaim_stale_exports;
use insights_server::governance::requests::{
    complete_export, fail_export, fetch_export_file, find_export_request, start_export,
};
use insights_server::governance::types::ExportEvent;
use insights_server::governance::{
    cleanup_expired_exports, create_export_request, generate_export, process_pending_exports,
    ExportError, ExportStatus, ExportType,
};
use sqlx::PgPool;
use uuid::Uuid;

async fn completed_export(pool: &PgPool) -> Uuid {
    let user_id = create_test_user(pool).await;
    let request = create_export_request(pool, user_id, ExportType::GdprRequest)
        .await
        .unwrap();
    generate_export(pool, user_id, request.id).await.unwrap();
    request.id
}

async fn status_of(pool: &PgPool, export_id: Uuid) -> ExportStatus {
    find_export_request(pool, export_id)
        .await
        .unwrap()
        .expect("request should exist")
        .status
}

/// Pretend the worker that started `export_id` died `age` ago.
async fn backdate_start(pool: &PgPool, export_id: Uuid, age: Duration) {
    sqlx::query("UPDATE data_export_requests SET started_at = $1 WHERE id = $2")
        .bind(Utc::now() - age)
        .bind(export_id)
        .execute(pool)
        .await
        .unwrap();
}

// ============================================================================
// Expiry sweep
// ============================================================================

#[sqlx::test]
async fn test_cleanup_is_idempotent(pool: PgPool) {
    let stale = completed_export(&pool).await;
    let fresh = completed_export(&pool).await;
    set_expires_at(&pool, stale, Utc::now() - Duration::hours(1)).await;

    let first = cleanup_expired_exports(&pool).await.unwrap();
    let second = cleanup_expired_exports(&pool).await.unwrap();

    assert_eq!(first, 1);
    assert_eq!(second, 0);
    assert_eq!(status_of(&pool, stale).await, ExportStatus::Expired);
    assert_eq!(status_of(&pool, fresh).await, ExportStatus::Completed);
    assert!(fetch_export_file(&pool, stale).await.unwrap().is_none());
    assert!(fetch_export_file(&pool, fresh).await.unwrap().is_some());
}

#[sqlx::test]
async fn test_cleanup_ignores_non_completed(pool: PgPool) {
    let user_id = create_test_user(&pool).await;
    let pending = create_export_request(&pool, user_id, ExportType::GdprRequest)
        .await
        .unwrap();
    set_expires_at(&pool, pending.id, Utc::now() - Duration::hours(1)).await;

    assert_eq!(cleanup_expired_exports(&pool).await.unwrap(), 0);
    assert_eq!(status_of(&pool, pending.id).await, ExportStatus::Pending);
}

// ============================================================================
// Drain
// ============================================================================

#[sqlx::test]
async fn test_drain_isolates_failures(pool: PgPool) {
    let alice = create_test_user(&pool).await;
    let bob = create_test_user(&pool).await;
    let ghost = Uuid::new_v4();

    let a = create_export_request(&pool, alice, ExportType::GdprRequest)
        .await
        .unwrap();
    let g = create_export_request(&pool, ghost, ExportType::GdprRequest)
        .await
        .unwrap();
    let b = create_export_request(&pool, bob, ExportType::UserDataRequest)
        .await
        .unwrap();

    let summary = process_pending_exports(&pool, &ExportSettings::default())
        .await
        .unwrap();

    assert_eq!(summary.completed, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(status_of(&pool, a.id).await, ExportStatus::Completed);
    assert_eq!(status_of(&pool, g.id).await, ExportStatus::Failed);
    assert_eq!(status_of(&pool, b.id).await, ExportStatus::Completed);

    let again = process_pending_exports(&pool, &ExportSettings::default())
        .await
        .unwrap();
    assert_eq!(again.completed + again.failed, 0);
}

#[sqlx::test]
async fn test_drain_respects_batch_size_oldest_first(pool: PgPool) {
    let mut ids = Vec::new();
    for _ in 0..3 {
        let user_id = create_test_user(&pool).await;
        let request = create_export_request(&pool, user_id, ExportType::GdprRequest)
            .await
            .unwrap();
        ids.push(request.id);
    }

    let settings = ExportSettings {
        batch_size: 2,
        ..ExportSettings::default()
    };
    let summary = process_pending_exports(&pool, &settings).await.unwrap();

    assert_eq!(summary.completed, 2);
    assert_eq!(status_of(&pool, ids[0]).await, ExportStatus::Completed);
    assert_eq!(status_of(&pool, ids[1]).await, ExportStatus::Completed);
    assert_eq!(status_of(&pool, ids[2]).await, ExportStatus::Pending);
}

#[sqlx::test]
async fn test_drain_reclaims_stale_processing(pool: PgPool) {
    let user_id = create_test_user(&pool).await;
    let request = create_export_request(&pool, user_id, ExportType::GdprRequest)
        .await
        .unwrap();
    start_export(&pool, request.id, user_id).await.unwrap();
    backdate_start(&pool, request.id, Duration::hours(2)).await;

    let summary = process_pending_exports(&pool, &ExportSettings::default())
        .await
        .unwrap();

    assert_eq!(summary.reclaimed, 1);
    assert_eq!(summary.completed, 1);

    let stored = find_export_request(&pool, request.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ExportStatus::Completed);
    assert_eq!(stored.attempts, 2);
}

#[sqlx::test]
async fn test_reclaim_leaves_live_workers_alone(pool: PgPool) {
    let user_id = create_test_user(&pool).await;
    let request = create_export_request(&pool, user_id, ExportType::GdprRequest)
        .await
        .unwrap();
    start_export(&pool, request.id, user_id).await.unwrap();

    let (reclaimed, abandoned) = reclaim_stale_exports(&pool, &ExportSettings::default())
        .await
        .unwrap();

    assert_eq!((reclaimed, abandoned), (0, 0));
    assert_eq!(status_of(&pool, request.id).await, ExportStatus::Processing);
}

#[sqlx::test]
async fn test_reclaim_gives_up_after_max_attempts(pool: PgPool) {
    let user_id = create_test_user(&pool).await;
    let request = create_export_request(&pool, user_id, ExportType::GdprRequest)
        .await
        .unwrap();
    start_export(&pool, request.id, user_id).await.unwrap();
    sqlx::query("UPDATE data_export_requests SET attempts = 3 WHERE id = $1")
        .bind(request.id)
        .execute(&pool)
        .await
        .unwrap();
    backdate_start(&pool, request.id, Duration::hours(2)).await;

    let (reclaimed, abandoned) = reclaim_stale_exports(&pool, &ExportSettings::default())
        .await
        .unwrap();

    assert_eq!((reclaimed, abandoned), (0, 1));
    let stored = find_export_request(&pool, request.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ExportStatus::Failed);
    assert_eq!(
        stored.error.as_deref(),
        Some("Export abandoned after 3 attempts")
    );

    // The user is free to ask again.
    assert!(create_export_request(&pool, user_id, ExportType::GdprRequest)
        .await
        .is_ok());
}

#[sqlx::test]
async fn test_reclaimed_worker_cannot_finish_newer_attempt(pool: PgPool) {
    let user_id = create_test_user(&pool).await;
    let request = create_export_request(&pool, user_id, ExportType::GdprRequest)
        .await
        .unwrap();

    let first = start_export(&pool, request.id, user_id).await.unwrap();
    assert_eq!(first.attempts, 1);
    backdate_start(&pool, request.id, Duration::hours(2)).await;

    let (reclaimed, _) = reclaim_stale_exports(&pool, &ExportSettings::default())
        .await
        .unwrap();
    assert_eq!(reclaimed, 1);

    // While the row waits in the queue the old worker is refused by status.
    let early = fail_export(&pool, request.id, first.attempts, "first worker error").await;
    assert!(matches!(
        early,
        Err(ExportError::InvalidTransition {
            from: ExportStatus::Pending,
            event: ExportEvent::Fail
        })
    ));

    let second = start_export(&pool, request.id, user_id).await.unwrap();
    assert_eq!(second.attempts, 2);

    let stale_fail = fail_export(&pool, request.id, first.attempts, "first worker error").await;
    assert!(matches!(
        stale_fail,
        Err(ExportError::ClaimSuperseded { attempt: 1 })
    ));
    let stale_complete = complete_export(&pool, request.id, first.attempts, "{}").await;
    assert!(matches!(
        stale_complete,
        Err(ExportError::ClaimSuperseded { attempt: 1 })
    ));
    assert!(fetch_export_file(&pool, request.id).await.unwrap().is_none());

    let done = complete_export(&pool, request.id, second.attempts, "{\"ok\":true}")
        .await
        .unwrap();
    assert_eq!(done.status, ExportStatus::Completed);
    assert_eq!(done.error, None);
    assert_eq!(
        fetch_export_file(&pool, request.id).await.unwrap().as_deref(),
        Some("{\"ok\":true}")
    );
}
