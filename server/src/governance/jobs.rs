//! Export Maintenance Jobs
//!
//! Periodic work that keeps the export queue moving:
//! 1. Reclaim requests whose worker lease timed out.
//! 2. Drain a batch of pending requests through the generator.
//! 3. Expire completed requests past their download window.
//!
//! Every job is idempotent and keeps no state between runs.

use std::time::Instant;

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use super::error::ExportError;
use super::generator::generate_export;
use super::types::ExportEvent;
use crate::config::ExportSettings;

/// Outcome counts of one drain run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainSummary {
    pub reclaimed: u64,
    pub abandoned: u64,
    pub completed: usize,
    pub failed: usize,
}

/// Start the background maintenance task.
///
/// Drains pending requests every `drain_interval` and sweeps expired ones
/// every `sweep_interval`. The first tick of each interval fires immediately
/// so work left over from a previous run is picked up at startup.
pub fn spawn_maintenance_task(
    pool: PgPool,
    settings: ExportSettings,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut drain = tokio::time::interval(settings.drain_interval);
        let mut sweep = tokio::time::interval(settings.sweep_interval);
        drain.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = drain.tick() => {
                    if let Err(e) = process_pending_exports(&pool, &settings).await {
                        tracing::warn!(error = %e, "Export drain run failed");
                    }
                }
                _ = sweep.tick() => {
                    if let Err(e) = cleanup_expired_exports(&pool).await {
                        tracing::warn!(error = %e, "Export expiry sweep failed");
                    }
                }
            }
        }
    })
}

/// Process up to `settings.batch_size` pending requests, oldest first.
///
/// Stale processing rows are reclaimed first. A failure on one request is
/// logged and does not stop the rest of the batch; a request whose Start was
/// won by a concurrent run is skipped. Losing the row after this run's own
/// Start counts as a failure.
#[tracing::instrument(skip_all)]
pub async fn process_pending_exports(
    pool: &PgPool,
    settings: &ExportSettings,
) -> Result<DrainSummary, ExportError> {
    let start = Instant::now();
    let (reclaimed, abandoned) = reclaim_stale_exports(pool, settings).await?;

    let pending: Vec<(Uuid, Uuid)> = sqlx::query_as(
        "SELECT id, user_id FROM data_export_requests
         WHERE status = 'pending'
         ORDER BY created_at ASC
         LIMIT $1",
    )
    .bind(settings.batch_size)
    .fetch_all(pool)
    .await?;

    let mut summary = DrainSummary {
        reclaimed,
        abandoned,
        ..DrainSummary::default()
    };

    for (export_id, user_id) in pending {
        match generate_export(pool, user_id, export_id).await {
            Ok(_) => summary.completed += 1,
            Err(e) if lost_start_race(&e) => {
                tracing::debug!(
                    export_id = %export_id,
                    error = %e,
                    "Export already claimed, skipping"
                );
            }
            Err(e) => {
                summary.failed += 1;
                tracing::error!(
                    export_id = %export_id,
                    user_id = %user_id,
                    error = %e,
                    "Export job failed"
                );
            }
        }
    }

    if summary != DrainSummary::default() {
        tracing::info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            reclaimed = summary.reclaimed,
            abandoned = summary.abandoned,
            completed = summary.completed,
            failed = summary.failed,
            "Export drain run completed"
        );
    }

    Ok(summary)
}

/// Whether a concurrent run won the Start for this row before us.
fn lost_start_race(e: &ExportError) -> bool {
    matches!(
        e,
        ExportError::InvalidTransition {
            event: ExportEvent::Start,
            ..
        }
    )
}

/// Hand processing rows whose lease expired back to the queue.
///
/// Rows that already used `max_attempts` starts are failed instead. Returns
/// `(reclaimed, abandoned)`.
pub async fn reclaim_stale_exports(
    pool: &PgPool,
    settings: &ExportSettings,
) -> Result<(u64, u64), ExportError> {
    let cutoff = Utc::now() - settings.lease_timeout;
    let reclaim = ExportEvent::Reclaim;
    let fail = ExportEvent::Fail;

    let abandoned = sqlx::query(
        "UPDATE data_export_requests
         SET status = $1,
             error = 'Export abandoned after ' || attempts || ' attempts',
             completed_at = NOW()
         WHERE status = $2 AND started_at < $3 AND attempts >= $4",
    )
    .bind(fail.target())
    .bind(fail.source())
    .bind(cutoff)
    .bind(settings.max_attempts)
    .execute(pool)
    .await?
    .rows_affected();

    let reclaimed = sqlx::query(
        "UPDATE data_export_requests
         SET status = $1, started_at = NULL
         WHERE status = $2 AND started_at < $3",
    )
    .bind(reclaim.target())
    .bind(reclaim.source())
    .bind(cutoff)
    .execute(pool)
    .await?
    .rows_affected();

    if reclaimed > 0 || abandoned > 0 {
        tracing::warn!(reclaimed, abandoned, "Recovered stale export requests");
    }

    Ok((reclaimed, abandoned))
}

/// Move every completed request past its expiry to expired and drop the
/// stored files. Returns the number of requests changed.
#[tracing::instrument(skip(pool))]
pub async fn cleanup_expired_exports(pool: &PgPool) -> Result<u64, ExportError> {
    let event = ExportEvent::Expire;
    let mut tx = pool.begin().await?;

    let expired: Vec<Uuid> = sqlx::query_scalar(
        "UPDATE data_export_requests SET status = $1
         WHERE status = $2 AND expires_at < NOW()
         RETURNING id",
    )
    .bind(event.target())
    .bind(event.source())
    .fetch_all(&mut *tx)
    .await?;

    if !expired.is_empty() {
        sqlx::query("DELETE FROM data_export_files WHERE export_id = ANY($1)")
            .bind(&expired)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    let count = expired.len() as u64;
    if count > 0 {
        tracing::info!(count, "Expired stale data exports");
    }

    Ok(count)
}
