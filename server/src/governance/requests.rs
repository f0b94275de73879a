//! Export Request Manager
//!
//! Creates export requests, answers status queries and persists every status
//! transition. Each transition is a conditional `UPDATE ... WHERE status = <source>`
//! so two workers can never apply the same event to one request.

use chrono::{Duration, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use super::error::ExportError;
use super::types::{
    DownloadDenial, DownloadEligibility, ExportContentMetadata, ExportEvent, ExportRequest,
    ExportRequestSummary, ExportScope, ExportStatus, ExportType, EXPORT_FORMAT, EXPORT_TTL_DAYS,
};

// ============================================================================
// Creation
// ============================================================================

/// Create a pending export request for `user_id`.
///
/// Rejects with [`ExportError::Conflict`] while another request of the same
/// user is pending or processing. The partial unique index
/// `data_export_requests_one_active_per_user` closes the race between the
/// check and the insert.
#[tracing::instrument(skip(pool))]
pub async fn create_export_request(
    pool: &PgPool,
    user_id: Uuid,
    export_type: ExportType,
) -> Result<ExportRequest, ExportError> {
    let in_flight = sqlx::query_scalar::<_, Uuid>(
        "SELECT id FROM data_export_requests
         WHERE user_id = $1 AND status IN ('pending', 'processing')
         LIMIT 1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    if in_flight.is_some() {
        return Err(ExportError::Conflict);
    }

    let now = Utc::now();
    let request = sqlx::query_as::<_, ExportRequest>(
        "INSERT INTO data_export_requests
            (id, user_id, requested_by, export_type, status, format, scope, created_at, expires_at)
         VALUES ($1, $2, $2, $3, 'pending', $4, $5, $6, $7)
         RETURNING *",
    )
    .bind(Uuid::now_v7())
    .bind(user_id)
    .bind(export_type)
    .bind(EXPORT_FORMAT)
    .bind(Json(ExportScope::default()))
    .bind(now)
    .bind(now + Duration::days(EXPORT_TTL_DAYS))
    .fetch_one(pool)
    .await
    .map_err(ExportError::from_insert)?;

    tracing::info!(
        export_id = %request.id,
        user_id = %user_id,
        export_type = ?export_type,
        "Export request created"
    );

    Ok(request)
}

// ============================================================================
// Queries
// ============================================================================

/// Load a request by id regardless of owner.
pub async fn find_export_request(
    pool: &PgPool,
    export_id: Uuid,
) -> Result<Option<ExportRequest>, ExportError> {
    let request =
        sqlx::query_as::<_, ExportRequest>("SELECT * FROM data_export_requests WHERE id = $1")
            .bind(export_id)
            .fetch_optional(pool)
            .await?;
    Ok(request)
}

/// Status of one request as seen by `caller_id`.
///
/// Returns `None` both for unknown ids and for requests owned by someone
/// else, so the existence of other users' exports is not revealed.
pub async fn get_export_status(
    pool: &PgPool,
    export_id: Uuid,
    caller_id: Uuid,
) -> Result<Option<ExportRequestSummary>, ExportError> {
    Ok(find_export_request(pool, export_id)
        .await?
        .filter(|request| request.user_id == caller_id)
        .map(ExportRequestSummary::from))
}

/// All requests of `user_id`, newest first.
pub async fn get_user_exports(
    pool: &PgPool,
    user_id: Uuid,
) -> Result<Vec<ExportRequestSummary>, ExportError> {
    let requests = sqlx::query_as::<_, ExportRequest>(
        "SELECT * FROM data_export_requests
         WHERE user_id = $1
         ORDER BY created_at DESC, id DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(requests.into_iter().map(ExportRequestSummary::from).collect())
}

/// Decide whether `caller_id` may download `export_id`.
///
/// A completed request found past its expiry is moved to `EXPIRED` here.
pub async fn can_download_export(
    pool: &PgPool,
    export_id: Uuid,
    caller_id: Uuid,
) -> Result<DownloadEligibility, ExportError> {
    let Some(request) = find_export_request(pool, export_id).await? else {
        return Ok(DownloadEligibility::denied(DownloadDenial::NotFound));
    };

    if request.user_id != caller_id {
        return Ok(DownloadEligibility::denied(DownloadDenial::Unauthorized));
    }

    if request.status != ExportStatus::Completed {
        return Ok(DownloadEligibility::denied(DownloadDenial::WrongStatus(
            request.status,
        )));
    }

    if request.expires_at < Utc::now() {
        expire_export(pool, export_id).await?;
        return Ok(DownloadEligibility::denied(DownloadDenial::Expired));
    }

    Ok(DownloadEligibility::allowed())
}

/// Stored document of a completed request.
pub async fn fetch_export_file(
    pool: &PgPool,
    export_id: Uuid,
) -> Result<Option<String>, ExportError> {
    let content =
        sqlx::query_scalar::<_, String>("SELECT content FROM data_export_files WHERE export_id = $1")
            .bind(export_id)
            .fetch_optional(pool)
            .await?;
    Ok(content)
}

// ============================================================================
// Transitions
// ============================================================================

/// PENDING -> PROCESSING for a request owned by `user_id`.
///
/// Doubles as the claim step: only one caller can win the conditional update.
/// The returned row's `attempts` identifies this claim and must be passed to
/// [`complete_export`] or [`fail_export`].
pub async fn start_export(
    pool: &PgPool,
    export_id: Uuid,
    user_id: Uuid,
) -> Result<ExportRequest, ExportError> {
    let event = ExportEvent::Start;
    let request = sqlx::query_as::<_, ExportRequest>(
        "UPDATE data_export_requests
         SET status = $3, started_at = $4, attempts = attempts + 1
         WHERE id = $1 AND user_id = $2 AND status = $5
         RETURNING *",
    )
    .bind(export_id)
    .bind(user_id)
    .bind(event.target())
    .bind(Utc::now())
    .bind(event.source())
    .fetch_optional(pool)
    .await?;

    match request {
        Some(request) => Ok(request),
        None => Err(explain_rejection(pool, export_id, event, None).await),
    }
}

/// PROCESSING -> COMPLETED for claim `attempt`, storing `content` as the
/// downloadable file.
pub async fn complete_export(
    pool: &PgPool,
    export_id: Uuid,
    attempt: i32,
    content: &str,
) -> Result<ExportRequest, ExportError> {
    let event = ExportEvent::Complete;
    let metadata = ExportContentMetadata::for_content(content);
    let file_size = metadata.length;

    let mut tx = pool.begin().await?;

    let request = sqlx::query_as::<_, ExportRequest>(
        "UPDATE data_export_requests
         SET status = $2, completed_at = $3, file_size = $4, metadata = $5
         WHERE id = $1 AND status = $6 AND attempts = $7
         RETURNING *",
    )
    .bind(export_id)
    .bind(event.target())
    .bind(Utc::now())
    .bind(file_size)
    .bind(Json(metadata))
    .bind(event.source())
    .bind(attempt)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(request) = request else {
        tx.rollback().await?;
        return Err(explain_rejection(pool, export_id, event, Some(attempt)).await);
    };

    sqlx::query("INSERT INTO data_export_files (export_id, content) VALUES ($1, $2)")
        .bind(export_id)
        .bind(content)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(request)
}

/// PROCESSING -> FAILED for claim `attempt`, recording `message`.
pub async fn fail_export(
    pool: &PgPool,
    export_id: Uuid,
    attempt: i32,
    message: &str,
) -> Result<ExportRequest, ExportError> {
    let event = ExportEvent::Fail;
    let request = sqlx::query_as::<_, ExportRequest>(
        "UPDATE data_export_requests
         SET status = $2, error = $3, completed_at = $4
         WHERE id = $1 AND status = $5 AND attempts = $6
         RETURNING *",
    )
    .bind(export_id)
    .bind(event.target())
    .bind(message)
    .bind(Utc::now())
    .bind(event.source())
    .bind(attempt)
    .fetch_optional(pool)
    .await?;

    match request {
        Some(request) => Ok(request),
        None => Err(explain_rejection(pool, export_id, event, Some(attempt)).await),
    }
}

/// COMPLETED -> EXPIRED for one request, dropping its stored file.
///
/// Returns `false` when the request was not completed (already expired by a
/// concurrent sweep, for example).
pub async fn expire_export(pool: &PgPool, export_id: Uuid) -> Result<bool, ExportError> {
    let event = ExportEvent::Expire;
    let mut tx = pool.begin().await?;

    let result = sqlx::query(
        "UPDATE data_export_requests SET status = $2
         WHERE id = $1 AND status = $3",
    )
    .bind(export_id)
    .bind(event.target())
    .bind(event.source())
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(false);
    }

    sqlx::query("DELETE FROM data_export_files WHERE export_id = $1")
        .bind(export_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::info!(export_id = %export_id, "Export expired");
    Ok(true)
}

/// Build the error for a conditional update that matched no row.
async fn explain_rejection(
    pool: &PgPool,
    export_id: Uuid,
    event: ExportEvent,
    attempt: Option<i32>,
) -> ExportError {
    match find_export_request(pool, export_id).await {
        Ok(Some(request)) => match request.status.apply(event) {
            Err(e) => e,
            Ok(_) => match attempt {
                Some(attempt) if attempt != request.attempts => {
                    ExportError::ClaimSuperseded { attempt }
                }
                _ => ExportError::NotFound,
            },
        },
        Ok(None) => ExportError::NotFound,
        Err(e) => e,
    }
}
