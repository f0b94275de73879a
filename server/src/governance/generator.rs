//! Export Generator
//!
//! Runs one request through Start -> Collect -> serialize -> Complete | Fail.

use sqlx::PgPool;
use uuid::Uuid;

use super::collector::collect_user_data;
use super::error::ExportError;
use super::requests::{complete_export, fail_export, start_export};

/// Generate the export document for a pending request.
///
/// Performs exactly one Start transition followed by exactly one Complete or
/// Fail. Any failure after Start is recorded on the request row before the
/// error is returned, so the row never stays in processing once this returns.
/// Complete and Fail only apply to the claim made by this call's Start; a
/// worker whose lease was reclaimed leaves the newer attempt untouched.
/// Slow for large accounts; call it from a worker, not inline in a request.
#[tracing::instrument(skip(pool))]
pub async fn generate_export(
    pool: &PgPool,
    user_id: Uuid,
    export_id: Uuid,
) -> Result<String, ExportError> {
    let attempt = start_export(pool, export_id, user_id).await?.attempts;

    match build_and_store(pool, user_id, export_id, attempt).await {
        Ok(content) => {
            tracing::info!(
                export_id = %export_id,
                user_id = %user_id,
                file_size = content.len(),
                "Export completed"
            );
            Ok(content)
        }
        Err(
            e @ (ExportError::ClaimSuperseded { .. } | ExportError::InvalidTransition { .. }),
        ) => {
            tracing::warn!(
                export_id = %export_id,
                attempt,
                error = %e,
                "Export claim lost before completion"
            );
            Err(e)
        }
        Err(e) => {
            let message = e.to_string();
            if let Err(record_err) = fail_export(pool, export_id, attempt, &message).await {
                tracing::error!(
                    export_id = %export_id,
                    error = %record_err,
                    "Failed to record export failure"
                );
            }
            tracing::warn!(
                export_id = %export_id,
                user_id = %user_id,
                error = %e,
                "Export failed"
            );
            Err(e)
        }
    }
}

async fn build_and_store(
    pool: &PgPool,
    user_id: Uuid,
    export_id: Uuid,
    attempt: i32,
) -> Result<String, ExportError> {
    let mut document = collect_user_data(pool, user_id).await?;
    document.export_metadata.export_id = Some(export_id);

    let content = serde_json::to_string_pretty(&document)?;
    complete_export(pool, export_id, attempt, &content).await?;

    Ok(content)
}
