//! Data Governance HTTP Handlers

use axum::extract::{Path, State};
use axum::http::{header, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use uuid::Uuid;

use super::error::ExportError;
use super::types::{
    CreateExportBody, DownloadDenial, DownloadEligibility, ExportRequestSummary, EXPORT_CONTENT_TYPE,
};
use super::{generator, requests};
use crate::api::AppState;
use crate::auth::AuthUser;

/// Routes mounted under `/api/me/data-exports`.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(request_export).get(list_exports))
        .route("/{id}", get(get_export))
        .route("/{id}/eligibility", get(download_eligibility))
        .route("/{id}/download", get(download_export))
}

/// Request a data export.
///
/// Only one pending/processing export per user is allowed. Generation runs in
/// a background task when enabled, otherwise the drain job picks it up.
pub async fn request_export(
    State(state): State<AppState>,
    auth: AuthUser,
    body: Option<Json<CreateExportBody>>,
) -> Result<impl IntoResponse, ExportError> {
    let export_type = body
        .and_then(|Json(body)| body.export_type)
        .unwrap_or_default();

    let request = requests::create_export_request(&state.db, auth.id, export_type).await?;

    if state.config.exports.spawn_on_request {
        let pool = state.db.clone();
        let export_id = request.id;
        let user_id = auth.id;

        tokio::spawn(async move {
            if let Err(e) = generator::generate_export(&pool, user_id, export_id).await {
                tracing::error!(
                    export_id = %export_id,
                    user_id = %user_id,
                    error = %e,
                    "Export job failed"
                );
            }
        });
    }

    Ok((StatusCode::CREATED, Json(ExportRequestSummary::from(request))))
}

/// List the caller's export requests, newest first.
pub async fn list_exports(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<ExportRequestSummary>>, ExportError> {
    Ok(Json(requests::get_user_exports(&state.db, auth.id).await?))
}

/// Status of one export request. Other users' requests look like unknown ids.
pub async fn get_export(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ExportRequestSummary>, ExportError> {
    requests::get_export_status(&state.db, id, auth.id)
        .await?
        .map(Json)
        .ok_or(ExportError::NotFound)
}

/// Whether the caller may download the export right now.
pub async fn download_eligibility(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<DownloadEligibility>, ExportError> {
    Ok(Json(
        requests::can_download_export(&state.db, id, auth.id).await?,
    ))
}

/// Download the generated export document.
pub async fn download_export(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Response, ExportError> {
    let eligibility = requests::can_download_export(&state.db, id, auth.id).await?;

    if let Some(reason) = eligibility.reason {
        let status = match reason {
            DownloadDenial::NotFound => StatusCode::NOT_FOUND,
            DownloadDenial::Unauthorized => StatusCode::FORBIDDEN,
            DownloadDenial::WrongStatus(_) => StatusCode::CONFLICT,
            DownloadDenial::Expired => StatusCode::GONE,
        };
        return Ok((status, Json(eligibility)).into_response());
    }

    let content = requests::fetch_export_file(&state.db, id)
        .await?
        .ok_or(ExportError::NotFound)?;

    let headers = [
        (header::CONTENT_TYPE, EXPORT_CONTENT_TYPE.to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"data-export-{id}.json\""),
        ),
        (
            HeaderName::from_static("x-content-type-options"),
            "nosniff".to_string(),
        ),
    ];

    Ok((headers, content).into_response())
}
