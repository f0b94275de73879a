//! Data Governance Error Types

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use uuid::Uuid;

use super::types::{ExportEvent, ExportStatus};

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("Export request not found")]
    NotFound,

    #[error("User not found: {0}")]
    UserNotFound(Uuid),

    #[error("An export is already in progress")]
    Conflict,

    #[error("Cannot {event} an export that is {from}")]
    InvalidTransition {
        from: ExportStatus,
        event: ExportEvent,
    },

    /// The row was reclaimed and started again since this worker's Start.
    #[error("Export attempt {attempt} was superseded by a newer claim")]
    ClaimSuperseded { attempt: i32 },

    #[error("Failed to serialize export document: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl ExportError {
    /// Map a failed insert to `Conflict` when the one-active-export index rejected it.
    pub(crate) fn from_insert(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = e {
            if db_err.is_unique_violation() {
                return Self::Conflict;
            }
        }
        Self::Database(e)
    }
}

impl IntoResponse for ExportError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::NotFound => (StatusCode::NOT_FOUND, self.to_string()),
            Self::UserNotFound(_) => (StatusCode::NOT_FOUND, "User not found".to_string()),
            Self::Conflict => (StatusCode::CONFLICT, self.to_string()),
            Self::InvalidTransition { .. } | Self::ClaimSuperseded { .. } => {
                (StatusCode::CONFLICT, self.to_string())
            }
            Self::Serialization(e) => {
                tracing::error!(error = %e, "Export serialization error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            Self::Database(e) => {
                tracing::error!(error = %e, "Governance database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
