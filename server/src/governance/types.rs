//! Data Export Types
//!
//! Request records, the status state machine and response shapes.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

use super::error::ExportError;

// ============================================================================
// Constants
// ============================================================================

/// Days a request stays downloadable after creation.
pub const EXPORT_TTL_DAYS: i64 = 30;

/// Stored request format.
pub const EXPORT_FORMAT: &str = "json";

/// Version of the export document layout.
pub const EXPORT_VERSION: &str = "1.0";

/// Content type of the serialized document.
pub const EXPORT_CONTENT_TYPE: &str = "application/json";

/// Most recent activity log entries included in one document.
pub const ACTIVITY_LOG_LIMIT: i64 = 10_000;

// ============================================================================
// Enums
// ============================================================================

/// Classification of an export request. Does not change what is collected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "data_export_type", rename_all = "snake_case")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExportType {
    #[default]
    GdprRequest,
    UserDataRequest,
}

/// Lifecycle status of an export request.
///
/// ```text
/// PENDING -> PROCESSING -> COMPLETED -> EXPIRED
///               |   ^
///               |   +-- reclaim (lease timed out) -- back to PENDING
///               v
///             FAILED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "data_export_status", rename_all = "lowercase")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExportStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Expired,
}

/// Events that move a request through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportEvent {
    /// Worker picked the request up.
    Start,
    /// Document serialized and stored.
    Complete,
    /// Collection or serialization failed.
    Fail,
    /// Download window passed.
    Expire,
    /// Worker lease timed out; hand the request back to the queue.
    Reclaim,
}

impl ExportStatus {
    /// Whether the request counts against the one-active-export limit.
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }

    /// No further transition leaves this status.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Expired)
    }

    /// Apply `event`, returning the next status or rejecting an illegal move.
    pub fn apply(self, event: ExportEvent) -> Result<Self, ExportError> {
        if self == event.source() {
            Ok(event.target())
        } else {
            Err(ExportError::InvalidTransition { from: self, event })
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Expired => "EXPIRED",
        }
    }
}

impl fmt::Display for ExportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ExportEvent {
    /// The only status this event may be applied to.
    pub const fn source(self) -> ExportStatus {
        match self {
            Self::Start => ExportStatus::Pending,
            Self::Complete | Self::Fail | Self::Reclaim => ExportStatus::Processing,
            Self::Expire => ExportStatus::Completed,
        }
    }

    /// The status this event leads to.
    pub const fn target(self) -> ExportStatus {
        match self {
            Self::Start => ExportStatus::Processing,
            Self::Complete => ExportStatus::Completed,
            Self::Fail => ExportStatus::Failed,
            Self::Expire => ExportStatus::Expired,
            Self::Reclaim => ExportStatus::Pending,
        }
    }
}

impl fmt::Display for ExportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Start => "start",
            Self::Complete => "complete",
            Self::Fail => "fail",
            Self::Expire => "expire",
            Self::Reclaim => "reclaim",
        })
    }
}

// ============================================================================
// Records
// ============================================================================

/// Categories recorded on a request for audit purposes.
///
/// Collection always gathers every category; these flags are not used to
/// filter the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(clippy::struct_excessive_bools)]
pub struct ExportScope {
    pub include_profile: bool,
    pub include_preferences: bool,
    pub include_organizations: bool,
    pub include_agents: bool,
    pub include_reports: bool,
    pub include_dashboards: bool,
    pub include_activity_logs: bool,
    pub include_api_keys: bool,
    pub include_comments: bool,
    pub include_saved_views: bool,
}

impl Default for ExportScope {
    fn default() -> Self {
        Self {
            include_profile: true,
            include_preferences: true,
            include_organizations: true,
            include_agents: true,
            include_reports: true,
            include_dashboards: true,
            include_activity_logs: true,
            include_api_keys: true,
            include_comments: true,
            include_saved_views: true,
        }
    }
}

/// Content metadata written on completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportContentMetadata {
    pub length: i64,
    pub content_type: String,
    pub version: String,
}

impl ExportContentMetadata {
    pub fn for_content(content: &str) -> Self {
        Self {
            length: content.len() as i64,
            content_type: EXPORT_CONTENT_TYPE.to_string(),
            version: EXPORT_VERSION.to_string(),
        }
    }
}

/// One row of `data_export_requests`.
#[derive(Debug, Clone, FromRow)]
pub struct ExportRequest {
    pub id: Uuid,
    pub user_id: Uuid,
    pub requested_by: Uuid,
    pub export_type: ExportType,
    pub status: ExportStatus,
    pub format: String,
    pub scope: Json<ExportScope>,
    pub metadata: Option<Json<ExportContentMetadata>>,
    pub file_size: Option<i64>,
    pub error: Option<String>,
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Body for creating an export request.
#[derive(Debug, Default, Deserialize)]
pub struct CreateExportBody {
    /// Defaults to `GDPR_REQUEST`.
    #[serde(rename = "type", default)]
    pub export_type: Option<ExportType>,
}

/// Caller-facing view of an export request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRequestSummary {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub export_type: ExportType,
    pub status: ExportStatus,
    pub format: String,
    pub file_size: Option<i64>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

impl From<ExportRequest> for ExportRequestSummary {
    fn from(request: ExportRequest) -> Self {
        Self {
            id: request.id,
            export_type: request.export_type,
            status: request.status,
            format: request.format,
            file_size: request.file_size,
            error: request.error,
            created_at: request.created_at,
            started_at: request.started_at,
            completed_at: request.completed_at,
            expires_at: request.expires_at,
        }
    }
}

/// Why a download was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadDenial {
    NotFound,
    Unauthorized,
    WrongStatus(ExportStatus),
    Expired,
}

impl fmt::Display for DownloadDenial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => f.write_str("Export not found"),
            Self::Unauthorized => f.write_str("Unauthorized"),
            Self::WrongStatus(status) => write!(f, "Export status is {status}"),
            Self::Expired => f.write_str("Export has expired"),
        }
    }
}

impl Serialize for DownloadDenial {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Result of a download-eligibility check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadEligibility {
    pub can_download: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DownloadDenial>,
}

impl DownloadEligibility {
    pub const fn allowed() -> Self {
        Self {
            can_download: true,
            reason: None,
        }
    }

    pub const fn denied(reason: DownloadDenial) -> Self {
        Self {
            can_download: false,
            reason: Some(reason),
        }
    }
}
