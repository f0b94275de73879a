//! Export Collector
//!
//! Reads every row a user owns across the platform tables and assembles one
//! [`ExportDocument`]. Each query is scoped by the owning foreign key, so the
//! document never contains another user's records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::error::ExportError;
use super::types::{ACTIVITY_LOG_LIMIT, EXPORT_VERSION};
use crate::db;

/// The complete export of one user's data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    pub export_metadata: ExportMetadata,
    pub profile: ExportProfile,
    /// Explicitly `null` when the user never saved preferences.
    pub preferences: Option<ExportPreferences>,
    pub organization_memberships: Vec<ExportMembership>,
    pub created_agents: Vec<ExportAgent>,
    pub created_reports: Vec<ExportReport>,
    pub created_dashboards: Vec<ExportDashboard>,
    /// Newest first, at most [`ACTIVITY_LOG_LIMIT`] entries.
    pub activity_logs: Vec<ExportActivityLog>,
    pub api_keys: Vec<ExportApiKey>,
    pub comments: Vec<ExportComment>,
    pub saved_views: Vec<ExportSavedView>,
}

/// Header describing the export itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExportMetadata {
    /// Placeholder until the generator stamps the persisted request id.
    pub export_id: Option<Uuid>,
    pub exported_at: DateTime<Utc>,
    pub requested_by: Uuid,
    pub format: String,
    pub version: String,
    pub gdpr_compliant: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExportProfile {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub image: Option<String>,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, FromRow)]
#[serde(rename_all = "camelCase")]
#[allow(clippy::struct_excessive_bools)]
pub struct ExportPreferences {
    pub theme: String,
    pub language: String,
    pub timezone: String,
    pub email_notifications: bool,
    pub push_notifications: bool,
    pub weekly_digest: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ExportMembership {
    pub organization_id: Uuid,
    pub organization_name: String,
    pub role: String,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ExportAgent {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ExportReport {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ExportDashboard {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ExportActivityLog {
    pub id: Uuid,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// API key metadata. The key hash is never selected.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ExportApiKey {
    pub id: Uuid,
    pub name: String,
    pub key_prefix: String,
    pub last_used_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ExportComment {
    pub id: Uuid,
    pub entity_type: String,
    pub entity_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ExportSavedView {
    pub id: Uuid,
    pub name: String,
    pub entity_type: String,
    pub filters: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Collect everything `user_id` owns into one document.
///
/// Fails with [`ExportError::UserNotFound`] when the user row is missing; no
/// partial document is produced.
#[tracing::instrument(skip(pool))]
pub async fn collect_user_data(pool: &PgPool, user_id: Uuid) -> Result<ExportDocument, ExportError> {
    let user = db::find_user_by_id(pool, user_id)
        .await?
        .ok_or(ExportError::UserNotFound(user_id))?;

    let profile = ExportProfile {
        id: user.id,
        email: user.email,
        name: user.name,
        image: user.image,
        email_verified: user.email_verified,
        created_at: user.created_at,
        updated_at: user.updated_at,
    };

    let preferences: Option<ExportPreferences> = sqlx::query_as(
        "SELECT theme, language, timezone, email_notifications, push_notifications,
                weekly_digest, updated_at
         FROM user_preferences
         WHERE user_id = $1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    let organization_memberships: Vec<ExportMembership> = sqlx::query_as(
        "SELECT om.organization_id, o.name AS organization_name, om.role, om.joined_at
         FROM organization_members om
         JOIN organizations o ON o.id = om.organization_id
         WHERE om.user_id = $1
         ORDER BY om.joined_at ASC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    let created_agents: Vec<ExportAgent> = sqlx::query_as(
        "SELECT id, name, description, status, created_at, updated_at
         FROM agents
         WHERE created_by = $1
         ORDER BY created_at ASC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    let created_reports: Vec<ExportReport> = sqlx::query_as(
        "SELECT id, title, description, status, created_at, updated_at
         FROM reports
         WHERE created_by = $1
         ORDER BY created_at ASC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    let created_dashboards: Vec<ExportDashboard> = sqlx::query_as(
        "SELECT id, name, description, is_public, created_at, updated_at
         FROM dashboards
         WHERE created_by = $1
         ORDER BY created_at ASC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    let activity_logs: Vec<ExportActivityLog> = sqlx::query_as(
        "SELECT id, action, entity_type, entity_id, metadata, ip_address, created_at
         FROM audit_logs
         WHERE user_id = $1
         ORDER BY created_at DESC
         LIMIT $2",
    )
    .bind(user_id)
    .bind(ACTIVITY_LOG_LIMIT)
    .fetch_all(pool)
    .await?;

    let api_keys: Vec<ExportApiKey> = sqlx::query_as(
        "SELECT id, name, key_prefix, last_used_at, expires_at, created_at
         FROM api_keys
         WHERE user_id = $1
         ORDER BY created_at ASC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    let comments: Vec<ExportComment> = sqlx::query_as(
        "SELECT id, entity_type, entity_id, content, created_at, updated_at
         FROM comments
         WHERE user_id = $1
         ORDER BY created_at ASC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    let saved_views: Vec<ExportSavedView> = sqlx::query_as(
        "SELECT id, name, entity_type, filters, created_at, updated_at
         FROM saved_views
         WHERE user_id = $1
         ORDER BY created_at ASC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    tracing::debug!(
        user_id = %user_id,
        organizations = organization_memberships.len(),
        activity_logs = activity_logs.len(),
        "Collected user data for export"
    );

    Ok(ExportDocument {
        export_metadata: ExportMetadata {
            export_id: None,
            exported_at: Utc::now(),
            requested_by: user_id,
            format: "JSON".to_string(),
            version: EXPORT_VERSION.to_string(),
            gdpr_compliant: true,
        },
        profile,
        preferences,
        organization_memberships,
        created_agents,
        created_reports,
        created_dashboards,
        activity_logs,
        api_keys,
        comments,
        saved_views,
    })
}
