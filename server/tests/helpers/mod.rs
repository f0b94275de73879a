//! Reusable test helpers for export integration tests.
//!
//! Provides `TestApp` for sending requests through the full axum router, plus
//! seeding utilities for users and the rows the export collector reads.
//!
//! Every test receives a fresh migrated database from `#[sqlx::test]`, so no
//! cleanup is needed.
#![allow(dead_code)]

use axum::body::Body;
use axum::http::{self, Method, Request, Response};
use axum::Router;
use chrono::{DateTime, Utc};
use http_body_util::BodyExt;
use insights_server::api::{create_router, AppState};
use insights_server::auth::jwt;
use insights_server::config::Config;
use insights_server::db;
use sqlx::PgPool;
use tower::ServiceExt;
use uuid::Uuid;

// ============================================================================
// Test App
// ============================================================================

/// Router plus the pool and config it was built from.
pub struct TestApp {
    pub router: Router,
    pub pool: PgPool,
    pub config: Config,
}

impl TestApp {
    /// Build the full router over `pool` with the test configuration.
    pub fn new(pool: PgPool) -> Self {
        let config = Config::default_for_test();
        let state = AppState::new(pool.clone(), config.clone());
        Self {
            router: create_router(state),
            pool,
            config,
        }
    }

    /// Start building a request.
    pub fn request(method: Method, uri: &str) -> http::request::Builder {
        Request::builder().method(method).uri(uri)
    }

    /// Authenticated request with an empty body.
    pub fn authed(&self, method: Method, uri: &str, user_id: Uuid) -> Request<Body> {
        Self::request(method, uri)
            .header(
                "Authorization",
                format!("Bearer {}", generate_access_token(&self.config, user_id)),
            )
            .body(Body::empty())
            .unwrap()
    }

    /// Authenticated request with a JSON body.
    pub fn authed_json(
        &self,
        method: Method,
        uri: &str,
        user_id: Uuid,
        body: &serde_json::Value,
    ) -> Request<Body> {
        Self::request(method, uri)
            .header(
                "Authorization",
                format!("Bearer {}", generate_access_token(&self.config, user_id)),
            )
            .header("Content-Type", "application/json")
            .body(Body::from(serde_json::to_string(body).unwrap()))
            .unwrap()
    }

    /// Send a request through the router.
    pub async fn oneshot(&self, req: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(req).await.unwrap()
    }
}

/// Generate a valid access token for a user.
pub fn generate_access_token(config: &Config, user_id: Uuid) -> String {
    jwt::create_access_token(user_id, &config.jwt_secret, 900).expect("failed to create token")
}

/// Read a response body as JSON.
pub async fn body_to_json(resp: Response<Body>) -> serde_json::Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Read a response body as a UTF-8 string.
pub async fn body_to_string(resp: Response<Body>) -> String {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

// ============================================================================
// Seeding
// ============================================================================

/// Create a user with a unique email.
pub async fn create_test_user(pool: &PgPool) -> Uuid {
    let test_id = Uuid::new_v4().to_string()[..8].to_string();
    db::create_user(pool, &format!("user_{test_id}@example.com"), Some("Test User"))
        .await
        .expect("failed to create test user")
        .id
}

/// Save preferences for a user.
pub async fn seed_preferences(pool: &PgPool, user_id: Uuid) {
    sqlx::query(
        "INSERT INTO user_preferences (user_id, theme, language, timezone)
         VALUES ($1, 'dark', 'de', 'Europe/Berlin')",
    )
    .bind(user_id)
    .execute(pool)
    .await
    .expect("failed to seed preferences");
}

/// Create an organization and add the user with `role`.
pub async fn seed_membership(pool: &PgPool, user_id: Uuid, name: &str, role: &str) -> Uuid {
    let org_id = Uuid::new_v4();
    sqlx::query("INSERT INTO organizations (id, name, slug) VALUES ($1, $2, $3)")
        .bind(org_id)
        .bind(name)
        .bind(format!("{}-{}", name.to_lowercase().replace(' ', "-"), &org_id.to_string()[..8]))
        .execute(pool)
        .await
        .expect("failed to seed organization");

    sqlx::query(
        "INSERT INTO organization_members (organization_id, user_id, role) VALUES ($1, $2, $3)",
    )
    .bind(org_id)
    .bind(user_id)
    .bind(role)
    .execute(pool)
    .await
    .expect("failed to seed membership");

    org_id
}

pub async fn seed_agent(pool: &PgPool, user_id: Uuid, name: &str) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO agents (id, name, created_by) VALUES ($1, $2, $3)")
        .bind(id)
        .bind(name)
        .bind(user_id)
        .execute(pool)
        .await
        .expect("failed to seed agent");
    id
}

pub async fn seed_report(pool: &PgPool, user_id: Uuid, title: &str) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO reports (id, title, created_by) VALUES ($1, $2, $3)")
        .bind(id)
        .bind(title)
        .bind(user_id)
        .execute(pool)
        .await
        .expect("failed to seed report");
    id
}

pub async fn seed_dashboard(pool: &PgPool, user_id: Uuid, name: &str) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO dashboards (id, name, created_by) VALUES ($1, $2, $3)")
        .bind(id)
        .bind(name)
        .bind(user_id)
        .execute(pool)
        .await
        .expect("failed to seed dashboard");
    id
}

/// Insert `count` audit log rows, one second apart, newest first by index.
pub async fn seed_audit_logs(pool: &PgPool, user_id: Uuid, count: i32) {
    sqlx::query(
        "INSERT INTO audit_logs (id, user_id, action, entity_type, entity_id, metadata, created_at)
         SELECT gen_random_uuid(), $1, 'report.view', 'report', g::text,
                jsonb_build_object('seq', g), NOW() - make_interval(secs => g)
         FROM generate_series(1, $2) AS g",
    )
    .bind(user_id)
    .bind(count)
    .execute(pool)
    .await
    .expect("failed to seed audit logs");
}

pub async fn seed_api_key(pool: &PgPool, user_id: Uuid, name: &str, key_hash: &str) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO api_keys (id, user_id, name, key_prefix, key_hash)
         VALUES ($1, $2, $3, 'ik_live_', $4)",
    )
    .bind(id)
    .bind(user_id)
    .bind(name)
    .bind(key_hash)
    .execute(pool)
    .await
    .expect("failed to seed api key");
    id
}

pub async fn seed_comment(pool: &PgPool, user_id: Uuid, content: &str) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO comments (id, user_id, entity_type, entity_id, content)
         VALUES ($1, $2, 'report', 'r-1', $3)",
    )
    .bind(id)
    .bind(user_id)
    .bind(content)
    .execute(pool)
    .await
    .expect("failed to seed comment");
    id
}

pub async fn seed_saved_view(pool: &PgPool, user_id: Uuid, name: &str) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO saved_views (id, user_id, name, entity_type, filters)
         VALUES ($1, $2, $3, 'report', '{\"status\": \"published\"}'::jsonb)",
    )
    .bind(id)
    .bind(user_id)
    .bind(name)
    .execute(pool)
    .await
    .expect("failed to seed saved view");
    id
}

/// Seed one row in every table the collector reads.
pub async fn seed_full_account(pool: &PgPool, user_id: Uuid) {
    seed_preferences(pool, user_id).await;
    seed_membership(pool, user_id, "Acme Research", "admin").await;
    seed_agent(pool, user_id, "Survey Agent").await;
    seed_report(pool, user_id, "Q3 Brand Tracker").await;
    seed_dashboard(pool, user_id, "Panel Overview").await;
    seed_audit_logs(pool, user_id, 3).await;
    seed_api_key(pool, user_id, "CI key", "hash-of-secret-material").await;
    seed_comment(pool, user_id, "Looks good").await;
    seed_saved_view(pool, user_id, "Published reports").await;
}

// ============================================================================
// Request state helpers
// ============================================================================

/// Move a request's expiry.
pub async fn set_expires_at(pool: &PgPool, export_id: Uuid, expires_at: DateTime<Utc>) {
    sqlx::query("UPDATE data_export_requests SET expires_at = $1 WHERE id = $2")
        .bind(expires_at)
        .bind(export_id)
        .execute(pool)
        .await
        .expect("failed to update expires_at");
}

/// Count requests for a user.
pub async fn count_requests(pool: &PgPool, user_id: Uuid) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM data_export_requests WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(pool)
        .await
        .expect("failed to count requests")
}
