#![allow(dead_code)]

use std::collections::HashMap;

use anyhow::{Context, Result};
use axum::{
    body::{self, Body},
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use serde_json::Value;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::{tempdir, TempDir};
use tower::ServiceExt; // for `oneshot`
use uuid::Uuid;

use cvo_backoffice::db::connect_options;
use cvo_backoffice::utils::hash_password;
use cvo_backoffice::{build_router, AppConfig};

pub const PASSWORD: &str = "S3cureP@ssw0rd";

pub const ADMIN_ROLE_ID: &str = "6f1c2a10-0000-4000-8000-000000000001";
pub const SUPERVISOR_ROLE_ID: &str = "6f1c2a10-0000-4000-8000-000000000002";
pub const ASESOR_ROLE_ID: &str = "6f1c2a10-0000-4000-8000-000000000003";
pub const FOTOGRAFO_ROLE_ID: &str = "6f1c2a10-0000-4000-8000-000000000004";

pub struct TestApp {
    pub app: Router,
    pub pool: SqlitePool,
    _dir: TempDir,
}

/// Fresh router over a migrated temp-file database.
pub async fn spawn_app() -> Result<TestApp> {
    let dir = tempdir().context("failed to create tempdir")?;
    let db_path = dir.path().join("test.db");

    let opts = connect_options(SqliteConnectOptions::new().filename(db_path.as_path()));
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator = sqlx::migrate::Migrator::new(std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations"))
        .await?;
    migrator.run(&pool).await?;

    let vars: HashMap<&str, &str> = HashMap::from([("JWT_SECRET", "test-secret"), ("SITE_URL", "http://localhost:3000")]);
    let config = AppConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()))?;
    let app = build_router(pool.clone(), config)?;

    Ok(TestApp { app, pool, _dir: dir })
}

/// Inserts a profile with [`PASSWORD`], assigned to `role_id` when given.
pub async fn seed_user(pool: &SqlitePool, email: &str, role_id: Option<&str>) -> Result<Uuid> {
    let id = Uuid::new_v4();
    let now = chrono::Utc::now();

    let role_name: Option<String> = match role_id {
        Some(role_id) => Some(
            sqlx::query_scalar("SELECT name FROM roles WHERE id = ?")
                .bind(role_id)
                .fetch_one(pool)
                .await?,
        ),
        None => None,
    };

    sqlx::query(
        "INSERT INTO profiles (id, email, full_name, role, password_hash, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(email)
    .bind(format!("User {email}"))
    .bind(&role_name)
    .bind(hash_password(PASSWORD)?)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    if let Some(role_id) = role_id {
        sqlx::query("INSERT INTO user_roles (user_id, role_id, created_at) VALUES (?, ?, ?)")
            .bind(id.to_string())
            .bind(role_id)
            .bind(now)
            .execute(pool)
            .await?;
    }

    Ok(id)
}

/// Logs in and returns the `name=value` pair to send back as a Cookie header.
pub async fn login(app: &Router, email: &str) -> Result<String> {
    let body = serde_json::json!({ "email": email, "password": PASSWORD });
    let resp = send_raw(app, "POST", "/api/auth/login", None, Some(body)).await?;
    assert_eq!(resp.status(), StatusCode::OK, "login failed for {email}");

    let set_cookie = resp
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with("cvo-auth-token="))
        .context("missing session cookie")?;

    Ok(set_cookie.split(';').next().unwrap_or_default().to_string())
}

pub async fn seed_and_login(test: &TestApp, email: &str, role_id: Option<&str>) -> Result<(Uuid, String)> {
    let id = seed_user(&test.pool, email, role_id).await?;
    let cookie = login(&test.app, email).await?;
    Ok((id, cookie))
}

pub async fn send_raw(
    app: &Router,
    method: &str,
    uri: &str,
    cookie: Option<&str>,
    body: Option<Value>,
) -> Result<Response> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }

    let req = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))?,
        None => builder.body(Body::empty())?,
    };

    Ok(app.clone().oneshot(req).await?)
}

/// Sends a request and parses the JSON response body.
pub async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    cookie: Option<&str>,
    body: Option<Value>,
) -> Result<(StatusCode, Value)> {
    let resp = send_raw(app, method, uri, cookie, body).await?;
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), usize::MAX).await?;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).with_context(|| format!("non-JSON body from {uri}"))?
    };
    Ok((status, value))
}

pub async fn count(pool: &SqlitePool, table: &str) -> Result<i64> {
    Ok(sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(pool)
        .await?)
}
