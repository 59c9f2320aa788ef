mod common;

use anyhow::Result;
use axum::http::{header, StatusCode};
use serde_json::json;

use common::{login, seed_and_login, seed_user, send, send_raw, spawn_app, ASESOR_ROLE_ID};

#[tokio::test]
async fn login_sets_http_only_cookie_and_returns_user() -> Result<()> {
    let test = spawn_app().await?;
    seed_user(&test.pool, "asesor@cvo.example", Some(ASESOR_ROLE_ID)).await?;

    let resp = send_raw(
        &test.app,
        "POST",
        "/api/auth/login",
        None,
        Some(json!({ "email": "asesor@cvo.example", "password": common::PASSWORD })),
    )
    .await?;
    assert_eq!(resp.status(), StatusCode::OK);

    let set_cookie = resp
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(set_cookie.starts_with("cvo-auth-token="));
    assert!(set_cookie.contains("HttpOnly"));
    assert!(set_cookie.contains("SameSite=Lax"));

    let stored: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM auth_sessions WHERE revoked_at IS NULL")
        .fetch_one(&test.pool)
        .await?;
    assert_eq!(stored, 1);

    Ok(())
}

#[tokio::test]
async fn wrong_password_and_unknown_email_are_401() -> Result<()> {
    let test = spawn_app().await?;
    seed_user(&test.pool, "asesor@cvo.example", None).await?;

    let (status, body) = send(
        &test.app,
        "POST",
        "/api/auth/login",
        None,
        Some(json!({ "email": "asesor@cvo.example", "password": "wrong-password" })),
    )
    .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);

    let (status, _) = send(
        &test.app,
        "POST",
        "/api/auth/login",
        None,
        Some(json!({ "email": "ghost@cvo.example", "password": common::PASSWORD })),
    )
    .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    Ok(())
}

#[tokio::test]
async fn missing_login_field_is_named_in_400() -> Result<()> {
    let test = spawn_app().await?;

    let (status, body) = send(&test.app, "POST", "/api/auth/login", None, Some(json!({ "password": "x" }))).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["fields"][0]["field"], "email");
    assert!(body["message"].as_str().unwrap_or_default().contains("email"));

    Ok(())
}

#[tokio::test]
async fn me_returns_profile_and_roles() -> Result<()> {
    let test = spawn_app().await?;
    let (id, cookie) = seed_and_login(&test, "asesor@cvo.example", Some(ASESOR_ROLE_ID)).await?;

    let (status, body) = send(&test.app, "GET", "/api/auth/me", Some(&cookie), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["user"]["id"], id.to_string());
    assert_eq!(body["roles"], json!(["asesor"]));

    let (status, _) = send(&test.app, "GET", "/api/auth/me", None, None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    Ok(())
}

#[tokio::test]
async fn bearer_header_is_accepted() -> Result<()> {
    let test = spawn_app().await?;
    let (_, cookie) = seed_and_login(&test, "asesor@cvo.example", None).await?;
    let token = cookie.trim_start_matches("cvo-auth-token=").to_string();

    let req = axum::http::Request::builder()
        .method("GET")
        .uri("/api/auth/me")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(axum::body::Body::empty())?;
    let resp = tower::ServiceExt::oneshot(test.app.clone(), req).await?;
    assert_eq!(resp.status(), StatusCode::OK);

    Ok(())
}

#[tokio::test]
async fn logout_revokes_the_session() -> Result<()> {
    let test = spawn_app().await?;
    let (_, cookie) = seed_and_login(&test, "asesor@cvo.example", None).await?;

    let (status, body) = send(&test.app, "POST", "/api/auth/logout", Some(&cookie), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Sesión cerrada");

    let (status, _) = send(&test.app, "GET", "/api/auth/me", Some(&cookie), None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    Ok(())
}

#[tokio::test]
async fn refresh_rotates_the_token() -> Result<()> {
    let test = spawn_app().await?;
    let (_, old_cookie) = seed_and_login(&test, "asesor@cvo.example", None).await?;

    let resp = send_raw(&test.app, "POST", "/api/auth/refresh", Some(&old_cookie), None).await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let new_cookie = resp
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with("cvo-auth-token="))
        .and_then(|v| v.split(';').next())
        .unwrap_or_default()
        .to_string();
    assert_ne!(new_cookie, old_cookie);

    let (status, _) = send(&test.app, "GET", "/api/auth/me", Some(&old_cookie), None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = send(&test.app, "GET", "/api/auth/me", Some(&new_cookie), None).await?;
    assert_eq!(status, StatusCode::OK);

    Ok(())
}

#[tokio::test]
async fn clear_cookies_expires_every_auth_cookie() -> Result<()> {
    let test = spawn_app().await?;

    let resp = send_raw(
        &test.app,
        "POST",
        "/api/auth/clear-cookies",
        Some("sb-project-auth-token=stale; theme=dark"),
        None,
    )
    .await?;
    assert_eq!(resp.status(), StatusCode::OK);

    let cleared: Vec<String> = resp
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(str::to_string)
        .collect();

    for name in [
        "cvo-auth-token",
        "cvo-auth-token.0",
        "cvo-auth-token.1",
        "sb-access-token",
        "sb-refresh-token",
        "sb-project-auth-token",
    ] {
        let cookie = cleared
            .iter()
            .find(|c| c.starts_with(&format!("{name}=")))
            .unwrap_or_else(|| panic!("{name} was not cleared"));
        assert!(cookie.contains("Max-Age=0"), "{cookie}");
    }
    assert!(!cleared.iter().any(|c| c.starts_with("theme=")));

    Ok(())
}

#[tokio::test]
async fn second_login_keeps_first_session_valid() -> Result<()> {
    let test = spawn_app().await?;
    seed_user(&test.pool, "asesor@cvo.example", None).await?;

    let first = login(&test.app, "asesor@cvo.example").await?;
    let second = login(&test.app, "asesor@cvo.example").await?;

    for cookie in [first, second] {
        let (status, _) = send(&test.app, "GET", "/api/auth/me", Some(&cookie), None).await?;
        assert_eq!(status, StatusCode::OK);
    }

    Ok(())
}
