mod common;

use anyhow::Result;
use axum::http::StatusCode;
use serde_json::json;

use common::{count, seed_and_login, send, spawn_app, ADMIN_ROLE_ID, ASESOR_ROLE_ID, FOTOGRAFO_ROLE_ID};

fn vehicle_body() -> serde_json::Value {
    json!({
        "license_plate": "1234 abc",
        "brand": "Seat",
        "model": "Ibiza",
        "vehicle_type": "Coche",
        "price": 14500.0
    })
}

fn sale_body() -> serde_json::Value {
    json!({
        "license_plate": "5678DEF",
        "model": "León",
        "client_name": "Marta Ruiz",
        "sale_date": "2025-03-10",
        "price": 21000.0
    })
}

#[tokio::test]
async fn no_session_is_401_and_nothing_is_written() -> Result<()> {
    let test = spawn_app().await?;

    let (status, body) = send(&test.app, "POST", "/api/vehicles", None, Some(vehicle_body())).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "unauthorized");
    assert_eq!(count(&test.pool, "vehicles").await?, 0);

    let (status, _) = send(&test.app, "GET", "/api/vehicles", None, None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    Ok(())
}

#[tokio::test]
async fn forged_cookie_is_treated_as_no_session() -> Result<()> {
    let test = spawn_app().await?;

    let (status, _) = send(
        &test.app,
        "POST",
        "/api/vehicles",
        Some("cvo-auth-token=not.a.jwt"),
        Some(vehicle_body()),
    )
    .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(count(&test.pool, "vehicles").await?, 0);

    Ok(())
}

#[tokio::test]
async fn role_outside_the_policy_is_403_and_nothing_is_written() -> Result<()> {
    let test = spawn_app().await?;
    let (_, cookie) = seed_and_login(&test, "foto@cvo.example", Some(FOTOGRAFO_ROLE_ID)).await?;

    let (status, body) = send(&test.app, "POST", "/api/sales", Some(&cookie), Some(sale_body())).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["success"], false);
    assert_eq!(count(&test.pool, "sales").await?, 0);

    let (status, _) = send(&test.app, "GET", "/api/sales", Some(&cookie), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    Ok(())
}

#[tokio::test]
async fn user_without_any_role_is_denied_role_gated_routes() -> Result<()> {
    let test = spawn_app().await?;
    let (_, cookie) = seed_and_login(&test, "nobody@cvo.example", None).await?;

    let (status, _) = send(&test.app, "GET", "/api/vehicles", Some(&cookie), None).await?;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&test.app, "POST", "/api/vehicles", Some(&cookie), Some(vehicle_body())).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&test.app, "GET", "/api/admin/users", Some(&cookie), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    Ok(())
}

#[tokio::test]
async fn granted_role_reaches_the_store() -> Result<()> {
    let test = spawn_app().await?;
    let (_, cookie) = seed_and_login(&test, "asesor@cvo.example", Some(ASESOR_ROLE_ID)).await?;

    let (status, body) = send(&test.app, "POST", "/api/sales", Some(&cookie), Some(sale_body())).await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["client_name"], "Marta Ruiz");
    assert_eq!(count(&test.pool, "sales").await?, 1);

    Ok(())
}

#[tokio::test]
async fn admin_holds_every_permission() -> Result<()> {
    let test = spawn_app().await?;
    let (_, cookie) = seed_and_login(&test, "admin@cvo.example", Some(ADMIN_ROLE_ID)).await?;

    let (status, _) = send(&test.app, "POST", "/api/vehicles", Some(&cookie), Some(vehicle_body())).await?;
    assert_eq!(status, StatusCode::CREATED);

    Ok(())
}

#[tokio::test]
async fn admin_variant_role_name_counts_as_admin() -> Result<()> {
    let test = spawn_app().await?;
    let (_, admin) = seed_and_login(&test, "admin@cvo.example", Some(ADMIN_ROLE_ID)).await?;

    let (status, body) = send(
        &test.app,
        "POST",
        "/api/admin/roles",
        Some(&admin),
        Some(json!({ "name": "Administrador", "description": "Legacy admin name" })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    let role_id = body["role"]["id"].as_str().unwrap_or_default().to_string();

    let (_, legacy) = seed_and_login(&test, "legacy@cvo.example", Some(&role_id)).await?;
    let (status, _) = send(&test.app, "GET", "/api/admin/roles", Some(&legacy), None).await?;
    assert_eq!(status, StatusCode::OK);

    Ok(())
}

#[tokio::test]
async fn admin_roles_listing_requires_a_session() -> Result<()> {
    let test = spawn_app().await?;

    let (status, body) = send(&test.app, "GET", "/api/admin/roles", None, None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);

    let (_, cookie) = seed_and_login(&test, "asesor@cvo.example", Some(ASESOR_ROLE_ID)).await?;
    let (status, _) = send(&test.app, "GET", "/api/admin/roles", Some(&cookie), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    Ok(())
}
