mod common;

use anyhow::Result;
use axum::http::StatusCode;

use common::{send, spawn_app};

#[tokio::test]
async fn health_is_public_and_reports_integrations() -> Result<()> {
    let test = spawn_app().await?;

    let (status, body) = send(&test.app, "GET", "/api/health", None, None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["db_ok"], true);
    assert_eq!(body["integrations"]["smtp"], false);
    assert_eq!(body["integrations"]["push"], false);

    Ok(())
}

#[tokio::test]
async fn openapi_document_is_served() -> Result<()> {
    let test = spawn_app().await?;

    let (status, doc) = send(&test.app, "GET", "/api-docs/openapi.json", None, None).await?;
    assert_eq!(status, StatusCode::OK);
    assert!(doc["paths"]["/api/vehicles"]["get"].is_object());
    assert_eq!(doc["servers"][0]["url"], "http://localhost:3000");

    Ok(())
}
