mod common;

use anyhow::Result;
use axum::http::StatusCode;
use chrono::{Duration, Utc};
use serde_json::json;

use common::{count, seed_and_login, send, spawn_app};

#[tokio::test]
async fn first_message_opens_a_session_titled_after_it() -> Result<()> {
    let test = spawn_app().await?;
    let (_, cookie) = seed_and_login(&test, "asesor@cvo.example", None).await?;
    let long_message = "¿Qué coches de la marca BMW siguen disponibles en el stock de esta semana?";

    let (status, saved) = send(
        &test.app,
        "POST",
        "/api/ai-assistant/conversations",
        Some(&cookie),
        Some(json!({ "message": long_message, "response": "Hay tres." })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    let session_id = saved["sessionId"].as_str().unwrap_or_default().to_string();
    assert!(!session_id.is_empty());

    let (status, _) = send(
        &test.app,
        "POST",
        "/api/ai-assistant/conversations",
        Some(&cookie),
        Some(json!({ "message": "¿Y Audi?", "response": "Uno.", "sessionId": session_id })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);

    let (status, listing) = send(
        &test.app,
        "GET",
        "/api/ai-assistant/conversations?action=sessions",
        Some(&cookie),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    let sessions = listing["sessions"].as_array().cloned().unwrap_or_default();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["message_count"], 2);
    let expected_title: String = long_message.chars().take(50).collect::<String>() + "...";
    assert_eq!(sessions[0]["title"], expected_title);

    let (status, history) = send(
        &test.app,
        "GET",
        &format!("/api/ai-assistant/conversations?sessionId={session_id}"),
        Some(&cookie),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    let history = history["history"].as_array().cloned().unwrap_or_default();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0]["response"], "Hay tres.");

    Ok(())
}

#[tokio::test]
async fn another_users_session_is_invisible() -> Result<()> {
    let test = spawn_app().await?;
    let (_, owner) = seed_and_login(&test, "owner@cvo.example", None).await?;
    let (_, other) = seed_and_login(&test, "other@cvo.example", None).await?;

    let (_, saved) = send(
        &test.app,
        "POST",
        "/api/ai-assistant/conversations",
        Some(&owner),
        Some(json!({ "message": "hola", "response": "hola" })),
    )
    .await?;
    let session_id = saved["sessionId"].as_str().unwrap_or_default().to_string();

    let (status, _) = send(
        &test.app,
        "GET",
        &format!("/api/ai-assistant/conversations?sessionId={session_id}"),
        Some(&other),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &test.app,
        "POST",
        "/api/ai-assistant/conversations",
        Some(&other),
        Some(json!({ "message": "intruso", "response": "no", "sessionId": session_id })),
    )
    .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &test.app,
        "DELETE",
        &format!("/api/ai-assistant/conversations?sessionId={session_id}"),
        Some(&other),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(count(&test.pool, "ai_conversations").await?, 1);

    let (_, listing) = send(
        &test.app,
        "GET",
        "/api/ai-assistant/conversations?action=sessions",
        Some(&other),
        None,
    )
    .await?;
    assert_eq!(listing["sessions"], json!([]));

    Ok(())
}

#[tokio::test]
async fn cleanup_removes_only_old_conversations_and_empty_sessions() -> Result<()> {
    let test = spawn_app().await?;
    let (user_id, cookie) = seed_and_login(&test, "asesor@cvo.example", None).await?;

    let (_, fresh) = send(
        &test.app,
        "POST",
        "/api/ai-assistant/conversations",
        Some(&cookie),
        Some(json!({ "message": "reciente", "response": "ok" })),
    )
    .await?;

    let old_session = uuid::Uuid::new_v4().to_string();
    let long_ago = Utc::now() - Duration::days(45);
    sqlx::query("INSERT INTO ai_sessions (id, user_id, title, last_message_at, created_at) VALUES (?, ?, 'viejo', ?, ?)")
        .bind(&old_session)
        .bind(user_id.to_string())
        .bind(long_ago)
        .bind(long_ago)
        .execute(&test.pool)
        .await?;
    sqlx::query(
        "INSERT INTO ai_conversations (id, user_id, session_id, message, response, created_at) VALUES (?, ?, ?, 'viejo', 'ok', ?)",
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(user_id.to_string())
    .bind(&old_session)
    .bind(long_ago)
    .execute(&test.pool)
    .await?;

    let (status, body) = send(
        &test.app,
        "DELETE",
        "/api/ai-assistant/conversations?action=cleanup",
        Some(&cookie),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Conversaciones antiguas eliminadas");

    assert_eq!(count(&test.pool, "ai_conversations").await?, 1);
    let remaining: Vec<String> = sqlx::query_scalar("SELECT id FROM ai_sessions")
        .fetch_all(&test.pool)
        .await?;
    assert_eq!(remaining, vec![fresh["sessionId"].as_str().unwrap_or_default().to_string()]);

    Ok(())
}

#[tokio::test]
async fn unknown_action_is_400() -> Result<()> {
    let test = spawn_app().await?;
    let (_, cookie) = seed_and_login(&test, "asesor@cvo.example", None).await?;

    let (status, _) = send(&test.app, "GET", "/api/ai-assistant/conversations", Some(&cookie), None).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = send(&test.app, "DELETE", "/api/ai-assistant/conversations", Some(&cookie), None).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    Ok(())
}
