//! Storage for assistant chat history. Every query is scoped to the caller.

use axum::extract::{Query, State};
use axum::routing::get;
use axum::Router;
use chrono::Duration;
use serde::Serialize;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::policies::Authenticated;
use crate::authz::Guarded;
use crate::db::begin_write;
use crate::envelope::{Envelope, MessageBody};
use crate::errors::{AppError, AppResult};
use crate::models::conversation::{
    session_title, AssistantSession, Conversation, ConversationQuery, DbAssistantSession, DbConversation,
    SaveConversationRequest, SavedConversation,
};
use crate::utils::utc_now;
use crate::validation::ValidatedJson;

/// Conversations older than this are removed by `?action=cleanup`.
pub const RETENTION_DAYS: i64 = 30;

pub fn routes() -> Router<AppState> {
    Router::new().route(
        "/conversations",
        get(get_conversations).post(save_conversation).delete(delete_conversations),
    )
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ConversationListing {
    Sessions { sessions: Vec<AssistantSession> },
    History { history: Vec<Conversation> },
}

#[utoipa::path(
    get,
    path = "/api/ai-assistant/conversations",
    tag = "Assistant",
    params(ConversationQuery),
    responses(
        (status = 200, description = "`sessions` for action=sessions, `history` for sessionId"),
        (status = 400, description = "Neither action nor sessionId given"),
        (status = 404, description = "Session not found for this user")
    )
)]
pub async fn get_conversations(
    State(state): State<AppState>,
    guard: Guarded<Authenticated>,
    Query(query): Query<ConversationQuery>,
) -> AppResult<Envelope<ConversationListing>> {
    let user_id = guard.user_id().to_string();

    if query.action.as_deref() == Some("sessions") {
        let rows = sqlx::query_as::<_, DbAssistantSession>(
            "SELECT s.id, s.title, s.last_message_at, s.created_at, \
             (SELECT COUNT(*) FROM ai_conversations c WHERE c.session_id = s.id) AS message_count \
             FROM ai_sessions s WHERE s.user_id = ? \
             ORDER BY COALESCE(s.last_message_at, s.created_at) DESC",
        )
        .bind(&user_id)
        .fetch_all(&state.pool)
        .await?;

        let sessions = rows
            .into_iter()
            .map(AssistantSession::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Envelope::ok(ConversationListing::Sessions { sessions }));
    }

    if let Some(session_id) = query.session_id {
        let owned: Option<String> = sqlx::query_scalar("SELECT id FROM ai_sessions WHERE id = ? AND user_id = ?")
            .bind(session_id.to_string())
            .bind(&user_id)
            .fetch_optional(&state.pool)
            .await?;
        if owned.is_none() {
            return Err(AppError::not_found("session not found"));
        }

        let rows = sqlx::query_as::<_, DbConversation>(
            "SELECT id, session_id, message, response, context_data, created_at FROM ai_conversations WHERE session_id = ? ORDER BY created_at",
        )
        .bind(session_id.to_string())
        .fetch_all(&state.pool)
        .await?;

        let history = rows
            .into_iter()
            .map(Conversation::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Envelope::ok(ConversationListing::History { history }));
    }

    Err(AppError::bad_request("action=sessions or sessionId is required"))
}

/// Stores one message/response pair, opening a session when none is given.
#[utoipa::path(
    post,
    path = "/api/ai-assistant/conversations",
    tag = "Assistant",
    request_body = SaveConversationRequest,
    responses(
        (status = 200, description = "Pair stored", body = SavedConversation),
        (status = 400, description = "message and response are required"),
        (status = 404, description = "Session not found for this user")
    )
)]
pub async fn save_conversation(
    State(state): State<AppState>,
    guard: Guarded<Authenticated>,
    ValidatedJson(req): ValidatedJson<SaveConversationRequest>,
) -> AppResult<Envelope<SavedConversation>> {
    let user_id = guard.user_id().to_string();
    let now = utc_now();
    let mut tx = begin_write(&state.pool).await?;

    let session_id = match req.session_id {
        Some(session_id) => {
            let owned: Option<String> =
                sqlx::query_scalar("SELECT id FROM ai_sessions WHERE id = ? AND user_id = ?")
                    .bind(session_id.to_string())
                    .bind(&user_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            if owned.is_none() {
                return Err(AppError::not_found("session not found"));
            }
            session_id
        }
        None => {
            let session_id = Uuid::new_v4();
            sqlx::query("INSERT INTO ai_sessions (id, user_id, title, created_at) VALUES (?, ?, ?, ?)")
                .bind(session_id.to_string())
                .bind(&user_id)
                .bind(session_title(&req.message))
                .bind(now)
                .execute(&mut *tx)
                .await?;
            session_id
        }
    };

    let conversation_id = Uuid::new_v4();
    let context_data = req.context_data.as_ref().map(|value| value.to_string());

    sqlx::query(
        "INSERT INTO ai_conversations (id, user_id, session_id, message, response, context_data, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(conversation_id.to_string())
    .bind(&user_id)
    .bind(session_id.to_string())
    .bind(&req.message)
    .bind(&req.response)
    .bind(context_data)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    sqlx::query("UPDATE ai_sessions SET last_message_at = ? WHERE id = ?")
        .bind(now)
        .bind(session_id.to_string())
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(Envelope::ok(SavedConversation {
        conversation_id,
        session_id,
        created_at: now,
    }))
}

#[utoipa::path(
    delete,
    path = "/api/ai-assistant/conversations",
    tag = "Assistant",
    params(ConversationQuery),
    responses(
        (status = 200, description = "Session, conversation or old history removed"),
        (status = 400, description = "No target given")
    )
)]
pub async fn delete_conversations(
    State(state): State<AppState>,
    guard: Guarded<Authenticated>,
    Query(query): Query<ConversationQuery>,
) -> AppResult<Envelope<MessageBody>> {
    let user_id = guard.user_id().to_string();

    if query.action.as_deref() == Some("cleanup") {
        let cutoff = utc_now() - Duration::days(RETENTION_DAYS);
        let mut tx = begin_write(&state.pool).await?;

        let removed = sqlx::query("DELETE FROM ai_conversations WHERE user_id = ? AND created_at < ?")
            .bind(&user_id)
            .bind(cutoff)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        sqlx::query(
            "DELETE FROM ai_sessions WHERE user_id = ? AND NOT EXISTS (SELECT 1 FROM ai_conversations c WHERE c.session_id = ai_sessions.id)",
        )
        .bind(&user_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::debug!(user_id = %guard.user_id(), removed, "assistant history cleaned up");

        return Ok(Envelope::message("Conversaciones antiguas eliminadas"));
    }

    if let Some(session_id) = query.session_id {
        let result = sqlx::query("DELETE FROM ai_sessions WHERE id = ? AND user_id = ?")
            .bind(session_id.to_string())
            .bind(&user_id)
            .execute(&state.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::not_found("session not found"));
        }
        return Ok(Envelope::message("Sesión eliminada"));
    }

    if let Some(conversation_id) = query.conversation_id {
        let result = sqlx::query("DELETE FROM ai_conversations WHERE id = ? AND user_id = ?")
            .bind(conversation_id.to_string())
            .bind(&user_id)
            .execute(&state.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::not_found("conversation not found"));
        }
        return Ok(Envelope::message("Conversación eliminada"));
    }

    Err(AppError::bad_request("action=cleanup, sessionId or conversationId is required"))
}
