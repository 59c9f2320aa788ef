//! In-app notifications and push subscription records.
//!
//! Rows are stored here; delivery to a push service happens elsewhere.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post, put};
use axum::Router;
use sqlx::{QueryBuilder, Sqlite};
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::policies::{AdminOnly, Authenticated};
use crate::authz::{role_matches, Guarded};
use crate::db::begin_write;
use crate::db::row_parsers::parse_uuid;
use crate::envelope::{Data, Envelope, MessageBody};
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity_with_context, RequestContext};
use crate::models::notification::{
    BroadcastRequest, BroadcastResult, DbNotification, Notification, NotificationQuery, PushSubscription,
    SubscribeRequest, UnsubscribeRequest,
};
use crate::utils::utc_now;
use crate::validation::ValidatedJson;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_notifications))
        .route("/:id/read", put(mark_read))
        .route("/subscriptions", post(subscribe).delete(unsubscribe))
}

/// Mounted under `/admin`.
pub fn admin_routes() -> Router<AppState> {
    Router::new().route("/notifications", post(broadcast))
}

#[utoipa::path(
    get,
    path = "/api/notifications",
    tag = "Notifications",
    params(NotificationQuery),
    responses(
        (status = 200, description = "Caller's notifications, newest first", body = Vec<Notification>),
        (status = 401, description = "No session")
    )
)]
pub async fn list_notifications(
    State(state): State<AppState>,
    guard: Guarded<Authenticated>,
    Query(query): Query<NotificationQuery>,
) -> AppResult<Envelope<Data<Vec<Notification>>>> {
    let mut builder: QueryBuilder<Sqlite> =
        QueryBuilder::new("SELECT id, title, body, url, read_at, created_at FROM notifications WHERE user_id = ");
    builder.push_bind(guard.user_id().to_string());
    if query.unread == Some(true) {
        builder.push(" AND read_at IS NULL");
    }
    builder.push(" ORDER BY created_at DESC");

    let rows = builder.build_query_as::<DbNotification>().fetch_all(&state.pool).await?;
    let notifications = rows
        .into_iter()
        .map(Notification::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Envelope::data(notifications))
}

#[utoipa::path(
    put,
    path = "/api/notifications/{id}/read",
    tag = "Notifications",
    params(("id" = Uuid, Path, description = "Notification id")),
    responses(
        (status = 200, description = "Marked as read"),
        (status = 404, description = "Not one of the caller's notifications")
    )
)]
pub async fn mark_read(
    State(state): State<AppState>,
    guard: Guarded<Authenticated>,
    Path(id): Path<Uuid>,
) -> AppResult<Envelope<MessageBody>> {
    let result = sqlx::query("UPDATE notifications SET read_at = COALESCE(read_at, ?) WHERE id = ? AND user_id = ?")
        .bind(utc_now())
        .bind(id.to_string())
        .bind(guard.user_id().to_string())
        .execute(&state.pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found("notification not found"));
    }

    Ok(Envelope::message("Notificación marcada como leída"))
}

/// Registers a browser push endpoint for the caller. Re-subscribing an
/// endpoint the caller owns replaces its keys; another user's endpoint is 409.
#[utoipa::path(
    post,
    path = "/api/notifications/subscriptions",
    tag = "Notifications",
    request_body = SubscribeRequest,
    responses(
        (status = 200, description = "Subscription stored", body = PushSubscription),
        (status = 409, description = "Endpoint belongs to another user")
    )
)]
pub async fn subscribe(
    State(state): State<AppState>,
    guard: Guarded<Authenticated>,
    ValidatedJson(req): ValidatedJson<SubscribeRequest>,
) -> AppResult<Envelope<Data<PushSubscription>>> {
    let mut tx = begin_write(&state.pool).await?;

    let stored = sqlx::query(
        "INSERT INTO push_subscriptions (id, user_id, endpoint, p256dh, auth, created_at) VALUES (?, ?, ?, ?, ?, ?) \
         ON CONFLICT(endpoint) DO UPDATE SET p256dh = excluded.p256dh, auth = excluded.auth \
         WHERE push_subscriptions.user_id = excluded.user_id",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(guard.user_id().to_string())
    .bind(req.endpoint.trim())
    .bind(&req.keys.p256dh)
    .bind(&req.keys.auth)
    .bind(utc_now())
    .execute(&mut *tx)
    .await?;

    if stored.rows_affected() == 0 {
        return Err(AppError::conflict("endpoint registered to another user"));
    }

    let (id, endpoint, created_at): (String, String, chrono::DateTime<chrono::Utc>) =
        sqlx::query_as("SELECT id, endpoint, created_at FROM push_subscriptions WHERE endpoint = ?")
            .bind(req.endpoint.trim())
            .fetch_one(&mut *tx)
            .await?;
    tx.commit().await?;

    if state.config.push.is_none() {
        tracing::debug!("push keys not configured, subscription stored without delivery");
    }

    Ok(Envelope::data(PushSubscription {
        id: parse_uuid(&id, "push_subscriptions.id")?,
        endpoint,
        created_at,
    }))
}

#[utoipa::path(
    delete,
    path = "/api/notifications/subscriptions",
    tag = "Notifications",
    request_body = UnsubscribeRequest,
    responses(
        (status = 200, description = "Subscription removed"),
        (status = 404, description = "Endpoint not registered for the caller")
    )
)]
pub async fn unsubscribe(
    State(state): State<AppState>,
    guard: Guarded<Authenticated>,
    ValidatedJson(req): ValidatedJson<UnsubscribeRequest>,
) -> AppResult<Envelope<MessageBody>> {
    let result = sqlx::query("DELETE FROM push_subscriptions WHERE endpoint = ? AND user_id = ?")
        .bind(req.endpoint.trim())
        .bind(guard.user_id().to_string())
        .execute(&state.pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found("subscription not found"));
    }

    Ok(Envelope::message("Suscripción eliminada"))
}

/// One notification per target profile: everyone, or holders of `role`.
#[utoipa::path(
    post,
    path = "/api/admin/notifications",
    tag = "Notifications",
    request_body = BroadcastRequest,
    responses(
        (status = 201, description = "Notifications created", body = BroadcastResult),
        (status = 403, description = "Admin only")
    )
)]
pub async fn broadcast(
    State(state): State<AppState>,
    guard: Guarded<AdminOnly>,
    headers: HeaderMap,
    ValidatedJson(req): ValidatedJson<BroadcastRequest>,
) -> AppResult<Envelope<BroadcastResult>> {
    let role = req.role.as_deref().map(str::trim);
    let recipients = recipients(&state, role).await?;
    let mut tx = begin_write(&state.pool).await?;

    let now = utc_now();
    for user_id in &recipients {
        sqlx::query("INSERT INTO notifications (id, user_id, title, body, url, created_at) VALUES (?, ?, ?, ?, ?, ?)")
            .bind(Uuid::new_v4().to_string())
            .bind(user_id)
            .bind(req.title.trim())
            .bind(req.body.trim())
            .bind(&req.url)
            .bind(now)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    let result = BroadcastResult {
        id: Uuid::new_v4(),
        title: req.title.trim().to_string(),
        role: role.map(str::to_string),
        sent: recipients.len() as i64,
    };

    log_activity_with_context(
        &state.event_bus,
        "sent",
        Some(guard.user_id()),
        &result,
        None,
        Some(RequestContext::from_headers(&headers)),
    );
    tracing::info!(sent = result.sent, role = ?result.role, "notification broadcast");

    Ok(Envelope::created(result))
}

/// Every profile, or those whose resolved roles match `role` the way the
/// access guard matches them.
async fn recipients(state: &AppState, role: Option<&str>) -> AppResult<Vec<String>> {
    let profiles: Vec<String> = sqlx::query_scalar("SELECT id FROM profiles").fetch_all(&state.pool).await?;
    let Some(role) = role else {
        return Ok(profiles);
    };

    let mut matched = Vec::new();
    for id in profiles {
        let held = state.roles.fetch_roles(parse_uuid(&id, "profiles.id")?).await?;
        if held.iter().any(|name| role_matches(name, role)) {
            matched.push(id);
        }
    }

    Ok(matched)
}
