use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::Router;
use axum_extra::extract::cookie::CookieJar;
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::app::AppState;
use crate::envelope::{Envelope, MessageBody};
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity_with_context, RequestContext};
use crate::models::user::{DbProfile, LoginRequest, Profile, SessionUser, PROFILE_COLUMNS};
use crate::roles::roles_for_display;
use crate::routes::admin_users::fetch_profile;
use crate::session::{clear_auth_cookies, AuthSession, Principal};
use crate::utils::{utc_now, verify_password};
use crate::validation::ValidatedJson;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/me", get(me))
        .route("/refresh", post(refresh))
        .route("/logout", post(logout))
        .route("/clear-cookies", post(clear_cookies))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UserBody {
    pub user: Profile,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RefreshBody {
    pub expires_at: DateTime<Utc>,
}

#[utoipa::path(
    post,
    path = "/api/auth/login",
    tag = "Auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Session cookie set", body = UserBody),
        (status = 400, description = "Missing or malformed field"),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    headers: HeaderMap,
    ValidatedJson(payload): ValidatedJson<LoginRequest>,
) -> AppResult<(CookieJar, Envelope<UserBody>)> {
    let db_profile = sqlx::query_as::<_, DbProfile>(&format!(
        "SELECT {PROFILE_COLUMNS} FROM profiles WHERE email = ?"
    ))
    .bind(payload.email.trim())
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::unauthorized("invalid credentials"))?;

    let password_hash = db_profile
        .password_hash
        .clone()
        .ok_or_else(|| AppError::unauthorized("invalid credentials"))?;

    if !verify_password(&payload.password, &password_hash)? {
        return Err(AppError::unauthorized("invalid credentials"));
    }

    let now = utc_now();
    sqlx::query("UPDATE profiles SET last_sign_in_at = ? WHERE id = ?")
        .bind(now)
        .bind(&db_profile.id)
        .execute(&state.pool)
        .await?;

    let mut user: Profile = db_profile.try_into()?;
    user.last_sign_in_at = Some(now);

    let issued = state
        .sessions
        .issue(&Principal {
            id: user.id,
            email: user.email.clone(),
        })
        .await?;

    log_activity_with_context(
        &state.event_bus,
        "login",
        Some(user.id),
        &user,
        None,
        Some(RequestContext::from_headers(&headers)),
    );
    tracing::info!(user_id = %user.id, "user signed in");

    let jar = jar.add(state.sessions.session_cookie(issued.token));
    Ok((jar, Envelope::ok(UserBody { user })))
}

#[utoipa::path(
    get,
    path = "/api/auth/me",
    tag = "Auth",
    responses(
        (status = 200, description = "Current user and roles", body = SessionUser),
        (status = 401, description = "No session")
    )
)]
pub async fn me(State(state): State<AppState>, AuthSession(session): AuthSession) -> AppResult<Envelope<SessionUser>> {
    let user = fetch_profile(&state.pool, session.principal.id).await?;
    let roles = roles_for_display(state.roles.as_ref(), user.id).await;
    Ok(Envelope::ok(SessionUser { user, roles }))
}

#[utoipa::path(
    post,
    path = "/api/auth/refresh",
    tag = "Auth",
    responses(
        (status = 200, description = "Token rotated", body = RefreshBody),
        (status = 401, description = "No session")
    )
)]
pub async fn refresh(
    State(state): State<AppState>,
    jar: CookieJar,
    AuthSession(session): AuthSession,
) -> AppResult<(CookieJar, Envelope<RefreshBody>)> {
    let issued = state.sessions.refresh(&session).await?;
    let expires_at = issued.session.expires_at;
    let jar = jar.add(state.sessions.session_cookie(issued.token));
    Ok((jar, Envelope::ok(RefreshBody { expires_at })))
}

#[utoipa::path(
    post,
    path = "/api/auth/logout",
    tag = "Auth",
    responses(
        (status = 200, description = "Session revoked and cookies cleared"),
        (status = 401, description = "No session")
    )
)]
pub async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
    headers: HeaderMap,
    AuthSession(session): AuthSession,
) -> AppResult<(CookieJar, Envelope<MessageBody>)> {
    state.sessions.revoke(&session).await?;

    if let Ok(user) = fetch_profile(&state.pool, session.principal.id).await {
        log_activity_with_context(
            &state.event_bus,
            "logout",
            Some(user.id),
            &user,
            None,
            Some(RequestContext::from_headers(&headers)),
        );
    }

    Ok((clear_auth_cookies(jar), Envelope::message("Sesión cerrada")))
}

/// Public: recovers a browser stuck with a corrupted session.
#[utoipa::path(
    post,
    path = "/api/auth/clear-cookies",
    tag = "Auth",
    responses((status = 200, description = "Every known auth cookie expired"))
)]
pub async fn clear_cookies(jar: CookieJar) -> (CookieJar, Envelope<MessageBody>) {
    (clear_auth_cookies(jar), Envelope::message("Cookies de autenticación eliminadas"))
}
