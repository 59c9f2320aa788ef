//! Admin management of staff profiles and their role assignment.
//!
//! A profile carries its role twice: as `user_roles` rows, which the guard
//! reads, and as the `role` display name shown in listings. Both change
//! together inside one transaction.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::{get, put};
use axum::Router;
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::policies::AdminOnly;
use crate::authz::Guarded;
use crate::db::begin_write;
use crate::envelope::{Data, Envelope, MessageBody};
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity_with_context, RequestContext};
use crate::models::rbac::UserRole;
use crate::models::user::{CreateUserRequest, DbProfile, Profile, SetRoleRequest, UpdateUserRequest, PROFILE_COLUMNS};
use crate::utils::{hash_password, utc_now};
use crate::validation::ValidatedJson;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users).post(create_user))
        .route("/users/:id", put(update_user).delete(delete_user))
        .route("/users/:id/role", put(set_user_role))
}

#[utoipa::path(
    get,
    path = "/api/admin/users",
    tag = "Admin",
    responses(
        (status = 200, description = "All profiles", body = Vec<Profile>),
        (status = 401, description = "No session"),
        (status = 403, description = "Admin only")
    )
)]
pub async fn list_users(
    State(state): State<AppState>,
    _guard: Guarded<AdminOnly>,
) -> AppResult<Envelope<Data<Vec<Profile>>>> {
    Ok(Envelope::data(fetch_all_profiles(&state.pool).await?))
}

#[utoipa::path(
    post,
    path = "/api/admin/users",
    tag = "Admin",
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "Profile created", body = Profile),
        (status = 400, description = "email and fullName are required"),
        (status = 409, description = "Email already registered")
    )
)]
pub async fn create_user(
    State(state): State<AppState>,
    guard: Guarded<AdminOnly>,
    headers: HeaderMap,
    ValidatedJson(req): ValidatedJson<CreateUserRequest>,
) -> AppResult<Envelope<Data<Profile>>> {
    let password_hash = match req.password.as_deref().filter(|p| !p.is_empty()) {
        Some(password) => Some(hash_password(password)?),
        None => None,
    };

    let id = Uuid::new_v4();
    let now = utc_now();
    let mut tx = begin_write(&state.pool).await?;

    let taken: Option<String> = sqlx::query_scalar("SELECT id FROM profiles WHERE email = ?")
        .bind(req.email.trim())
        .fetch_optional(&mut *tx)
        .await?;
    if taken.is_some() {
        return Err(AppError::conflict("email already registered"));
    }

    sqlx::query(
        "INSERT INTO profiles (id, email, full_name, alias, phone, position, avatar_url, password_hash, welcome_email_sent, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)",
    )
    .bind(id.to_string())
    .bind(req.email.trim())
    .bind(req.full_name.trim())
    .bind(&req.alias)
    .bind(&req.phone)
    .bind(&req.position)
    .bind(&req.avatar_url)
    .bind(password_hash)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    if let Some(role_id) = req.role_id {
        match role_name(&mut tx, role_id).await? {
            Some(name) => assign_role(&mut tx, id, role_id, &name).await?,
            None => tracing::debug!(%role_id, "unknown role on user creation, left unassigned"),
        }
    }

    let user = fetch_profile_on(&mut tx, id).await?;
    tx.commit().await?;

    if !req.skip_welcome_email && state.config.smtp.is_none() {
        tracing::debug!(user_id = %id, "no SMTP configured, welcome email not sent");
    }

    log_activity_with_context(
        &state.event_bus,
        "created",
        Some(guard.user_id()),
        &user,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Envelope::created_data(user))
}

/// Profile update. A `roleId` that names no role is ignored and the current
/// assignment stays.
#[utoipa::path(
    put,
    path = "/api/admin/users/{id}",
    tag = "Admin",
    params(("id" = Uuid, Path, description = "Profile id")),
    request_body = UpdateUserRequest,
    responses(
        (status = 200, description = "Profile updated", body = Profile),
        (status = 404, description = "Profile not found")
    )
)]
pub async fn update_user(
    State(state): State<AppState>,
    guard: Guarded<AdminOnly>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<UpdateUserRequest>,
) -> AppResult<Envelope<Data<Profile>>> {
    let mut tx = begin_write(&state.pool).await?;
    let old = fetch_profile_on(&mut tx, id).await?;

    sqlx::query(
        "UPDATE profiles SET full_name = ?, alias = ?, phone = ?, position = ?, avatar_url = ?, updated_at = ? WHERE id = ?",
    )
    .bind(req.full_name.as_deref().map(str::trim).unwrap_or(&old.full_name))
    .bind(req.alias.clone().or_else(|| old.alias.clone()))
    .bind(req.phone.clone().or_else(|| old.phone.clone()))
    .bind(req.position.clone().or_else(|| old.position.clone()))
    .bind(req.avatar_url.clone().or_else(|| old.avatar_url.clone()))
    .bind(utc_now())
    .bind(id.to_string())
    .execute(&mut *tx)
    .await?;

    if let Some(role_id) = req.role_id {
        match role_name(&mut tx, role_id).await? {
            Some(name) => assign_role(&mut tx, id, role_id, &name).await?,
            None => tracing::debug!(%role_id, user_id = %id, "unknown role on profile update, role unchanged"),
        }
    }

    let user = fetch_profile_on(&mut tx, id).await?;
    tx.commit().await?;

    log_activity_with_context(
        &state.event_bus,
        "updated",
        Some(guard.user_id()),
        &user,
        Some(&old),
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Envelope::data(user))
}

/// Replaces the user's role. Setting the role the user already has leaves the
/// same state behind.
#[utoipa::path(
    put,
    path = "/api/admin/users/{id}/role",
    tag = "Admin",
    params(("id" = Uuid, Path, description = "Profile id")),
    request_body = SetRoleRequest,
    responses(
        (status = 200, description = "Role set", body = Profile),
        (status = 404, description = "Profile or role not found")
    )
)]
pub async fn set_user_role(
    State(state): State<AppState>,
    guard: Guarded<AdminOnly>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<SetRoleRequest>,
) -> AppResult<Envelope<Data<Profile>>> {
    let mut tx = begin_write(&state.pool).await?;
    let old = fetch_profile_on(&mut tx, id).await?;

    let name = role_name(&mut tx, req.role_id)
        .await?
        .ok_or_else(|| AppError::not_found("role not found"))?;
    assign_role(&mut tx, id, req.role_id, &name).await?;

    let user = fetch_profile_on(&mut tx, id).await?;
    tx.commit().await?;

    log_activity_with_context(
        &state.event_bus,
        "assigned",
        Some(guard.user_id()),
        &UserRole {
            user_id: id,
            role_id: req.role_id,
            created_at: user.updated_at,
        },
        None,
        Some(RequestContext::from_headers(&headers)),
    );
    tracing::info!(user_id = %id, from = ?old.role, to = %name, "user role set");

    Ok(Envelope::data(user))
}

#[utoipa::path(
    delete,
    path = "/api/admin/users/{id}",
    tag = "Admin",
    params(("id" = Uuid, Path, description = "Profile id")),
    responses(
        (status = 200, description = "Profile removed"),
        (status = 404, description = "Profile not found")
    )
)]
pub async fn delete_user(
    State(state): State<AppState>,
    guard: Guarded<AdminOnly>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> AppResult<Envelope<MessageBody>> {
    let mut conn = state.pool.acquire().await?;
    let user = fetch_profile_on(&mut conn, id).await?;

    sqlx::query("DELETE FROM profiles WHERE id = ?")
        .bind(id.to_string())
        .execute(&mut *conn)
        .await?;

    log_activity_with_context(
        &state.event_bus,
        "deleted",
        Some(guard.user_id()),
        &user,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Envelope::message("Usuario eliminado"))
}

pub(crate) async fn fetch_profile(pool: &SqlitePool, id: Uuid) -> AppResult<Profile> {
    let mut conn = pool.acquire().await?;
    fetch_profile_on(&mut conn, id).await
}

pub(crate) async fn fetch_all_profiles(pool: &SqlitePool) -> AppResult<Vec<Profile>> {
    let rows = sqlx::query_as::<_, DbProfile>(&format!(
        "SELECT {PROFILE_COLUMNS} FROM profiles ORDER BY full_name COLLATE NOCASE"
    ))
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(Profile::try_from).collect()
}

async fn fetch_profile_on(conn: &mut SqliteConnection, id: Uuid) -> AppResult<Profile> {
    sqlx::query_as::<_, DbProfile>(&format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = ?"))
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::not_found("user not found"))?
        .try_into()
}

async fn role_name(conn: &mut SqliteConnection, role_id: Uuid) -> AppResult<Option<String>> {
    Ok(sqlx::query_scalar("SELECT name FROM roles WHERE id = ?")
        .bind(role_id.to_string())
        .fetch_optional(&mut *conn)
        .await?)
}

async fn assign_role(conn: &mut SqliteConnection, user_id: Uuid, role_id: Uuid, name: &str) -> AppResult<()> {
    let now = utc_now();

    sqlx::query("DELETE FROM user_roles WHERE user_id = ?")
        .bind(user_id.to_string())
        .execute(&mut *conn)
        .await?;

    sqlx::query("INSERT INTO user_roles (user_id, role_id, created_at) VALUES (?, ?, ?)")
        .bind(user_id.to_string())
        .bind(role_id.to_string())
        .bind(now)
        .execute(&mut *conn)
        .await?;

    sqlx::query("UPDATE profiles SET role = ?, updated_at = ? WHERE id = ?")
        .bind(name)
        .bind(now)
        .bind(user_id.to_string())
        .execute(&mut *conn)
        .await?;

    Ok(())
}
