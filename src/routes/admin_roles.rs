//! Admin management of roles, their permission grants and the activity log.
//!
//! Role and grant changes are logged with Critical severity.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::{delete, get, post};
use axum::Router;
use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::policies::AdminOnly;
use crate::authz::role_names::VIEWER;
use crate::authz::Guarded;
use crate::db::begin_write;
use crate::db::row_parsers::split_role_names;
use crate::envelope::{Data, Envelope, MessageBody};
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity_with_context, RequestContext};
use crate::models::activity::{ActivityEntry, ActivityQuery, ActivityView};
use crate::models::rbac::{
    AssignPermissionToRoleRequest, DbPermission, DbRole, Permission, Role, RoleBody, RoleCreateRequest,
    RolePermission,
};
use crate::utils::utc_now;
use crate::validation::ValidatedJson;

const ROLE_COLUMNS: &str = "id, name, description, created_at, updated_at";

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/roles", get(list_roles).post(create_role))
        .route("/roles/viewer", post(add_viewer_role))
        .route("/roles/:id", delete(delete_role))
        .route("/roles/:id/permissions", post(assign_permission_to_role))
        .route("/permissions", get(list_permissions))
        .route("/activity", get(list_activity))
}

#[utoipa::path(
    get,
    path = "/api/admin/roles",
    tag = "Admin",
    responses(
        (status = 200, description = "All roles", body = Vec<Role>),
        (status = 401, description = "No session"),
        (status = 403, description = "Admin only")
    )
)]
pub async fn list_roles(State(state): State<AppState>, _guard: Guarded<AdminOnly>) -> AppResult<Envelope<Data<Vec<Role>>>> {
    let rows = sqlx::query_as::<_, DbRole>(&format!("SELECT {ROLE_COLUMNS} FROM roles ORDER BY name"))
        .fetch_all(&state.pool)
        .await?;

    let roles = rows.into_iter().map(Role::try_from).collect::<Result<Vec<_>, _>>()?;
    Ok(Envelope::data(roles))
}

#[utoipa::path(
    post,
    path = "/api/admin/roles",
    tag = "Admin",
    request_body = RoleCreateRequest,
    responses(
        (status = 201, description = "Role created", body = Role),
        (status = 409, description = "Role name already exists")
    )
)]
pub async fn create_role(
    State(state): State<AppState>,
    guard: Guarded<AdminOnly>,
    headers: HeaderMap,
    ValidatedJson(req): ValidatedJson<RoleCreateRequest>,
) -> AppResult<Envelope<RoleBody>> {
    let id = Uuid::new_v4();
    let now = utc_now();

    // A duplicate name trips the unique index and surfaces as 409.
    sqlx::query("INSERT INTO roles (id, name, description, created_at, updated_at) VALUES (?, ?, ?, ?, ?)")
        .bind(id.to_string())
        .bind(req.name.trim())
        .bind(&req.description)
        .bind(now)
        .bind(now)
        .execute(&state.pool)
        .await?;

    let mut conn = state.pool.acquire().await?;
    let role = fetch_role(&mut conn, id).await?;

    log_activity_with_context(
        &state.event_bus,
        "created",
        Some(guard.user_id()),
        &role,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Envelope::created(RoleBody { role }))
}

/// Ensures a `viewer` role exists. Repeated calls return the existing role.
#[utoipa::path(
    post,
    path = "/api/admin/roles/viewer",
    tag = "Admin",
    responses(
        (status = 201, description = "Viewer role created", body = Role),
        (status = 200, description = "Viewer role already existed", body = Role)
    )
)]
pub async fn add_viewer_role(
    State(state): State<AppState>,
    guard: Guarded<AdminOnly>,
    headers: HeaderMap,
) -> AppResult<Envelope<RoleBody>> {
    let now = utc_now();
    let mut tx = begin_write(&state.pool).await?;

    let inserted = sqlx::query(
        "INSERT OR IGNORE INTO roles (id, name, description, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(VIEWER)
    .bind("Read-only access")
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    let role: Role = sqlx::query_as::<_, DbRole>(&format!("SELECT {ROLE_COLUMNS} FROM roles WHERE name = ?"))
        .bind(VIEWER)
        .fetch_one(&mut *tx)
        .await?
        .try_into()?;
    tx.commit().await?;

    if inserted == 0 {
        return Ok(Envelope::ok(RoleBody { role }).with_message(format!("Rol '{VIEWER}' ya existe")));
    }

    log_activity_with_context(
        &state.event_bus,
        "created",
        Some(guard.user_id()),
        &role,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Envelope::created(RoleBody { role }))
}

#[utoipa::path(
    delete,
    path = "/api/admin/roles/{id}",
    tag = "Admin",
    params(("id" = Uuid, Path, description = "Role id")),
    responses(
        (status = 200, description = "Role removed"),
        (status = 404, description = "Role not found")
    )
)]
pub async fn delete_role(
    State(state): State<AppState>,
    guard: Guarded<AdminOnly>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> AppResult<Envelope<MessageBody>> {
    let mut tx = begin_write(&state.pool).await?;
    let role = fetch_role(&mut tx, id).await?;

    // Holders through `user_roles` plus accounts naming the role only in the
    // legacy column.
    let holders: Vec<(String, Option<String>)> = sqlx::query_as(
        "SELECT p.id, p.role FROM profiles p \
         WHERE EXISTS (SELECT 1 FROM user_roles ur WHERE ur.user_id = p.id AND ur.role_id = ?) \
         OR instr(lower(coalesce(p.role, '')), lower(?)) > 0",
    )
    .bind(id.to_string())
    .bind(&role.name)
    .fetch_all(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM roles WHERE id = ?")
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;

    for (user_id, legacy) in &holders {
        refresh_role_column(&mut tx, user_id, legacy.as_deref(), &role.name).await?;
    }
    tx.commit().await?;
    tracing::info!(role = %role.name, holders = holders.len(), "role deleted");

    log_activity_with_context(
        &state.event_bus,
        "deleted",
        Some(guard.user_id()),
        &role,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Envelope::message("Rol eliminado"))
}

/// Rewrites a profile's display column after `removed` is gone: the names of
/// its remaining assignments, else its legacy names minus `removed`, else NULL.
async fn refresh_role_column(
    conn: &mut SqliteConnection,
    user_id: &str,
    legacy: Option<&str>,
    removed: &str,
) -> AppResult<()> {
    let assigned: Vec<String> = sqlx::query_scalar(
        "SELECT r.name FROM user_roles ur JOIN roles r ON r.id = ur.role_id WHERE ur.user_id = ? ORDER BY r.name",
    )
    .bind(user_id)
    .fetch_all(&mut *conn)
    .await?;

    let remaining = if assigned.is_empty() {
        let removed = removed.trim().to_lowercase();
        split_role_names(legacy)
            .into_iter()
            .filter(|name| *name != removed)
            .collect::<Vec<_>>()
    } else {
        assigned
    };
    let column = (!remaining.is_empty()).then(|| remaining.join(","));

    sqlx::query("UPDATE profiles SET role = ?, updated_at = ? WHERE id = ?")
        .bind(column)
        .bind(utc_now())
        .bind(user_id)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

#[utoipa::path(
    get,
    path = "/api/admin/permissions",
    tag = "Admin",
    responses((status = 200, description = "All permissions", body = Vec<Permission>))
)]
pub async fn list_permissions(
    State(state): State<AppState>,
    _guard: Guarded<AdminOnly>,
) -> AppResult<Envelope<Data<Vec<Permission>>>> {
    let rows = sqlx::query_as::<_, DbPermission>(
        "SELECT id, name, description, created_at, updated_at FROM permissions ORDER BY name",
    )
    .fetch_all(&state.pool)
    .await?;

    let permissions = rows
        .into_iter()
        .map(Permission::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Envelope::data(permissions))
}

/// Grants a permission to a role. Granting twice is a no-op.
#[utoipa::path(
    post,
    path = "/api/admin/roles/{id}/permissions",
    tag = "Admin",
    params(("id" = Uuid, Path, description = "Role id")),
    request_body = AssignPermissionToRoleRequest,
    responses(
        (status = 200, description = "Permission granted", body = RolePermission),
        (status = 404, description = "Role or permission not found")
    )
)]
pub async fn assign_permission_to_role(
    State(state): State<AppState>,
    guard: Guarded<AdminOnly>,
    headers: HeaderMap,
    Path(role_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<AssignPermissionToRoleRequest>,
) -> AppResult<Envelope<Data<RolePermission>>> {
    let mut tx = begin_write(&state.pool).await?;
    fetch_role(&mut tx, role_id).await?;

    let permission: Option<String> = sqlx::query_scalar("SELECT id FROM permissions WHERE id = ?")
        .bind(req.permission_id.to_string())
        .fetch_optional(&mut *tx)
        .await?;
    if permission.is_none() {
        return Err(AppError::not_found("permission not found"));
    }

    let now = utc_now();
    sqlx::query("INSERT OR IGNORE INTO role_permissions (role_id, permission_id, created_at) VALUES (?, ?, ?)")
        .bind(role_id.to_string())
        .bind(req.permission_id.to_string())
        .bind(now)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    let grant = RolePermission {
        role_id,
        permission_id: req.permission_id,
        created_at: now,
    };

    log_activity_with_context(
        &state.event_bus,
        "granted",
        Some(guard.user_id()),
        &grant,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Envelope::data(grant))
}

#[utoipa::path(
    get,
    path = "/api/admin/activity",
    tag = "Admin",
    params(ActivityQuery),
    responses((status = 200, description = "Latest activity, newest first", body = Vec<ActivityView>))
)]
pub async fn list_activity(
    State(state): State<AppState>,
    _guard: Guarded<AdminOnly>,
    Query(query): Query<ActivityQuery>,
) -> AppResult<Envelope<Data<Vec<ActivityView>>>> {
    let entries = sqlx::query_as::<_, ActivityEntry>(
        "SELECT id, event_name, description, actor_id, subject_id, occurred_at, severity, properties FROM activity_log ORDER BY occurred_at DESC LIMIT ?",
    )
    .bind(query.effective_limit())
    .fetch_all(&state.pool)
    .await?;

    Ok(Envelope::data(entries.into_iter().map(ActivityView::from).collect()))
}

async fn fetch_role(conn: &mut SqliteConnection, id: Uuid) -> AppResult<Role> {
    sqlx::query_as::<_, DbRole>(&format!("SELECT {ROLE_COLUMNS} FROM roles WHERE id = ?"))
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::not_found("role not found"))?
        .try_into()
}
