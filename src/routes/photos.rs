//! Photography rota: each active photographer gets a percentage of incoming
//! photo work. Changing one share can rebalance the others.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::{get, put};
use axum::Router;
use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::policies::AdminOnly;
use crate::authz::Guarded;
use crate::db::begin_write;
use crate::db::row_parsers::parse_uuid;
use crate::envelope::Envelope;
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity_with_context, RequestContext};
use crate::models::photo::{
    display_name, DbPhotoAssignment, PhotoAssignment, PhotoAssignmentList, PhotoAssignmentUpdateRequest,
    PhotoAssignmentUpdated,
};
use crate::utils::utc_now;
use crate::validation::ValidatedJson;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/photo-assignments", get(list_assignments))
        .route("/photo-assignments/:user_id", put(update_assignment))
}

const ASSIGNMENT_SELECT: &str = "SELECT pa.id, pa.user_id, pa.percentage, pa.is_active, p.full_name, p.email, pa.created_at, pa.updated_at FROM photo_assignments pa LEFT JOIN profiles p ON p.id = pa.user_id";

/// One row of the rota as the rebalancing sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Share {
    pub id: Uuid,
    pub user_id: Uuid,
    pub percentage: i64,
    pub is_active: bool,
}

/// Outcome of applying an update to the rota.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rebalance {
    /// New percentages for other assignments, by assignment id.
    pub others: Vec<(Uuid, i64)>,
    pub percentage: i64,
    pub is_active: bool,
}

fn round_half_up(value: f64) -> i64 {
    (value + 0.5).floor() as i64
}

/// Deactivating a photographer hands their share to the other active ones in
/// proportion to what they already hold. Changing a share with
/// `adjust_others` moves the difference out of (or into) the other active
/// shares the same way, never below zero.
pub fn rebalance(shares: &[Share], user_id: Uuid, req: &PhotoAssignmentUpdateRequest) -> Rebalance {
    let current = shares.iter().find(|s| s.user_id == user_id);
    let current_percentage = current.map(|s| s.percentage).unwrap_or(0);
    let current_active = current.map(|s| s.is_active).unwrap_or(false);

    let others: Vec<&Share> = shares
        .iter()
        .filter(|s| s.user_id != user_id && s.is_active)
        .collect();
    let others_total: i64 = others.iter().map(|s| s.percentage).sum();

    let mut adjusted = Vec::new();

    if req.is_active == Some(false) && current_active && current_percentage > 0 && !others.is_empty() {
        for share in &others {
            // With no shares to weigh by, split evenly.
            let proportion = if others_total > 0 {
                share.percentage as f64 / others_total as f64
            } else {
                1.0 / others.len() as f64
            };
            let next = round_half_up(share.percentage as f64 + current_percentage as f64 * proportion);
            adjusted.push((share.id, next));
        }
    } else if let (Some(percentage), true, false) = (req.percentage, req.adjust_others, req.is_active == Some(false)) {
        let diff = percentage - current_percentage;
        if diff != 0 && others_total > 0 {
            for share in &others {
                let proportion = share.percentage as f64 / others_total as f64;
                let next = round_half_up(share.percentage as f64 - diff as f64 * proportion).max(0);
                adjusted.push((share.id, next));
            }
        }
    }

    let is_active = req.is_active.unwrap_or(current.map(|s| s.is_active).unwrap_or(true));
    let percentage = if req.is_active == Some(false) {
        0
    } else {
        req.percentage.unwrap_or(current_percentage)
    };

    Rebalance {
        others: adjusted,
        percentage,
        is_active,
    }
}

#[utoipa::path(
    get,
    path = "/api/admin/photo-assignments",
    tag = "Photography",
    responses(
        (status = 200, description = "Rota with the active total", body = PhotoAssignmentList),
        (status = 403, description = "Admin only")
    )
)]
pub async fn list_assignments(
    State(state): State<AppState>,
    _guard: Guarded<AdminOnly>,
) -> AppResult<Envelope<PhotoAssignmentList>> {
    let rows = sqlx::query_as::<_, DbPhotoAssignment>(&format!(
        "{ASSIGNMENT_SELECT} ORDER BY pa.is_active DESC, pa.percentage DESC"
    ))
    .fetch_all(&state.pool)
    .await?;

    let assignments = rows
        .into_iter()
        .map(PhotoAssignment::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    let total_percentage = assignments
        .iter()
        .filter(|a| a.is_active)
        .map(|a| a.percentage)
        .sum();

    Ok(Envelope::ok(PhotoAssignmentList {
        assignments,
        total_percentage,
    }))
}

#[utoipa::path(
    put,
    path = "/api/admin/photo-assignments/{user_id}",
    tag = "Photography",
    params(("user_id" = Uuid, Path, description = "Photographer id")),
    request_body = PhotoAssignmentUpdateRequest,
    responses(
        (status = 200, description = "Assignment saved", body = PhotoAssignmentUpdated),
        (status = 400, description = "Neither percentage nor isActive given"),
        (status = 404, description = "User not found")
    )
)]
pub async fn update_assignment(
    State(state): State<AppState>,
    guard: Guarded<AdminOnly>,
    headers: HeaderMap,
    Path(user_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<PhotoAssignmentUpdateRequest>,
) -> AppResult<Envelope<PhotoAssignmentUpdated>> {
    let mut tx = begin_write(&state.pool).await?;

    let profile: Option<(Option<String>, Option<String>)> =
        sqlx::query_as("SELECT full_name, email FROM profiles WHERE id = ?")
            .bind(user_id.to_string())
            .fetch_optional(&mut *tx)
            .await?;
    let (full_name, email) = profile.ok_or_else(|| AppError::not_found("user not found"))?;

    let shares = load_shares(&mut tx).await?;
    let plan = rebalance(&shares, user_id, &req);
    let now = utc_now();

    for (id, percentage) in &plan.others {
        sqlx::query("UPDATE photo_assignments SET percentage = ?, updated_at = ? WHERE id = ?")
            .bind(percentage)
            .bind(now)
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
    }

    sqlx::query(
        "INSERT INTO photo_assignments (id, user_id, percentage, is_active, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?) \
         ON CONFLICT(user_id) DO UPDATE SET percentage = excluded.percentage, is_active = excluded.is_active, updated_at = excluded.updated_at",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(user_id.to_string())
    .bind(plan.percentage)
    .bind(plan.is_active)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    let saved = sqlx::query_as::<_, DbPhotoAssignment>(&format!("{ASSIGNMENT_SELECT} WHERE pa.user_id = ?"))
        .bind(user_id.to_string())
        .fetch_one(&mut *tx)
        .await?;
    let saved = PhotoAssignment::try_from(saved)?;

    let total_percentage: i64 =
        sqlx::query_scalar("SELECT COALESCE(SUM(percentage), 0) FROM photo_assignments WHERE is_active = 1")
            .fetch_one(&mut *tx)
            .await?;

    tx.commit().await?;

    log_activity_with_context(
        &state.event_bus,
        "updated",
        Some(guard.user_id()),
        &saved,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Envelope::ok(PhotoAssignmentUpdated {
        user_id,
        percentage: saved.percentage,
        is_active: saved.is_active,
        display_name: display_name(full_name, email),
        id: saved.id,
        total_percentage,
    }))
}

async fn load_shares(conn: &mut SqliteConnection) -> AppResult<Vec<Share>> {
    let rows: Vec<(String, String, i64, bool)> =
        sqlx::query_as("SELECT id, user_id, percentage, is_active FROM photo_assignments")
            .fetch_all(&mut *conn)
            .await?;

    rows.into_iter()
        .map(|(id, user_id, percentage, is_active)| {
            Ok(Share {
                id: parse_uuid(&id, "photo_assignments.id")?,
                user_id: parse_uuid(&user_id, "photo_assignments.user_id")?,
                percentage,
                is_active,
            })
        })
        .collect()
}
