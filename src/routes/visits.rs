//! Showroom visit queue: which advisor attends the next walk-in.
//!
//! Advisors take turns by `current_turn_priority`, ties going to whoever has
//! attended fewer visits overall. A client with an appointment goes to their
//! advisor without spending a turn.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post, put};
use axum::Router;
use chrono::NaiveDate;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::policies::{AdminOnly, Authenticated};
use crate::authz::Guarded;
use crate::db::begin_write;
use crate::envelope::{Data, Envelope};
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity_with_context, RequestContext};
use crate::models::visit::{
    Advisor, AdvisorCreateRequest, AdvisorUpdateRequest, AssignmentQuery, AssignmentReason, DbAdvisor,
    DbVisitAssignment, NextAdvisor, NextAdvisorRequest, QueueInfo, VisitAssignment, VisitQueueConfig,
    ADVISOR_COLUMNS, ASSIGNMENT_COLUMNS,
};
use crate::utils::utc_now;
use crate::validation::ValidatedJson;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/advisors", get(list_advisors).post(create_advisor))
        .route("/advisors/:id", put(update_advisor))
        .route("/config", get(get_config).put(update_config))
        .route("/next-advisor", post(next_advisor))
        .route("/assignments", get(list_assignments))
}

/// The advisor chosen for a visit, by index into the candidate slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pick {
    pub index: usize,
    pub reason: AssignmentReason,
    /// Advisors able to take this visit type, before the daily limit.
    pub available: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoPick {
    NoneAvailable,
    LimitReached(i64),
}

impl NoPick {
    fn into_error(self, visit_type: &str) -> AppError {
        match self {
            NoPick::NoneAvailable => AppError::not_found(format!("no advisors available for {visit_type}")),
            NoPick::LimitReached(max) => {
                AppError::limit_reached(format!("every advisor has reached the daily limit of {max} visits"))
            }
        }
    }
}

/// Chooses the advisor for a visit. An appointment wins when that advisor can
/// take the visit type; otherwise the lowest turn priority, then the fewest
/// total visits, among advisors under the daily limit.
pub fn pick_advisor(
    advisors: &[Advisor],
    req: &NextAdvisorRequest,
    daily_limit: Option<i64>,
    today: NaiveDate,
) -> Result<Pick, NoPick> {
    let eligible: Vec<usize> = (0..advisors.len())
        .filter(|&i| advisors[i].can_take(&req.visit_type))
        .collect();

    let booked = req
        .appointment_with
        .as_deref()
        .map(|name| name.trim().to_lowercase())
        .filter(|name| req.had_appointment && !name.is_empty());
    if let Some(name) = booked {
        if let Some(&index) = eligible
            .iter()
            .find(|&&i| advisors[i].full_name.trim().to_lowercase() == name)
        {
            return Ok(Pick {
                index,
                reason: AssignmentReason::HadAppointment,
                available: eligible.len(),
            });
        }
    }

    if eligible.is_empty() {
        return Err(NoPick::NoneAvailable);
    }

    let mut queue = eligible.clone();
    queue.sort_by_key(|&i| (advisors[i].current_turn_priority, advisors[i].total_visits));

    let index = match daily_limit {
        Some(max) => queue
            .into_iter()
            .find(|&i| advisors[i].visits_on(today) < max)
            .ok_or(NoPick::LimitReached(max))?,
        None => queue[0],
    };

    Ok(Pick {
        index,
        reason: AssignmentReason::NextInQueue,
        available: eligible.len(),
    })
}

#[utoipa::path(
    get,
    path = "/api/visits/advisors",
    tag = "Visits",
    responses((status = 200, description = "Advisors by name", body = Vec<Advisor>))
)]
pub async fn list_advisors(
    State(state): State<AppState>,
    _guard: Guarded<Authenticated>,
) -> AppResult<Envelope<Data<Vec<Advisor>>>> {
    let mut conn = state.pool.acquire().await?;
    Ok(Envelope::data(fetch_advisors(&mut conn).await?))
}

#[utoipa::path(
    post,
    path = "/api/visits/advisors",
    tag = "Visits",
    request_body = AdvisorCreateRequest,
    responses(
        (status = 201, description = "Advisor added to the rotation", body = Advisor),
        (status = 409, description = "An advisor with that name exists")
    )
)]
pub async fn create_advisor(
    State(state): State<AppState>,
    guard: Guarded<AdminOnly>,
    headers: HeaderMap,
    ValidatedJson(req): ValidatedJson<AdvisorCreateRequest>,
) -> AppResult<Envelope<Data<Advisor>>> {
    let id = Uuid::new_v4();
    let now = utc_now();
    let specialization = serde_json::to_string(&req.specialization).map_err(|e| AppError::internal(e.to_string()))?;

    // New advisors join at the back of the current turn.
    let mut tx = begin_write(&state.pool).await?;
    let back_of_queue: Option<i64> =
        sqlx::query_scalar("SELECT MAX(current_turn_priority) FROM advisors WHERE is_active = 1")
            .fetch_one(&mut *tx)
            .await?;

    sqlx::query(
        "INSERT INTO advisors (id, profile_id, full_name, email, phone, office_location, desk_number, specialization, current_turn_priority, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(req.profile_id.map(|p| p.to_string()))
    .bind(req.full_name.trim())
    .bind(&req.email)
    .bind(&req.phone)
    .bind(&req.office_location)
    .bind(&req.desk_number)
    .bind(specialization)
    .bind(back_of_queue.unwrap_or(0))
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    let advisor = fetch_advisor(&mut tx, id).await?;
    tx.commit().await?;

    log_activity_with_context(
        &state.event_bus,
        "created",
        Some(guard.user_id()),
        &advisor,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Envelope::created_data(advisor))
}

#[utoipa::path(
    put,
    path = "/api/visits/advisors/{id}",
    tag = "Visits",
    params(("id" = Uuid, Path, description = "Advisor id")),
    request_body = AdvisorUpdateRequest,
    responses(
        (status = 200, description = "Advisor updated", body = Advisor),
        (status = 404, description = "Advisor not found")
    )
)]
pub async fn update_advisor(
    State(state): State<AppState>,
    guard: Guarded<AdminOnly>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<AdvisorUpdateRequest>,
) -> AppResult<Envelope<Data<Advisor>>> {
    let mut tx = begin_write(&state.pool).await?;
    let old = fetch_advisor(&mut tx, id).await?;

    let specialization = req.specialization.as_ref().unwrap_or(&old.specialization);
    let specialization = serde_json::to_string(specialization).map_err(|e| AppError::internal(e.to_string()))?;

    sqlx::query(
        "UPDATE advisors SET email = ?, phone = ?, office_location = ?, desk_number = ?, specialization = ?, is_active = ?, is_on_vacation = ?, updated_at = ? WHERE id = ?",
    )
    .bind(req.email.clone().or_else(|| old.email.clone()))
    .bind(req.phone.clone().or_else(|| old.phone.clone()))
    .bind(req.office_location.clone().or_else(|| old.office_location.clone()))
    .bind(req.desk_number.clone().or_else(|| old.desk_number.clone()))
    .bind(specialization)
    .bind(req.is_active.unwrap_or(old.is_active))
    .bind(req.is_on_vacation.unwrap_or(old.is_on_vacation))
    .bind(utc_now())
    .bind(id.to_string())
    .execute(&mut *tx)
    .await?;

    let advisor = fetch_advisor(&mut tx, id).await?;
    tx.commit().await?;

    log_activity_with_context(
        &state.event_bus,
        "updated",
        Some(guard.user_id()),
        &advisor,
        Some(&old),
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Envelope::data(advisor))
}

#[utoipa::path(
    get,
    path = "/api/visits/config",
    tag = "Visits",
    responses((status = 200, description = "Queue settings", body = VisitQueueConfig))
)]
pub async fn get_config(
    State(state): State<AppState>,
    _guard: Guarded<Authenticated>,
) -> AppResult<Envelope<Data<VisitQueueConfig>>> {
    let mut conn = state.pool.acquire().await?;
    Ok(Envelope::data(fetch_config(&mut conn).await?))
}

#[utoipa::path(
    put,
    path = "/api/visits/config",
    tag = "Visits",
    request_body = VisitQueueConfig,
    responses(
        (status = 200, description = "Queue settings saved", body = VisitQueueConfig),
        (status = 403, description = "Admin only")
    )
)]
pub async fn update_config(
    State(state): State<AppState>,
    _guard: Guarded<AdminOnly>,
    ValidatedJson(req): ValidatedJson<VisitQueueConfig>,
) -> AppResult<Envelope<Data<VisitQueueConfig>>> {
    sqlx::query(
        "UPDATE visit_queue_config SET enable_daily_limit = ?, max_visits_per_advisor_per_day = ?, updated_at = ? WHERE id = 1",
    )
    .bind(req.enable_daily_limit)
    .bind(req.max_visits_per_advisor_per_day)
    .bind(utc_now())
    .execute(&state.pool)
    .await?;

    tracing::info!(limit = ?req.daily_limit(), "visit queue config updated");
    Ok(Envelope::data(req))
}

/// Assigns the next walk-in and records it. Counters and the history row are
/// written in the same transaction that read the queue.
#[utoipa::path(
    post,
    path = "/api/visits/next-advisor",
    tag = "Visits",
    request_body = NextAdvisorRequest,
    responses(
        (status = 200, description = "Advisor assigned", body = NextAdvisor),
        (status = 400, description = "Unknown visit type"),
        (status = 404, description = "No advisor can take this visit type"),
        (status = 429, description = "Every advisor reached the daily limit")
    )
)]
pub async fn next_advisor(
    State(state): State<AppState>,
    guard: Guarded<Authenticated>,
    headers: HeaderMap,
    ValidatedJson(req): ValidatedJson<NextAdvisorRequest>,
) -> AppResult<Envelope<NextAdvisor>> {
    let now = utc_now();
    let today = now.date_naive();

    let mut tx = begin_write(&state.pool).await?;
    let advisors = fetch_advisors(&mut tx).await?;
    let config = fetch_config(&mut tx).await?;

    let pick = pick_advisor(&advisors, &req, config.daily_limit(), today)
        .map_err(|no_pick| no_pick.into_error(&req.visit_type))?;
    let chosen = &advisors[pick.index];

    // An appointment does not spend the advisor's turn.
    let turn_step = match pick.reason {
        AssignmentReason::NextInQueue => 1,
        AssignmentReason::HadAppointment => 0,
    };

    sqlx::query(
        "UPDATE advisors SET current_turn_priority = current_turn_priority + ?, total_visits = total_visits + 1, visits_today = ?, last_visit_date = ?, updated_at = ? WHERE id = ?",
    )
    .bind(turn_step)
    .bind(chosen.visits_on(today) + 1)
    .bind(today)
    .bind(now)
    .bind(chosen.id.to_string())
    .execute(&mut *tx)
    .await?;

    let assignment_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO visit_assignments (id, advisor_id, advisor_name, visit_type, client_name, client_phone, had_appointment, appointment_with, reason, assigned_by, assigned_by_name, status, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'assigned', ?)",
    )
    .bind(assignment_id.to_string())
    .bind(chosen.id.to_string())
    .bind(&chosen.full_name)
    .bind(&req.visit_type)
    .bind(&req.client_name)
    .bind(&req.client_phone)
    .bind(req.had_appointment)
    .bind(&req.appointment_with)
    .bind(pick.reason.as_str())
    .bind(guard.user_id().to_string())
    .bind(&guard.session.principal.email)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    let advisor = fetch_advisor(&mut tx, chosen.id).await?;
    let assignment = fetch_assignment(&mut tx, assignment_id).await?;
    tx.commit().await?;

    log_activity_with_context(
        &state.event_bus,
        "created",
        Some(guard.user_id()),
        &assignment,
        None,
        Some(RequestContext::from_headers(&headers)),
    );
    tracing::info!(
        advisor = %advisor.full_name,
        visit_type = %req.visit_type,
        reason = pick.reason.as_str(),
        "visit assigned"
    );

    let message = match pick.reason {
        AssignmentReason::HadAppointment => format!("Cliente tiene cita previa con {}", advisor.full_name),
        AssignmentReason::NextInQueue => format!("Visita asignada a {}", advisor.full_name),
    };

    Ok(Envelope::ok(NextAdvisor {
        advisor,
        visit_type: req.visit_type,
        reason: pick.reason,
        assignment_id,
        queue_info: QueueInfo {
            total_available: pick.available as i64,
            position_in_queue: 1,
        },
    })
    .with_message(message))
}

#[utoipa::path(
    get,
    path = "/api/visits/assignments",
    tag = "Visits",
    params(AssignmentQuery),
    responses((status = 200, description = "Assignment history, newest first", body = Vec<VisitAssignment>))
)]
pub async fn list_assignments(
    State(state): State<AppState>,
    _guard: Guarded<Authenticated>,
    Query(query): Query<AssignmentQuery>,
) -> AppResult<Envelope<Data<Vec<VisitAssignment>>>> {
    let mut builder: QueryBuilder<Sqlite> =
        QueryBuilder::new(format!("SELECT {ASSIGNMENT_COLUMNS} FROM visit_assignments WHERE 1 = 1"));
    if let Some(date) = query.date {
        builder.push(" AND substr(created_at, 1, 10) = ").push_bind(date.to_string());
    }
    if let Some(advisor_id) = query.advisor_id {
        builder.push(" AND advisor_id = ").push_bind(advisor_id.to_string());
    }
    builder.push(" ORDER BY created_at DESC");

    let rows = builder.build_query_as::<DbVisitAssignment>().fetch_all(&state.pool).await?;
    let assignments = rows
        .into_iter()
        .map(VisitAssignment::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Envelope::data(assignments))
}

async fn fetch_advisors(conn: &mut SqliteConnection) -> AppResult<Vec<Advisor>> {
    let rows = sqlx::query_as::<_, DbAdvisor>(&format!(
        "SELECT {ADVISOR_COLUMNS} FROM advisors ORDER BY full_name COLLATE NOCASE"
    ))
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter().map(Advisor::try_from).collect()
}

async fn fetch_advisor(conn: &mut SqliteConnection, id: Uuid) -> AppResult<Advisor> {
    sqlx::query_as::<_, DbAdvisor>(&format!("SELECT {ADVISOR_COLUMNS} FROM advisors WHERE id = ?"))
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::not_found("advisor not found"))?
        .try_into()
}

async fn fetch_assignment(conn: &mut SqliteConnection, id: Uuid) -> AppResult<VisitAssignment> {
    sqlx::query_as::<_, DbVisitAssignment>(&format!(
        "SELECT {ASSIGNMENT_COLUMNS} FROM visit_assignments WHERE id = ?"
    ))
    .bind(id.to_string())
    .fetch_one(&mut *conn)
    .await?
    .try_into()
}

async fn fetch_config(conn: &mut SqliteConnection) -> AppResult<VisitQueueConfig> {
    Ok(sqlx::query_as::<_, VisitQueueConfig>(
        "SELECT enable_daily_limit, max_visits_per_advisor_per_day FROM visit_queue_config WHERE id = 1",
    )
    .fetch_optional(&mut *conn)
    .await?
    .unwrap_or(VisitQueueConfig {
        enable_daily_limit: false,
        max_visits_per_advisor_per_day: None,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn advisor(name: &str, priority: i64, total: i64, types: &[&str]) -> Advisor {
        let now = Utc::now();
        Advisor {
            id: Uuid::new_v4(),
            profile_id: None,
            full_name: name.to_string(),
            email: None,
            phone: None,
            office_location: None,
            desk_number: None,
            specialization: types.iter().map(|t| t.to_string()).collect(),
            is_active: true,
            is_on_vacation: false,
            current_turn_priority: priority,
            total_visits: total,
            visits_today: 0,
            last_visit_date: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn walk_in(visit_type: &str) -> NextAdvisorRequest {
        NextAdvisorRequest {
            visit_type: visit_type.to_string(),
            client_name: None,
            client_phone: None,
            had_appointment: false,
            appointment_with: None,
        }
    }

    fn today() -> NaiveDate {
        Utc::now().date_naive()
    }

    #[test]
    fn lowest_turn_then_fewest_visits_goes_first() {
        let advisors = [
            advisor("Lucía", 3, 10, &["COCHE_VO"]),
            advisor("Marta", 2, 40, &["COCHE_VO"]),
            advisor("Pablo", 2, 12, &["COCHE_VO"]),
        ];
        let pick = pick_advisor(&advisors, &walk_in("COCHE_VO"), None, today()).unwrap();
        assert_eq!(advisors[pick.index].full_name, "Pablo");
        assert_eq!(pick.reason, AssignmentReason::NextInQueue);
        assert_eq!(pick.available, 3);
    }

    #[test]
    fn vacation_inactive_and_other_specialities_are_skipped() {
        let mut away = advisor("Ana", 0, 0, &["MOTO_VN"]);
        away.is_on_vacation = true;
        let mut gone = advisor("Luis", 0, 0, &["MOTO_VN"]);
        gone.is_active = false;
        let cars = advisor("Eva", 0, 0, &["COCHE_VN"]);
        let bikes = advisor("Raúl", 5, 9, &["MOTO_VN", "MOTO_VO"]);

        let advisors = [away, gone, cars, bikes];
        let pick = pick_advisor(&advisors, &walk_in("MOTO_VN"), None, today()).unwrap();
        assert_eq!(advisors[pick.index].full_name, "Raúl");
        assert_eq!(pick.available, 1);

        assert_eq!(
            pick_advisor(&advisors[..3], &walk_in("MOTO_VN"), None, today()),
            Err(NoPick::NoneAvailable)
        );
    }

    #[test]
    fn appointment_wins_when_the_advisor_can_take_it() {
        let advisors = [advisor("Lucía", 0, 0, &["COCHE_VN"]), advisor("Marta", 9, 90, &["COCHE_VN"])];
        let mut req = walk_in("COCHE_VN");
        req.had_appointment = true;
        req.appointment_with = Some("marta".into());

        let pick = pick_advisor(&advisors, &req, None, today()).unwrap();
        assert_eq!(advisors[pick.index].full_name, "Marta");
        assert_eq!(pick.reason, AssignmentReason::HadAppointment);

        req.visit_type = "MOTO_VO".into();
        assert_eq!(pick_advisor(&advisors, &req, None, today()), Err(NoPick::NoneAvailable));
    }

    #[test]
    fn daily_limit_skips_full_advisors_and_resets_each_day() {
        let mut busy = advisor("Lucía", 0, 0, &["COCHE_VO"]);
        busy.visits_today = 5;
        busy.last_visit_date = Some(today());
        let free = advisor("Marta", 4, 4, &["COCHE_VO"]);

        let advisors = [busy.clone(), free];
        let pick = pick_advisor(&advisors, &walk_in("COCHE_VO"), Some(5), today()).unwrap();
        assert_eq!(advisors[pick.index].full_name, "Marta");

        assert_eq!(
            pick_advisor(&advisors[..1], &walk_in("COCHE_VO"), Some(5), today()),
            Err(NoPick::LimitReached(5))
        );

        busy.last_visit_date = Some(today() - Duration::days(1));
        let pick = pick_advisor(&[busy], &walk_in("COCHE_VO"), Some(5), today()).unwrap();
        assert_eq!(pick.index, 0);
    }
}
