//! After-sale support tickets.
//!
//! Clients open tickets from the portal without an account; the plate and
//! DNI of a recorded sale stand in for a session. Admins answer each incident
//! and the ticket status follows its incidents.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::Router;
use chrono::NaiveDate;
use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::policies::AdminOnly;
use crate::authz::Guarded;
use crate::db::begin_write;
use crate::db::row_parsers::parse_string_list;
use crate::envelope::Envelope;
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity_with_context, RequestContext};
use crate::models::support::{
    CreateTicketRequest, DbSupportIncident, DbSupportTicket, IncidentView, RespondRequest, SupportIncident,
    SupportTicket, TicketBody, TicketInbox, TicketStats, TicketView, INCIDENT_COLUMNS, INCIDENT_IN_PROGRESS,
    INCIDENT_PENDING, INCIDENT_RESOLVED, TICKET_CLOSED, TICKET_COLUMNS, TICKET_IN_PROGRESS, TICKET_OPEN,
};
use crate::utils::{normalize_plate, utc_now};
use crate::validation::ValidatedJson;

pub fn routes() -> Router<AppState> {
    Router::new().route("/tickets", post(create_ticket))
}

/// Mounted under `/admin`.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/support/tickets", get(list_tickets))
        .route("/support/tickets/:id/respond", post(respond))
}

/// `TKT-<yyyymmdd>-<nnnn>`, numbered after the day's last ticket.
pub fn next_ticket_number(day: NaiveDate, last_of_day: Option<&str>) -> String {
    let counter = last_of_day
        .and_then(|number| number.rsplit('-').next())
        .and_then(|n| n.parse::<u32>().ok())
        .map_or(1, |n| n + 1);
    format!("TKT-{}-{counter:04}", day.format("%Y%m%d"))
}

fn plural(n: i64, one: &str, many: &str) -> String {
    format!("{n} {}", if n == 1 { one } else { many })
}

/// Age of a sale in days, months of 30 days and years of 365, e.g.
/// "1 año 2 meses 3 días".
pub fn time_since_sale(sale_date: NaiveDate, today: NaiveDate) -> String {
    let days = (today - sale_date).num_days().abs();

    if days < 30 {
        return plural(days, "día", "días");
    }

    let (years, rest) = (days / 365, days % 365);
    let (months, days) = if years > 0 { (rest / 30, rest % 30) } else { (days / 30, days % 30) };

    let mut parts = Vec::new();
    if years > 0 {
        parts.push(plural(years, "año", "años"));
    }
    if months > 0 {
        parts.push(plural(months, "mes", "meses"));
    }
    if days > 0 {
        parts.push(plural(days, "día", "días"));
    }
    parts.join(" ")
}

/// Closed once every incident is resolved, otherwise in progress.
pub fn ticket_status_after_response(incident_statuses: &[String]) -> &'static str {
    if !incident_statuses.is_empty() && incident_statuses.iter().all(|s| s == INCIDENT_RESOLVED) {
        TICKET_CLOSED
    } else {
        TICKET_IN_PROGRESS
    }
}

#[utoipa::path(
    post,
    path = "/api/support/tickets",
    tag = "Support",
    request_body = CreateTicketRequest,
    responses(
        (status = 201, description = "Ticket opened", body = SupportTicket),
        (status = 400, description = "Missing plate, DNI or incidents"),
        (status = 404, description = "No sale matches the plate and DNI")
    )
)]
pub async fn create_ticket(
    State(state): State<AppState>,
    headers: HeaderMap,
    ValidatedJson(req): ValidatedJson<CreateTicketRequest>,
) -> AppResult<Envelope<TicketBody>> {
    let plate = normalize_plate(&req.license_plate);
    let dni = req.client_dni.trim().to_uppercase();
    let now = utc_now();
    let today = now.date_naive();

    let mut tx = begin_write(&state.pool).await?;

    let (sale_id, sale_date, sale_email): (String, NaiveDate, Option<String>) = sqlx::query_as(
        "SELECT id, sale_date, client_email FROM sales WHERE license_plate = ? AND upper(trim(client_dni)) = ? ORDER BY sale_date DESC LIMIT 1",
    )
    .bind(&plate)
    .bind(&dni)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::not_found("vehicle not found"))?;

    let prefix = format!("TKT-{}-%", today.format("%Y%m%d"));
    let last: Option<String> = sqlx::query_scalar(
        "SELECT ticket_number FROM support_tickets WHERE ticket_number LIKE ? ORDER BY ticket_number DESC LIMIT 1",
    )
    .bind(&prefix)
    .fetch_optional(&mut *tx)
    .await?;

    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO support_tickets (id, ticket_number, sale_id, license_plate, client_dni, client_email, client_phone, sale_date, time_since_sale, status, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(next_ticket_number(today, last.as_deref()))
    .bind(&sale_id)
    .bind(&plate)
    .bind(&dni)
    .bind(req.client_email.clone().or(sale_email))
    .bind(&req.client_phone)
    .bind(sale_date)
    .bind(time_since_sale(sale_date, today))
    .bind(TICKET_OPEN)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    for incident in &req.incidents {
        sqlx::query(
            "INSERT INTO support_incidents (id, ticket_id, kind, description, status, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(id.to_string())
        .bind(incident.kind.trim())
        .bind(incident.description.trim())
        .bind(INCIDENT_PENDING)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    let ticket = fetch_ticket(&mut tx, id).await?;
    tx.commit().await?;

    log_activity_with_context(
        &state.event_bus,
        "created",
        None,
        &ticket,
        None,
        Some(RequestContext::from_headers(&headers)),
    );
    tracing::info!(ticket = %ticket.ticket_number, plate = %ticket.license_plate, "support ticket opened");
    if state.config.smtp.is_none() {
        tracing::debug!(ticket = %ticket.ticket_number, "no SMTP configured, ticket confirmation not sent");
    }

    Ok(Envelope::created(TicketBody { ticket }))
}

#[utoipa::path(
    get,
    path = "/api/admin/support/tickets",
    tag = "Support",
    responses(
        (status = 200, description = "Support tickets and delivery incidents, newest first", body = TicketInbox),
        (status = 403, description = "Admin only")
    )
)]
pub async fn list_tickets(
    State(state): State<AppState>,
    _guard: Guarded<AdminOnly>,
) -> AppResult<Envelope<TicketInbox>> {
    let mut conn = state.pool.acquire().await?;

    let rows = sqlx::query_as::<_, DbSupportTicket>(&format!(
        "SELECT {TICKET_COLUMNS} FROM support_tickets ORDER BY created_at DESC"
    ))
    .fetch_all(&mut *conn)
    .await?;

    let mut tickets = Vec::with_capacity(rows.len());
    for row in rows {
        let incidents = fetch_incidents(&mut conn, &row.id).await?;
        tickets.push(TicketView::from(row.into_ticket(incidents)?));
    }
    let soporte = tickets.len() as i64;

    let deliveries: Vec<(String, String, String, chrono::DateTime<chrono::Utc>)> = sqlx::query_as(
        "SELECT id, license_plate, incidents, created_at FROM deliveries WHERE incidents NOT IN ('', '[]')",
    )
    .fetch_all(&mut *conn)
    .await?;

    let mut entregas = 0;
    for (id, plate, incidents, created_at) in deliveries {
        let kinds = parse_string_list(&incidents);
        if kinds.is_empty() {
            continue;
        }
        entregas += 1;
        tickets.push(TicketView {
            id: format!("entregas_{id}"),
            source: "entregas".to_string(),
            ticket_number: format!("ENT-{plate}"),
            license_plate: plate,
            status: TICKET_OPEN.to_string(),
            client_email: None,
            client_phone: None,
            time_since_sale: None,
            incidents: kinds
                .into_iter()
                .enumerate()
                .map(|(index, kind)| IncidentView {
                    id: format!("{id}_{index}"),
                    kind,
                    description: String::new(),
                    status: TICKET_OPEN.to_string(),
                    admin_response: None,
                    responded_at: None,
                })
                .collect(),
            created_at,
        });
    }

    tickets.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    let stats = TicketStats {
        soporte,
        entregas,
        total: soporte + entregas,
    };

    Ok(Envelope::ok(TicketInbox { tickets, stats }))
}

/// Records an admin answer on one incident and moves the ticket along.
#[utoipa::path(
    post,
    path = "/api/admin/support/tickets/{id}/respond",
    tag = "Support",
    params(("id" = Uuid, Path, description = "Ticket id")),
    request_body = RespondRequest,
    responses(
        (status = 200, description = "Response recorded", body = SupportTicket),
        (status = 404, description = "Ticket or incident not found")
    )
)]
pub async fn respond(
    State(state): State<AppState>,
    guard: Guarded<AdminOnly>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<RespondRequest>,
) -> AppResult<Envelope<TicketBody>> {
    let now = utc_now();
    let mut tx = begin_write(&state.pool).await?;
    let old = fetch_ticket(&mut tx, id).await?;

    let updated = sqlx::query(
        "UPDATE support_incidents SET admin_response = ?, responded_at = ?, responded_by = ?, status = ? WHERE id = ? AND ticket_id = ?",
    )
    .bind(req.response.trim())
    .bind(now)
    .bind(guard.user_id().to_string())
    .bind(req.status.as_deref().unwrap_or(INCIDENT_IN_PROGRESS))
    .bind(req.incident_id.to_string())
    .bind(id.to_string())
    .execute(&mut *tx)
    .await?;

    if updated.rows_affected() == 0 {
        return Err(AppError::not_found("incident not found"));
    }

    let statuses: Vec<String> = sqlx::query_scalar("SELECT status FROM support_incidents WHERE ticket_id = ?")
        .bind(id.to_string())
        .fetch_all(&mut *tx)
        .await?;

    sqlx::query("UPDATE support_tickets SET status = ?, updated_at = ? WHERE id = ?")
        .bind(ticket_status_after_response(&statuses))
        .bind(now)
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;

    let ticket = fetch_ticket(&mut tx, id).await?;
    tx.commit().await?;

    log_activity_with_context(
        &state.event_bus,
        "updated",
        Some(guard.user_id()),
        &ticket,
        Some(&old),
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Envelope::ok(TicketBody { ticket }).with_message("Respuesta enviada correctamente"))
}

async fn fetch_incidents(conn: &mut SqliteConnection, ticket_id: &str) -> AppResult<Vec<SupportIncident>> {
    let rows = sqlx::query_as::<_, DbSupportIncident>(&format!(
        "SELECT {INCIDENT_COLUMNS} FROM support_incidents WHERE ticket_id = ? ORDER BY created_at, rowid"
    ))
    .bind(ticket_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter().map(SupportIncident::try_from).collect()
}

async fn fetch_ticket(conn: &mut SqliteConnection, id: Uuid) -> AppResult<SupportTicket> {
    let row = sqlx::query_as::<_, DbSupportTicket>(&format!(
        "SELECT {TICKET_COLUMNS} FROM support_tickets WHERE id = ?"
    ))
    .bind(id.to_string())
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::not_found("ticket not found"))?;

    let incidents = fetch_incidents(conn, &row.id).await?;
    row.into_ticket(incidents)
}
