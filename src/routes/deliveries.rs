use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::get;
use axum::Router;
use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::policies::{Authenticated, CanEditDeliveries};
use crate::authz::Guarded;
use crate::db::begin_write;
use crate::envelope::{Data, Envelope};
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity_with_context, RequestContext};
use crate::models::delivery::{
    DbDelivery, Delivery, DeliveryCreateRequest, DeliveryUpdateRequest, DELIVERY_COLUMNS,
};
use crate::utils::{normalize_plate, utc_now};
use crate::validation::ValidatedJson;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_deliveries).post(create_delivery))
        .route("/:id", get(get_delivery).put(update_delivery))
}

#[utoipa::path(
    get,
    path = "/api/entregas",
    tag = "Deliveries",
    responses((status = 200, description = "Deliveries, soonest first", body = Vec<Delivery>))
)]
pub async fn list_deliveries(
    State(state): State<AppState>,
    _guard: Guarded<Authenticated>,
) -> AppResult<Envelope<Data<Vec<Delivery>>>> {
    let rows = sqlx::query_as::<_, DbDelivery>(&format!(
        "SELECT {DELIVERY_COLUMNS} FROM deliveries ORDER BY delivery_date IS NULL, delivery_date, created_at"
    ))
    .fetch_all(&state.pool)
    .await?;

    let deliveries = rows
        .into_iter()
        .map(Delivery::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Envelope::data(deliveries))
}

#[utoipa::path(
    get,
    path = "/api/entregas/{id}",
    tag = "Deliveries",
    params(("id" = Uuid, Path, description = "Delivery id")),
    responses(
        (status = 200, description = "Delivery", body = Delivery),
        (status = 404, description = "Delivery not found")
    )
)]
pub async fn get_delivery(
    State(state): State<AppState>,
    _guard: Guarded<Authenticated>,
    Path(id): Path<Uuid>,
) -> AppResult<Envelope<Data<Delivery>>> {
    let mut conn = state.pool.acquire().await?;
    Ok(Envelope::data(fetch_delivery(&mut conn, id).await?))
}

#[utoipa::path(
    post,
    path = "/api/entregas",
    tag = "Deliveries",
    request_body = DeliveryCreateRequest,
    responses(
        (status = 201, description = "Delivery scheduled", body = Delivery),
        (status = 403, description = "Missing deliveries.write"),
        (status = 404, description = "Referenced sale not found")
    )
)]
pub async fn create_delivery(
    State(state): State<AppState>,
    guard: Guarded<CanEditDeliveries>,
    headers: HeaderMap,
    ValidatedJson(req): ValidatedJson<DeliveryCreateRequest>,
) -> AppResult<Envelope<Data<Delivery>>> {
    let mut tx = begin_write(&state.pool).await?;

    // The sale, when given, is the source of the plate and advisor.
    let (license_plate, advisor_name) = match req.sale_id {
        Some(sale_id) => {
            let (plate, advisor): (String, Option<String>) =
                sqlx::query_as("SELECT license_plate, advisor_name FROM sales WHERE id = ?")
                    .bind(sale_id.to_string())
                    .fetch_optional(&mut *tx)
                    .await?
                    .ok_or_else(|| AppError::not_found("sale not found"))?;
            (plate, req.advisor_name.clone().or(advisor))
        }
        None => (
            normalize_plate(req.license_plate.as_deref().unwrap_or_default()),
            req.advisor_name.clone(),
        ),
    };

    let id = Uuid::new_v4();
    let now = utc_now();
    let incidents = serde_json::to_string(&req.incidents).map_err(|e| AppError::internal(e.to_string()))?;

    sqlx::query(
        "INSERT INTO deliveries (id, sale_id, license_plate, delivery_date, advisor_name, status, incidents, notes, created_by, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(req.sale_id.map(|s| s.to_string()))
    .bind(&license_plate)
    .bind(req.delivery_date)
    .bind(&advisor_name)
    .bind(req.status.as_deref().unwrap_or("pendiente"))
    .bind(incidents)
    .bind(&req.notes)
    .bind(guard.user_id().to_string())
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    let delivery = fetch_delivery(&mut tx, id).await?;
    tx.commit().await?;

    log_activity_with_context(
        &state.event_bus,
        "created",
        Some(guard.user_id()),
        &delivery,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Envelope::created_data(delivery))
}

#[utoipa::path(
    put,
    path = "/api/entregas/{id}",
    tag = "Deliveries",
    params(("id" = Uuid, Path, description = "Delivery id")),
    request_body = DeliveryUpdateRequest,
    responses(
        (status = 200, description = "Delivery updated", body = Delivery),
        (status = 404, description = "Delivery not found")
    )
)]
pub async fn update_delivery(
    State(state): State<AppState>,
    guard: Guarded<CanEditDeliveries>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<DeliveryUpdateRequest>,
) -> AppResult<Envelope<Data<Delivery>>> {
    let mut tx = begin_write(&state.pool).await?;
    let old = fetch_delivery(&mut tx, id).await?;

    let incidents = req.incidents.as_ref().unwrap_or(&old.incidents);
    let incidents = serde_json::to_string(incidents).map_err(|e| AppError::internal(e.to_string()))?;

    sqlx::query(
        "UPDATE deliveries SET delivery_date = ?, advisor_name = ?, status = ?, incidents = ?, notes = ?, updated_at = ? WHERE id = ?",
    )
    .bind(req.delivery_date.or(old.delivery_date))
    .bind(req.advisor_name.clone().or_else(|| old.advisor_name.clone()))
    .bind(req.status.as_deref().unwrap_or(&old.status))
    .bind(incidents)
    .bind(req.notes.clone().or_else(|| old.notes.clone()))
    .bind(utc_now())
    .bind(id.to_string())
    .execute(&mut *tx)
    .await?;

    let delivery = fetch_delivery(&mut tx, id).await?;
    tx.commit().await?;

    log_activity_with_context(
        &state.event_bus,
        "updated",
        Some(guard.user_id()),
        &delivery,
        Some(&old),
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Envelope::data(delivery))
}

async fn fetch_delivery(conn: &mut SqliteConnection, id: Uuid) -> AppResult<Delivery> {
    sqlx::query_as::<_, DbDelivery>(&format!("SELECT {DELIVERY_COLUMNS} FROM deliveries WHERE id = ?"))
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::not_found("delivery not found"))?
        .try_into()
}
