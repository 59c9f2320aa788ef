//! Stock: vehicles available, reserved or sold.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, put};
use axum::Router;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::policies::{Authenticated, CanEditStock, CanUpdatePhotos};
use crate::authz::Guarded;
use crate::db::begin_write;
use crate::envelope::{Data, Envelope, MessageBody};
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity, log_activity_with_context, RequestContext};
use crate::models::vehicle::{
    DbVehicle, PhotosUpdateRequest, Vehicle, VehicleCreateRequest, VehicleListQuery, VehicleUpdateRequest,
    VEHICLE_COLUMNS,
};
use crate::utils::{normalize_plate, utc_now};
use crate::validation::ValidatedJson;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_vehicles).post(create_vehicle))
        .route("/:id", get(get_vehicle).put(update_vehicle).delete(delete_vehicle))
        .route("/:id/photos", put(update_photos))
}

#[utoipa::path(
    get,
    path = "/api/vehicles",
    tag = "Stock",
    params(VehicleListQuery),
    responses(
        (status = 200, description = "Vehicles in stock", body = Vec<Vehicle>),
        (status = 401, description = "No session")
    )
)]
pub async fn list_vehicles(
    State(state): State<AppState>,
    _guard: Guarded<Authenticated>,
    Query(query): Query<VehicleListQuery>,
) -> AppResult<Envelope<Data<Vec<Vehicle>>>> {
    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!("SELECT {VEHICLE_COLUMNS} FROM vehicles WHERE 1 = 1"));

    if let Some(q) = query.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        let pattern = format!("%{q}%");
        builder
            .push(" AND (license_plate LIKE ")
            .push_bind(pattern.clone())
            .push(" OR brand LIKE ")
            .push_bind(pattern.clone())
            .push(" OR model LIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(status) = query.status.as_deref().filter(|s| !s.is_empty()) {
        builder.push(" AND status = ").push_bind(status.to_string());
    }
    if let Some(pending) = query.pending_photos {
        builder.push(" AND photos_completed = ").push_bind(!pending);
    }
    builder.push(" ORDER BY created_at DESC");

    let rows = builder.build_query_as::<DbVehicle>().fetch_all(&state.pool).await?;
    let vehicles = rows
        .into_iter()
        .map(Vehicle::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Envelope::data(vehicles))
}

#[utoipa::path(
    get,
    path = "/api/vehicles/{id}",
    tag = "Stock",
    params(("id" = Uuid, Path, description = "Vehicle id")),
    responses(
        (status = 200, description = "Vehicle", body = Vehicle),
        (status = 404, description = "Vehicle not found")
    )
)]
pub async fn get_vehicle(
    State(state): State<AppState>,
    _guard: Guarded<Authenticated>,
    Path(id): Path<Uuid>,
) -> AppResult<Envelope<Data<Vehicle>>> {
    let mut conn = state.pool.acquire().await?;
    let vehicle = fetch_vehicle(&mut conn, id).await?;
    Ok(Envelope::data(vehicle))
}

#[utoipa::path(
    post,
    path = "/api/vehicles",
    tag = "Stock",
    request_body = VehicleCreateRequest,
    responses(
        (status = 201, description = "Vehicle created", body = Vehicle),
        (status = 400, description = "Invalid fields"),
        (status = 403, description = "Missing vehicles.write"),
        (status = 409, description = "Plate already in stock")
    )
)]
pub async fn create_vehicle(
    State(state): State<AppState>,
    guard: Guarded<CanEditStock>,
    headers: HeaderMap,
    ValidatedJson(req): ValidatedJson<VehicleCreateRequest>,
) -> AppResult<Envelope<Data<Vehicle>>> {
    let id = Uuid::new_v4();
    let now = utc_now();

    sqlx::query(
        "INSERT INTO vehicles (id, license_plate, brand, model, vehicle_type, status, price, entry_date, photos_completed, created_by, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(normalize_plate(&req.license_plate))
    .bind(&req.brand)
    .bind(req.model.trim())
    .bind(&req.vehicle_type)
    .bind(req.status.as_deref().unwrap_or("disponible"))
    .bind(req.price)
    .bind(req.entry_date)
    .bind(guard.user_id().to_string())
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let mut conn = state.pool.acquire().await?;
    let vehicle = fetch_vehicle(&mut conn, id).await?;

    log_activity_with_context(
        &state.event_bus,
        "created",
        Some(guard.user_id()),
        &vehicle,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Envelope::created_data(vehicle))
}

#[utoipa::path(
    put,
    path = "/api/vehicles/{id}",
    tag = "Stock",
    params(("id" = Uuid, Path, description = "Vehicle id")),
    request_body = VehicleUpdateRequest,
    responses(
        (status = 200, description = "Vehicle updated", body = Vehicle),
        (status = 404, description = "Vehicle not found")
    )
)]
pub async fn update_vehicle(
    State(state): State<AppState>,
    guard: Guarded<CanEditStock>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<VehicleUpdateRequest>,
) -> AppResult<Envelope<Data<Vehicle>>> {
    let mut tx = begin_write(&state.pool).await?;
    let old = fetch_vehicle(&mut tx, id).await?;

    sqlx::query(
        "UPDATE vehicles SET license_plate = ?, brand = ?, model = ?, vehicle_type = ?, status = ?, price = ?, entry_date = ?, updated_at = ? WHERE id = ?",
    )
    .bind(req.license_plate.as_deref().map(normalize_plate).unwrap_or_else(|| old.license_plate.clone()))
    .bind(req.brand.clone().or_else(|| old.brand.clone()))
    .bind(req.model.as_deref().map(str::trim).unwrap_or(&old.model))
    .bind(req.vehicle_type.clone().or_else(|| old.vehicle_type.clone()))
    .bind(req.status.as_deref().unwrap_or(&old.status))
    .bind(req.price.or(old.price))
    .bind(req.entry_date.or(old.entry_date))
    .bind(utc_now())
    .bind(id.to_string())
    .execute(&mut *tx)
    .await?;

    let vehicle = fetch_vehicle(&mut tx, id).await?;
    tx.commit().await?;

    log_activity_with_context(
        &state.event_bus,
        "updated",
        Some(guard.user_id()),
        &vehicle,
        Some(&old),
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Envelope::data(vehicle))
}

#[utoipa::path(
    delete,
    path = "/api/vehicles/{id}",
    tag = "Stock",
    params(("id" = Uuid, Path, description = "Vehicle id")),
    responses(
        (status = 200, description = "Vehicle removed"),
        (status = 404, description = "Vehicle not found")
    )
)]
pub async fn delete_vehicle(
    State(state): State<AppState>,
    guard: Guarded<CanEditStock>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> AppResult<Envelope<MessageBody>> {
    let mut conn = state.pool.acquire().await?;
    let vehicle = fetch_vehicle(&mut conn, id).await?;

    sqlx::query("DELETE FROM vehicles WHERE id = ?")
        .bind(id.to_string())
        .execute(&mut *conn)
        .await?;

    log_activity_with_context(
        &state.event_bus,
        "deleted",
        Some(guard.user_id()),
        &vehicle,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Envelope::message("Vehículo eliminado"))
}

/// Photographers mark a vehicle's photo session as done (or reopen it).
#[utoipa::path(
    put,
    path = "/api/vehicles/{id}/photos",
    tag = "Stock",
    params(("id" = Uuid, Path, description = "Vehicle id")),
    request_body = PhotosUpdateRequest,
    responses(
        (status = 200, description = "Photo status updated", body = Vehicle),
        (status = 403, description = "Missing photos.update")
    )
)]
pub async fn update_photos(
    State(state): State<AppState>,
    guard: Guarded<CanUpdatePhotos>,
    Path(id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<PhotosUpdateRequest>,
) -> AppResult<Envelope<Data<Vehicle>>> {
    let result = sqlx::query("UPDATE vehicles SET photos_completed = ?, updated_at = ? WHERE id = ?")
        .bind(req.completed)
        .bind(utc_now())
        .bind(id.to_string())
        .execute(&state.pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found("vehicle not found"));
    }

    let mut conn = state.pool.acquire().await?;
    let vehicle = fetch_vehicle(&mut conn, id).await?;
    log_activity(&state.event_bus, "updated", Some(guard.user_id()), &vehicle);

    Ok(Envelope::data(vehicle))
}

async fn fetch_vehicle(conn: &mut SqliteConnection, id: Uuid) -> AppResult<Vehicle> {
    sqlx::query_as::<_, DbVehicle>(&format!("SELECT {VEHICLE_COLUMNS} FROM vehicles WHERE id = ?"))
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::not_found("vehicle not found"))?
        .try_into()
}
