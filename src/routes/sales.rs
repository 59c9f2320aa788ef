use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::get;
use axum::Router;
use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::policies::{CanEditSales, SalesTeam};
use crate::authz::Guarded;
use crate::db::begin_write;
use crate::envelope::{Data, Envelope};
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity_with_context, RequestContext};
use crate::models::sale::{DbSale, Sale, SaleCreateRequest, SaleStats, SaleUpdateRequest, SALE_COLUMNS};
use crate::utils::{normalize_plate, utc_now};
use crate::validation::ValidatedJson;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_sales).post(create_sale))
        .route("/stats", get(sales_stats))
        .route("/:id", get(get_sale).put(update_sale))
}

#[utoipa::path(
    get,
    path = "/api/sales",
    tag = "Sales",
    responses(
        (status = 200, description = "Sales, newest first", body = Vec<Sale>),
        (status = 403, description = "Not in the sales team")
    )
)]
pub async fn list_sales(
    State(state): State<AppState>,
    _guard: Guarded<SalesTeam>,
) -> AppResult<Envelope<Data<Vec<Sale>>>> {
    let sales = fetch_all_sales(&state.pool).await?;
    Ok(Envelope::data(sales))
}

#[utoipa::path(
    get,
    path = "/api/sales/stats",
    tag = "Sales",
    responses((status = 200, description = "Sales dashboard figures", body = SaleStats))
)]
pub async fn sales_stats(State(state): State<AppState>, _guard: Guarded<SalesTeam>) -> AppResult<Envelope<SaleStats>> {
    let sales = fetch_all_sales(&state.pool).await?;
    Ok(Envelope::ok(SaleStats::compute(&sales, utc_now().date_naive())))
}

#[utoipa::path(
    get,
    path = "/api/sales/{id}",
    tag = "Sales",
    params(("id" = Uuid, Path, description = "Sale id")),
    responses(
        (status = 200, description = "Sale", body = Sale),
        (status = 404, description = "Sale not found")
    )
)]
pub async fn get_sale(
    State(state): State<AppState>,
    _guard: Guarded<SalesTeam>,
    Path(id): Path<Uuid>,
) -> AppResult<Envelope<Data<Sale>>> {
    let mut conn = state.pool.acquire().await?;
    Ok(Envelope::data(fetch_sale(&mut conn, id).await?))
}

#[utoipa::path(
    post,
    path = "/api/sales",
    tag = "Sales",
    request_body = SaleCreateRequest,
    responses(
        (status = 201, description = "Sale registered", body = Sale),
        (status = 400, description = "Invalid fields"),
        (status = 403, description = "Missing sales.write")
    )
)]
pub async fn create_sale(
    State(state): State<AppState>,
    guard: Guarded<CanEditSales>,
    headers: HeaderMap,
    ValidatedJson(req): ValidatedJson<SaleCreateRequest>,
) -> AppResult<Envelope<Data<Sale>>> {
    let id = Uuid::new_v4();
    let now = utc_now();
    let mut tx = begin_write(&state.pool).await?;

    // A sale of a stocked vehicle takes it out of stock.
    if let Some(vehicle_id) = req.vehicle_id {
        let marked = sqlx::query("UPDATE vehicles SET status = 'vendido', updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(vehicle_id.to_string())
            .execute(&mut *tx)
            .await?;
        if marked.rows_affected() == 0 {
            return Err(AppError::not_found("vehicle not found"));
        }
    }

    sqlx::query(
        "INSERT INTO sales (id, vehicle_id, license_plate, model, vehicle_type, advisor_id, advisor_name, client_name, client_dni, client_email, price, discount, sale_date, cyp_status, photo_360_status, created_by, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(req.vehicle_id.map(|v| v.to_string()))
    .bind(normalize_plate(&req.license_plate))
    .bind(req.model.trim())
    .bind(&req.vehicle_type)
    .bind(req.advisor_id.map(|a| a.to_string()))
    .bind(&req.advisor_name)
    .bind(req.client_name.trim())
    .bind(&req.client_dni)
    .bind(&req.client_email)
    .bind(req.price)
    .bind(req.discount)
    .bind(req.sale_date)
    .bind(&req.cyp_status)
    .bind(&req.photo_360_status)
    .bind(guard.user_id().to_string())
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    let sale = fetch_sale(&mut tx, id).await?;
    tx.commit().await?;

    log_activity_with_context(
        &state.event_bus,
        "created",
        Some(guard.user_id()),
        &sale,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Envelope::created_data(sale))
}

#[utoipa::path(
    put,
    path = "/api/sales/{id}",
    tag = "Sales",
    params(("id" = Uuid, Path, description = "Sale id")),
    request_body = SaleUpdateRequest,
    responses(
        (status = 200, description = "Sale updated", body = Sale),
        (status = 404, description = "Sale not found")
    )
)]
pub async fn update_sale(
    State(state): State<AppState>,
    guard: Guarded<CanEditSales>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<SaleUpdateRequest>,
) -> AppResult<Envelope<Data<Sale>>> {
    let mut tx = begin_write(&state.pool).await?;
    let old = fetch_sale(&mut tx, id).await?;
    let today = utc_now().date_naive();

    // Completing a process without an explicit date stamps it today.
    let cyp_date = req.cyp_date.or(old.cyp_date).or_else(|| {
        (req.cyp_status.as_deref() == Some("completado")).then_some(today)
    });
    let photo_360_date = req.photo_360_date.or(old.photo_360_date).or_else(|| {
        (req.photo_360_status.as_deref() == Some("completado")).then_some(today)
    });

    sqlx::query(
        "UPDATE sales SET advisor_id = ?, advisor_name = ?, client_name = ?, client_dni = ?, client_email = ?, price = ?, discount = ?, sale_date = ?, cyp_status = ?, cyp_date = ?, photo_360_status = ?, photo_360_date = ?, updated_at = ? WHERE id = ?",
    )
    .bind(req.advisor_id.or(old.advisor_id).map(|a| a.to_string()))
    .bind(req.advisor_name.clone().or_else(|| old.advisor_name.clone()))
    .bind(req.client_name.as_deref().map(str::trim).unwrap_or(&old.client_name))
    .bind(req.client_dni.clone().or_else(|| old.client_dni.clone()))
    .bind(req.client_email.clone().or_else(|| old.client_email.clone()))
    .bind(req.price.or(old.price))
    .bind(req.discount.or(old.discount))
    .bind(req.sale_date.unwrap_or(old.sale_date))
    .bind(req.cyp_status.clone().or_else(|| old.cyp_status.clone()))
    .bind(cyp_date)
    .bind(req.photo_360_status.clone().or_else(|| old.photo_360_status.clone()))
    .bind(photo_360_date)
    .bind(utc_now())
    .bind(id.to_string())
    .execute(&mut *tx)
    .await?;

    let sale = fetch_sale(&mut tx, id).await?;
    tx.commit().await?;

    log_activity_with_context(
        &state.event_bus,
        "updated",
        Some(guard.user_id()),
        &sale,
        Some(&old),
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Envelope::data(sale))
}

pub(crate) async fn fetch_all_sales(pool: &sqlx::SqlitePool) -> AppResult<Vec<Sale>> {
    let rows = sqlx::query_as::<_, DbSale>(&format!(
        "SELECT {SALE_COLUMNS} FROM sales ORDER BY sale_date DESC, created_at DESC"
    ))
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(Sale::try_from).collect()
}

async fn fetch_sale(conn: &mut SqliteConnection, id: Uuid) -> AppResult<Sale> {
    sqlx::query_as::<_, DbSale>(&format!("SELECT {SALE_COLUMNS} FROM sales WHERE id = ?"))
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::not_found("sale not found"))?
        .try_into()
}
