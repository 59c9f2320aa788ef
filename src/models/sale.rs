use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::db::row_parsers::{parse_opt_uuid, parse_uuid};
use crate::errors::{AppError, FieldError};
use crate::events::Loggable;
use crate::validation::{Checks, Validate};

pub const PROCESS_STATUSES: &[&str] = &["pendiente", "en_proceso", "completado"];
pub const COMPLETED: &str = "completado";
/// Vehicle type counted in the preparation queue.
pub const QUEUE_VEHICLE_TYPE: &str = "Coche";

pub const SALE_COLUMNS: &str = "id, vehicle_id, license_plate, model, vehicle_type, advisor_id, advisor_name, client_name, client_dni, client_email, price, discount, sale_date, cyp_status, cyp_date, photo_360_status, photo_360_date, created_by, created_at, updated_at";

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Sale {
    pub id: Uuid,
    pub vehicle_id: Option<Uuid>,
    pub license_plate: String,
    pub model: String,
    pub vehicle_type: Option<String>,
    pub advisor_id: Option<Uuid>,
    pub advisor_name: Option<String>,
    pub client_name: String,
    pub client_dni: Option<String>,
    pub client_email: Option<String>,
    pub price: Option<f64>,
    pub discount: Option<f64>,
    pub sale_date: NaiveDate,
    pub cyp_status: Option<String>,
    pub cyp_date: Option<NaiveDate>,
    pub photo_360_status: Option<String>,
    pub photo_360_date: Option<NaiveDate>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loggable for Sale {
    fn entity_type() -> &'static str { "sale" }
    fn subject_id(&self) -> Uuid { self.id }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbSale {
    pub id: String,
    pub vehicle_id: Option<String>,
    pub license_plate: String,
    pub model: String,
    pub vehicle_type: Option<String>,
    pub advisor_id: Option<String>,
    pub advisor_name: Option<String>,
    pub client_name: String,
    pub client_dni: Option<String>,
    pub client_email: Option<String>,
    pub price: Option<f64>,
    pub discount: Option<f64>,
    pub sale_date: NaiveDate,
    pub cyp_status: Option<String>,
    pub cyp_date: Option<NaiveDate>,
    pub photo_360_status: Option<String>,
    pub photo_360_date: Option<NaiveDate>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbSale> for Sale {
    type Error = AppError;

    fn try_from(value: DbSale) -> Result<Self, Self::Error> {
        Ok(Sale {
            id: parse_uuid(&value.id, "sales.id")?,
            vehicle_id: parse_opt_uuid(value.vehicle_id.as_deref(), "sales.vehicle_id")?,
            advisor_id: parse_opt_uuid(value.advisor_id.as_deref(), "sales.advisor_id")?,
            created_by: parse_opt_uuid(value.created_by.as_deref(), "sales.created_by")?,
            license_plate: value.license_plate,
            model: value.model,
            vehicle_type: value.vehicle_type,
            advisor_name: value.advisor_name,
            client_name: value.client_name,
            client_dni: value.client_dni,
            client_email: value.client_email,
            price: value.price,
            discount: value.discount,
            sale_date: value.sale_date,
            cyp_status: value.cyp_status,
            cyp_date: value.cyp_date,
            photo_360_status: value.photo_360_status,
            photo_360_date: value.photo_360_date,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SaleCreateRequest {
    pub vehicle_id: Option<Uuid>,
    #[schema(example = "9853MKL")]
    pub license_plate: String,
    #[schema(example = "Serie 3 320d")]
    pub model: String,
    pub vehicle_type: Option<String>,
    pub advisor_id: Option<Uuid>,
    pub advisor_name: Option<String>,
    #[schema(example = "Marta Ruiz")]
    pub client_name: String,
    pub client_dni: Option<String>,
    pub client_email: Option<String>,
    pub price: Option<f64>,
    pub discount: Option<f64>,
    pub sale_date: NaiveDate,
    pub cyp_status: Option<String>,
    pub photo_360_status: Option<String>,
}

impl Validate for SaleCreateRequest {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        Checks::new()
            .required("license_plate", &self.license_plate)
            .required("model", &self.model)
            .required("client_name", &self.client_name)
            .non_negative("price", self.price)
            .one_of("cyp_status", self.cyp_status.as_deref(), PROCESS_STATUSES)
            .one_of("photo_360_status", self.photo_360_status.as_deref(), PROCESS_STATUSES)
            .finish()
    }
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct SaleUpdateRequest {
    pub advisor_id: Option<Uuid>,
    pub advisor_name: Option<String>,
    pub client_name: Option<String>,
    pub client_dni: Option<String>,
    pub client_email: Option<String>,
    pub price: Option<f64>,
    pub discount: Option<f64>,
    pub sale_date: Option<NaiveDate>,
    pub cyp_status: Option<String>,
    pub cyp_date: Option<NaiveDate>,
    pub photo_360_status: Option<String>,
    pub photo_360_date: Option<NaiveDate>,
}

impl Validate for SaleUpdateRequest {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        Checks::new()
            .required_opt("client_name", self.client_name.as_deref())
            .non_negative("price", self.price)
            .one_of("cyp_status", self.cyp_status.as_deref(), PROCESS_STATUSES)
            .one_of("photo_360_status", self.photo_360_status.as_deref(), PROCESS_STATUSES)
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SaleStats {
    pub total_ventas: i64,
    pub este_mes: i64,
    pub ultima_semana: i64,
    pub promedio_precio: i64,
    pub promedio_dias_preparacion: i64,
    pub en_cola: i64,
    pub promedio_descuentos: i64,
}

impl SaleStats {
    /// Aggregates over every sale, relative to `today`.
    ///
    /// Preparation days run from the sale date to the later of the CyP and
    /// 360 photo completion dates, over sales with both processes completed.
    /// The queue counts cars with CyP started but not both processes done.
    /// The discount average ignores zero discounts and reports the magnitude.
    pub fn compute(sales: &[Sale], today: NaiveDate) -> Self {
        let month_start = today.with_day(1).unwrap_or(today);
        let week_start = today - Duration::days(7);

        let este_mes = sales.iter().filter(|s| s.sale_date >= month_start).count() as i64;
        let ultima_semana = sales.iter().filter(|s| s.sale_date >= week_start).count() as i64;

        let prices: Vec<f64> = sales.iter().filter_map(|s| s.price).collect();
        let promedio_precio = mean(&prices).map(|avg| avg.round() as i64).unwrap_or(0);

        let prep_days: Vec<f64> = sales
            .iter()
            .filter(|s| is_completed(&s.cyp_status) && is_completed(&s.photo_360_status))
            .filter_map(|s| {
                let done = s.cyp_date?.max(s.photo_360_date?);
                Some((done - s.sale_date).num_days() as f64)
            })
            .collect();
        let promedio_dias_preparacion = mean(&prep_days).map(|avg| avg.round() as i64).unwrap_or(0);

        let en_cola = sales
            .iter()
            .filter(|s| s.vehicle_type.as_deref() == Some(QUEUE_VEHICLE_TYPE) && s.cyp_status.is_some())
            .filter(|s| !(is_completed(&s.cyp_status) && is_completed(&s.photo_360_status)))
            .count() as i64;

        let discounts: Vec<f64> = sales
            .iter()
            .filter_map(|s| s.discount)
            .filter(|d| *d != 0.0)
            .collect();
        let promedio_descuentos = mean(&discounts).map(|avg| avg.abs().round() as i64).unwrap_or(0);

        Self {
            total_ventas: sales.len() as i64,
            este_mes,
            ultima_semana,
            promedio_precio,
            promedio_dias_preparacion,
            en_cola,
            promedio_descuentos,
        }
    }
}

fn is_completed(status: &Option<String>) -> bool {
    status.as_deref() == Some(COMPLETED)
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}
