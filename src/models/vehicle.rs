use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::db::row_parsers::{parse_opt_uuid, parse_uuid};
use crate::errors::{AppError, FieldError};
use crate::events::Loggable;
use crate::validation::{Checks, Validate};

pub const VEHICLE_STATUSES: &[&str] = &["disponible", "reservado", "vendido"];

pub const VEHICLE_COLUMNS: &str = "id, license_plate, brand, model, vehicle_type, status, price, entry_date, photos_completed, created_by, created_at, updated_at";

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Vehicle {
    pub id: Uuid,
    pub license_plate: String,
    pub brand: Option<String>,
    pub model: String,
    pub vehicle_type: Option<String>,
    pub status: String,
    pub price: Option<f64>,
    pub entry_date: Option<NaiveDate>,
    pub photos_completed: bool,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loggable for Vehicle {
    fn entity_type() -> &'static str { "vehicle" }
    fn subject_id(&self) -> Uuid { self.id }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbVehicle {
    pub id: String,
    pub license_plate: String,
    pub brand: Option<String>,
    pub model: String,
    pub vehicle_type: Option<String>,
    pub status: String,
    pub price: Option<f64>,
    pub entry_date: Option<NaiveDate>,
    pub photos_completed: bool,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbVehicle> for Vehicle {
    type Error = AppError;

    fn try_from(value: DbVehicle) -> Result<Self, Self::Error> {
        Ok(Vehicle {
            id: parse_uuid(&value.id, "vehicles.id")?,
            created_by: parse_opt_uuid(value.created_by.as_deref(), "vehicles.created_by")?,
            license_plate: value.license_plate,
            brand: value.brand,
            model: value.model,
            vehicle_type: value.vehicle_type,
            status: value.status,
            price: value.price,
            entry_date: value.entry_date,
            photos_completed: value.photos_completed,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct VehicleCreateRequest {
    #[schema(example = "9853MKL")]
    pub license_plate: String,
    #[schema(example = "BMW")]
    pub brand: Option<String>,
    #[schema(example = "Serie 3 320d")]
    pub model: String,
    #[schema(example = "Coche")]
    pub vehicle_type: Option<String>,
    pub status: Option<String>,
    pub price: Option<f64>,
    pub entry_date: Option<NaiveDate>,
}

impl Validate for VehicleCreateRequest {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        Checks::new()
            .required("license_plate", &self.license_plate)
            .required("model", &self.model)
            .one_of("status", self.status.as_deref(), VEHICLE_STATUSES)
            .non_negative("price", self.price)
            .finish()
    }
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct VehicleUpdateRequest {
    pub license_plate: Option<String>,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub vehicle_type: Option<String>,
    pub status: Option<String>,
    pub price: Option<f64>,
    pub entry_date: Option<NaiveDate>,
}

impl Validate for VehicleUpdateRequest {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        Checks::new()
            .required_opt("license_plate", self.license_plate.as_deref())
            .required_opt("model", self.model.as_deref())
            .one_of("status", self.status.as_deref(), VEHICLE_STATUSES)
            .non_negative("price", self.price)
            .finish()
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PhotosUpdateRequest {
    pub completed: bool,
}

impl Validate for PhotosUpdateRequest {}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct VehicleListQuery {
    /// Matches plate, brand or model.
    pub q: Option<String>,
    pub status: Option<String>,
    pub pending_photos: Option<bool>,
}
