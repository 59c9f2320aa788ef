use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::db::row_parsers::{parse_opt_uuid, parse_string_list, parse_uuid};
use crate::errors::{AppError, FieldError};
use crate::events::Loggable;
use crate::validation::{Checks, Validate};

pub const DELIVERY_STATUSES: &[&str] = &["pendiente", "entregado"];

pub const DELIVERY_COLUMNS: &str = "id, sale_id, license_plate, delivery_date, advisor_name, status, incidents, notes, created_by, created_at, updated_at";

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Delivery {
    pub id: Uuid,
    pub sale_id: Option<Uuid>,
    pub license_plate: String,
    pub delivery_date: Option<NaiveDate>,
    pub advisor_name: Option<String>,
    pub status: String,
    pub incidents: Vec<String>,
    pub notes: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loggable for Delivery {
    fn entity_type() -> &'static str { "delivery" }
    fn subject_id(&self) -> Uuid { self.id }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbDelivery {
    pub id: String,
    pub sale_id: Option<String>,
    pub license_plate: String,
    pub delivery_date: Option<NaiveDate>,
    pub advisor_name: Option<String>,
    pub status: String,
    pub incidents: String,
    pub notes: Option<String>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbDelivery> for Delivery {
    type Error = AppError;

    fn try_from(value: DbDelivery) -> Result<Self, Self::Error> {
        Ok(Delivery {
            id: parse_uuid(&value.id, "deliveries.id")?,
            sale_id: parse_opt_uuid(value.sale_id.as_deref(), "deliveries.sale_id")?,
            created_by: parse_opt_uuid(value.created_by.as_deref(), "deliveries.created_by")?,
            incidents: parse_string_list(&value.incidents),
            license_plate: value.license_plate,
            delivery_date: value.delivery_date,
            advisor_name: value.advisor_name,
            status: value.status,
            notes: value.notes,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

/// Either `sale_id` or `license_plate` identifies the car; with a sale the
/// plate is taken from it.
#[derive(Debug, Deserialize, ToSchema)]
pub struct DeliveryCreateRequest {
    pub sale_id: Option<Uuid>,
    pub license_plate: Option<String>,
    pub delivery_date: Option<NaiveDate>,
    pub advisor_name: Option<String>,
    pub status: Option<String>,
    #[serde(default)]
    pub incidents: Vec<String>,
    pub notes: Option<String>,
}

impl Validate for DeliveryCreateRequest {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut checks = Checks::new();
        if self.sale_id.is_none() {
            checks.required("license_plate", self.license_plate.as_deref().unwrap_or_default());
        }
        checks
            .one_of("status", self.status.as_deref(), DELIVERY_STATUSES)
            .finish()
    }
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct DeliveryUpdateRequest {
    pub delivery_date: Option<NaiveDate>,
    pub advisor_name: Option<String>,
    pub status: Option<String>,
    pub incidents: Option<Vec<String>>,
    pub notes: Option<String>,
}

impl Validate for DeliveryUpdateRequest {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        Checks::new()
            .one_of("status", self.status.as_deref(), DELIVERY_STATUSES)
            .finish()
    }
}
