use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::db::row_parsers::parse_uuid;
use crate::errors::{AppError, FieldError};
use crate::events::Loggable;
use crate::validation::{Checks, Validate};

/// Share of incoming photo work assigned to one photographer.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PhotoAssignment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub percentage: i64,
    pub is_active: bool,
    /// Full name, falling back to email.
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loggable for PhotoAssignment {
    fn entity_type() -> &'static str { "photo_assignment" }
    fn subject_id(&self) -> Uuid { self.user_id }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbPhotoAssignment {
    pub id: String,
    pub user_id: String,
    pub percentage: i64,
    pub is_active: bool,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const UNNAMED_USER: &str = "Usuario sin nombre";

impl TryFrom<DbPhotoAssignment> for PhotoAssignment {
    type Error = AppError;

    fn try_from(value: DbPhotoAssignment) -> Result<Self, Self::Error> {
        Ok(PhotoAssignment {
            id: parse_uuid(&value.id, "photo_assignments.id")?,
            user_id: parse_uuid(&value.user_id, "photo_assignments.user_id")?,
            percentage: value.percentage,
            is_active: value.is_active,
            display_name: display_name(value.full_name, value.email),
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

pub fn display_name(full_name: Option<String>, email: Option<String>) -> String {
    full_name
        .filter(|n| !n.trim().is_empty())
        .or(email.filter(|e| !e.trim().is_empty()))
        .unwrap_or_else(|| UNNAMED_USER.to_string())
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PhotoAssignmentList {
    pub assignments: Vec<PhotoAssignment>,
    pub total_percentage: i64,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PhotoAssignmentUpdateRequest {
    pub percentage: Option<i64>,
    pub is_active: Option<bool>,
    #[serde(default)]
    pub adjust_others: bool,
}

impl Validate for PhotoAssignmentUpdateRequest {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut checks = Checks::new();
        if self.percentage.is_none() && self.is_active.is_none() {
            return Err(vec![FieldError::new("percentage", "percentage or isActive is required")]);
        }
        if let Some(percentage) = self.percentage {
            checks.range_i64("percentage", percentage, 0, 100);
        }
        checks.finish()
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PhotoAssignmentUpdated {
    pub user_id: Uuid,
    pub percentage: i64,
    pub is_active: bool,
    pub display_name: String,
    pub id: Uuid,
    pub total_percentage: i64,
}
