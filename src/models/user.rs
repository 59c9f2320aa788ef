use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::db::row_parsers::{parse_uuid, split_role_names};
use crate::errors::{AppError, FieldError};
use crate::events::{Loggable, Severity};
use crate::validation::{Checks, Validate};

pub const PROFILE_COLUMNS: &str = "id, email, full_name, alias, phone, position, avatar_url, role, password_hash, welcome_email_sent, last_sign_in_at, created_at, updated_at";

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Profile {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub alias: Option<String>,
    pub phone: Option<String>,
    pub position: Option<String>,
    pub avatar_url: Option<String>,
    /// Display name of the assigned role(s), comma separated.
    pub role: Option<String>,
    /// Role names parsed from `role`, lower-cased.
    pub roles: Vec<String>,
    pub welcome_email_sent: bool,
    pub last_sign_in_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loggable for Profile {
    fn entity_type() -> &'static str { "user" }
    fn subject_id(&self) -> Uuid { self.id }
    fn severity(&self) -> Severity { Severity::Critical }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbProfile {
    pub id: String,
    pub email: String,
    pub full_name: String,
    pub alias: Option<String>,
    pub phone: Option<String>,
    pub position: Option<String>,
    pub avatar_url: Option<String>,
    pub role: Option<String>,
    pub password_hash: Option<String>,
    pub welcome_email_sent: bool,
    pub last_sign_in_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbProfile> for Profile {
    type Error = AppError;

    fn try_from(value: DbProfile) -> Result<Self, Self::Error> {
        Ok(Profile {
            id: parse_uuid(&value.id, "profiles.id")?,
            roles: split_role_names(value.role.as_deref()),
            email: value.email,
            full_name: value.full_name,
            alias: value.alias,
            phone: value.phone,
            position: value.position,
            avatar_url: value.avatar_url,
            role: value.role,
            welcome_email_sent: value.welcome_email_sent,
            last_sign_in_at: value.last_sign_in_at,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    #[schema(example = "recepcion@cvo.example")]
    pub email: String,
    #[schema(example = "S3cureP@ssw0rd")]
    pub password: String,
}

impl Validate for LoginRequest {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        Checks::new()
            .email("email", &self.email)
            .required("password", &self.password)
            .finish()
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    #[schema(example = "asesor@cvo.example")]
    pub email: String,
    #[schema(example = "Lucía Martín")]
    pub full_name: String,
    pub alias: Option<String>,
    pub phone: Option<String>,
    pub position: Option<String>,
    pub avatar_url: Option<String>,
    pub role_id: Option<Uuid>,
    /// Initial password for local sign-in; without it the account cannot log in.
    pub password: Option<String>,
    #[serde(default)]
    pub skip_welcome_email: bool,
}

impl Validate for CreateUserRequest {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        Checks::new()
            .email("email", &self.email)
            .required("fullName", &self.full_name)
            .finish()
    }
}

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    pub full_name: Option<String>,
    pub alias: Option<String>,
    pub phone: Option<String>,
    pub position: Option<String>,
    pub avatar_url: Option<String>,
    pub role_id: Option<Uuid>,
}

impl Validate for UpdateUserRequest {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        Checks::new()
            .required_opt("fullName", self.full_name.as_deref())
            .finish()
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SetRoleRequest {
    pub role_id: Uuid,
}

impl Validate for SetRoleRequest {}

#[derive(Debug, Serialize, ToSchema)]
pub struct SessionUser {
    pub user: Profile,
    pub roles: Vec<String>,
}
