use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::db::row_parsers::parse_uuid;
use crate::errors::{AppError, FieldError};
use crate::events::Loggable;
use crate::validation::{Checks, Validate};

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Notification {
    pub id: Uuid,
    pub title: String,
    pub body: String,
    pub url: Option<String>,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DbNotification {
    pub id: String,
    pub title: String,
    pub body: String,
    pub url: Option<String>,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DbNotification> for Notification {
    type Error = AppError;

    fn try_from(value: DbNotification) -> Result<Self, Self::Error> {
        Ok(Notification {
            id: parse_uuid(&value.id, "notifications.id")?,
            title: value.title,
            body: value.body,
            url: value.url,
            read_at: value.read_at,
            created_at: value.created_at,
        })
    }
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct NotificationQuery {
    /// Only notifications not yet read.
    pub unread: Option<bool>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SubscriptionKeys {
    pub p256dh: String,
    pub auth: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SubscribeRequest {
    pub endpoint: String,
    pub keys: SubscriptionKeys,
}

impl Validate for SubscribeRequest {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        Checks::new()
            .required("endpoint", &self.endpoint)
            .required("keys.p256dh", &self.keys.p256dh)
            .required("keys.auth", &self.keys.auth)
            .finish()
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UnsubscribeRequest {
    pub endpoint: String,
}

impl Validate for UnsubscribeRequest {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        Checks::new().required("endpoint", &self.endpoint).finish()
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PushSubscription {
    pub id: Uuid,
    pub endpoint: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct BroadcastRequest {
    pub title: String,
    pub body: String,
    pub url: Option<String>,
    /// Restrict to holders of this role; everyone when absent.
    pub role: Option<String>,
}

impl Validate for BroadcastRequest {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        Checks::new()
            .required("title", &self.title)
            .required("body", &self.body)
            .required_opt("role", self.role.as_deref())
            .finish()
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BroadcastResult {
    pub id: Uuid,
    pub title: String,
    pub role: Option<String>,
    pub sent: i64,
}

impl Loggable for BroadcastResult {
    fn entity_type() -> &'static str { "notification" }
    fn subject_id(&self) -> Uuid { self.id }
}
