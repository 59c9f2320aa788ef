use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Clone, Serialize, ToSchema, FromRow)]
pub struct ActivityEntry {
    pub id: String,
    pub event_name: String,
    pub description: String,
    pub actor_id: Option<String>,
    pub subject_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub severity: String,
    #[serde(skip)]
    pub properties: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ActivityView {
    #[serde(flatten)]
    pub entry: ActivityEntry,
    #[schema(value_type = Object)]
    pub payload: Value,
}

impl From<ActivityEntry> for ActivityView {
    fn from(entry: ActivityEntry) -> Self {
        let payload = serde_json::from_str::<Value>(&entry.properties)
            .ok()
            .and_then(|event| event.get("payload").cloned())
            .unwrap_or(Value::Null);
        Self { entry, payload }
    }
}

pub const DEFAULT_ACTIVITY_LIMIT: i64 = 50;
pub const MAX_ACTIVITY_LIMIT: i64 = 200;

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct ActivityQuery {
    /// At most 200.
    pub limit: Option<i64>,
}

impl ActivityQuery {
    pub fn effective_limit(&self) -> i64 {
        self.limit
            .unwrap_or(DEFAULT_ACTIVITY_LIMIT)
            .clamp(1, MAX_ACTIVITY_LIMIT)
    }
}
