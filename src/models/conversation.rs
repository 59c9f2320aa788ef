use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::db::row_parsers::parse_uuid;
use crate::errors::{AppError, FieldError};
use crate::validation::{Checks, Validate};

const TITLE_CHARS: usize = 50;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AssistantSession {
    pub id: Uuid,
    pub title: String,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub message_count: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct DbAssistantSession {
    pub id: String,
    pub title: String,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub message_count: i64,
}

impl TryFrom<DbAssistantSession> for AssistantSession {
    type Error = AppError;

    fn try_from(value: DbAssistantSession) -> Result<Self, Self::Error> {
        Ok(AssistantSession {
            id: parse_uuid(&value.id, "ai_sessions.id")?,
            title: value.title,
            last_message_at: value.last_message_at,
            created_at: value.created_at,
            message_count: value.message_count,
        })
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Conversation {
    pub id: Uuid,
    pub session_id: Uuid,
    pub message: String,
    pub response: String,
    #[schema(value_type = Option<Object>)]
    pub context_data: Option<Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DbConversation {
    pub id: String,
    pub session_id: String,
    pub message: String,
    pub response: String,
    pub context_data: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DbConversation> for Conversation {
    type Error = AppError;

    fn try_from(value: DbConversation) -> Result<Self, Self::Error> {
        Ok(Conversation {
            id: parse_uuid(&value.id, "ai_conversations.id")?,
            session_id: parse_uuid(&value.session_id, "ai_conversations.session_id")?,
            message: value.message,
            response: value.response,
            context_data: value.context_data.and_then(|raw| serde_json::from_str(&raw).ok()),
            created_at: value.created_at,
        })
    }
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct ConversationQuery {
    /// `sessions` lists the caller's sessions; `cleanup` (DELETE only) purges old ones.
    pub action: Option<String>,
    pub session_id: Option<Uuid>,
    pub conversation_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SaveConversationRequest {
    pub message: String,
    pub response: String,
    pub session_id: Option<Uuid>,
    #[schema(value_type = Option<Object>)]
    pub context_data: Option<Value>,
}

impl Validate for SaveConversationRequest {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        Checks::new()
            .required("message", &self.message)
            .required("response", &self.response)
            .finish()
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SavedConversation {
    pub conversation_id: Uuid,
    pub session_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Session title derived from its first message.
pub fn session_title(message: &str) -> String {
    let mut chars = message.chars();
    let head: String = chars.by_ref().take(TITLE_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
