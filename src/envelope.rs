//! Success half of the response envelope.
//!
//! Every JSON response carries `success`. Successful bodies flatten their
//! payload next to it, so a route returns either `{ success, data }` for a
//! generic resource or `{ success, role }` when the route names its key.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(flatten)]
    pub body: T,
    #[serde(skip)]
    status: StatusCode,
}

/// Body of responses that carry only `success` and `message`.
pub type MessageBody = serde_json::Map<String, serde_json::Value>;

/// Generic payload key for resources without a route-specific name.
#[derive(Debug, Serialize)]
pub struct Data<T: Serialize> {
    pub data: T,
}

impl<T: Serialize> Envelope<T> {
    pub fn ok(body: T) -> Self {
        Self {
            success: true,
            message: None,
            body,
            status: StatusCode::OK,
        }
    }

    pub fn created(body: T) -> Self {
        Self {
            status: StatusCode::CREATED,
            ..Self::ok(body)
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl<T: Serialize> Envelope<Data<T>> {
    pub fn data(data: T) -> Self {
        Self::ok(Data { data })
    }

    pub fn created_data(data: T) -> Self {
        Self::created(Data { data })
    }
}

impl Envelope<MessageBody> {
    /// Body with no payload beyond `success` and `message`.
    pub fn message(message: impl Into<String>) -> Self {
        Self::ok(MessageBody::new()).with_message(message)
    }
}

impl<T: Serialize> IntoResponse for Envelope<T> {
    fn into_response(self) -> Response {
        let status = self.status;
        (status, Json(self)).into_response()
    }
}
