use axum::extract::State;
use serde::Serialize;
use sqlx::query_scalar;
use utoipa::ToSchema;

use crate::app::AppState;
use crate::envelope::Envelope;

#[derive(Debug, Serialize, ToSchema)]
pub struct Integrations {
    pub smtp: bool,
    pub push: bool,
    pub tls: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub db_ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_error: Option<String>,
    pub integrations: Integrations,
}

#[utoipa::path(
    get,
    path = "/api/health",
    tag = "Health",
    responses((status = 200, description = "Health check", body = HealthResponse))
)]
pub async fn health(State(state): State<AppState>) -> Envelope<HealthResponse> {
    let db_check = query_scalar::<_, i64>("SELECT 1").fetch_one(&state.pool).await;

    let (db_ok, db_error) = match db_check {
        Ok(_) => (true, None),
        Err(e) => (false, Some(e.to_string())),
    };

    Envelope::ok(HealthResponse {
        status: if db_ok { "ok" } else { "degraded" },
        db_ok,
        db_error,
        integrations: Integrations {
            smtp: state.config.smtp.is_some(),
            push: state.config.push.is_some(),
            tls: state.config.tls.is_some(),
        },
    })
}
