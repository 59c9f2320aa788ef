use std::sync::Arc;

use axum::http::{header, HeaderValue, Method};
use axum::routing::get;
use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::errors::AppError;
use crate::events::{init_event_bus, start_activity_listener, EventBus};
use crate::roles::{RoleResolver, SqlRoleResolver};
use crate::routes::{
    admin_roles, admin_users, auth, conversations, deliveries, health, notifications, photos, sales, support, vehicles,
    visits,
};
use crate::session::{SessionConfig, SessionResolver};
use crate::{docs, pages};

/// Process-wide state, built once here and cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub sessions: SessionResolver,
    pub roles: Arc<dyn RoleResolver>,
    pub config: Arc<AppConfig>,
    pub event_bus: EventBus,
}

impl AppState {
    pub fn new(pool: SqlitePool, config: AppConfig, event_bus: EventBus) -> Self {
        let sessions = SessionResolver::new(pool.clone(), SessionConfig::from_config(&config));
        let roles: Arc<dyn RoleResolver> = Arc::new(SqlRoleResolver::new(pool.clone()));

        Self {
            pool,
            sessions,
            roles,
            config: Arc::new(config),
            event_bus,
        }
    }
}

pub async fn create_app(pool: SqlitePool) -> Result<Router, AppError> {
    let config = AppConfig::from_env()?;
    build_router(pool, config)
}

/// Router for an explicit config; spawns the activity listener.
pub fn build_router(pool: SqlitePool, config: AppConfig) -> Result<Router, AppError> {
    let (event_bus, rx) = init_event_bus();
    tokio::spawn(start_activity_listener(rx, pool.clone()));

    let cors = cors_layer(&config.site_url)?;
    let openapi = docs::build_openapi(&config.site_url)?;
    let state = AppState::new(pool, config, event_bus);

    let api = Router::new()
        .route("/health", get(health::health))
        .nest("/auth", auth::routes())
        .nest("/vehicles", vehicles::routes())
        .nest("/sales", sales::routes())
        .nest("/entregas", deliveries::routes())
        .nest("/ai-assistant", conversations::routes())
        .nest("/notifications", notifications::routes())
        .nest("/visits", visits::routes())
        .nest("/support", support::routes())
        .nest(
            "/admin",
            admin_users::routes()
                .merge(admin_roles::routes())
                .merge(photos::routes())
                .merge(notifications::admin_routes())
                .merge(support::admin_routes()),
        );

    let router = Router::new()
        .nest("/api", api)
        .merge(pages::routes())
        .with_state(state)
        .merge(docs::swagger_routes(openapi)?)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    Ok(router)
}

/// Cookies carry the session, so CORS is restricted to the site origin
/// with credentials allowed.
fn cors_layer(site_url: &str) -> Result<CorsLayer, AppError> {
    let origin = HeaderValue::from_str(site_url.trim_end_matches('/'))
        .map_err(|_| AppError::configuration("SITE_URL is not a valid origin"))?;

    Ok(CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_origin(AllowOrigin::exact(origin))
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true))
}
