pub mod app;
pub mod authz;
pub mod config;
pub mod db;
pub mod docs;
pub mod envelope;
pub mod errors;
pub mod events;
pub mod models;
pub mod pages;
pub mod roles;
pub mod routes;
pub mod session;
pub mod utils;
pub mod validation;

// Re-export commonly used items for tests
pub use app::{build_router, create_app, AppState};
pub use config::AppConfig;
