use super::handlers;
use super::rewrite::API_VERSION_PATH;
use crate::server::state::AppState;
use axum::{routing::any, Router};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(API_VERSION_PATH, any(handlers::api_version))
        .route("/v2", any(handlers::api_version))
        .route("/v2/{*path}", any(handlers::proxy_registry))
}
