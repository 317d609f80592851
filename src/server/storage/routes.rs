use super::handlers;
use crate::server::state::AppState;
use axum::{routing::any, Router};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/storage/", any(handlers::proxy_storage))
        .route("/storage/{*path}", any(handlers::proxy_storage))
}
