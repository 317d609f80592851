use super::{handlers, TOKEN_PATH};
use crate::server::state::AppState;
use axum::{routing::any, Router};

pub fn routes() -> Router<AppState> {
    Router::new().route(TOKEN_PATH, any(handlers::proxy_token))
}
