use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};

use crate::server::state::AppState;

/// Send browsers that wander onto the proxy to the backend's own page for the
/// repository namespace.
pub async fn browser_redirect(State(state): State<AppState>, request: Request) -> Response {
    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let target = format!(
        "https://{}/{}{}",
        state.registry.host, state.registry.repo_prefix, path_and_query
    );

    tracing::debug!("Redirecting browser request to {}", target);
    (StatusCode::TEMPORARY_REDIRECT, [(header::LOCATION, target)]).into_response()
}
