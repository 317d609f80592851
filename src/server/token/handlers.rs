use axum::{
    extract::{Request, State},
    http::header,
    response::Response,
};

use super::token_request_url;
use crate::server::error::ServerError;
use crate::server::proxy::{self, UpstreamRequest};
use crate::server::state::AppState;

/// Forward a token request to the discovered token endpoint.
///
/// The `scope` parameter is moved under the repository prefix; everything
/// else about the request and the response passes through.
pub async fn proxy_token(
    State(state): State<AppState>,
    request: Request,
) -> Result<Response, ServerError> {
    let endpoint = state
        .token_endpoint
        .as_ref()
        .ok_or_else(|| ServerError::bad_request("No token endpoint is configured"))?;

    let (parts, body) = request.into_parts();

    let url = token_request_url(endpoint, parts.uri.query(), &state.registry.repo_prefix);
    tracing::debug!("Rewrote {} into {}", parts.uri, url);

    let mut headers = proxy::forward_headers(&parts.headers);
    if let Some(host) = url.host_str() {
        let host = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };
        proxy::set_header(&mut headers, header::HOST, &host);
    }

    let upstream = UpstreamRequest {
        method: parts.method,
        url: url.to_string(),
        headers,
        body: proxy::outbound_body(body),
    }
    .send(&state.http_client)
    .await?;

    Ok(proxy::into_response(upstream, |_, _| {}))
}
