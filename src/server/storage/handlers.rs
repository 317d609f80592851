use axum::{
    extract::{Request, State},
    http::header,
    response::Response,
};

use super::storage_path;
use crate::server::error::ServerError;
use crate::server::proxy::{self, UpstreamRequest};
use crate::server::state::AppState;

/// Forward a blob download to the object-storage origin.
///
/// `Content-Length` is dropped from the response so layers always stream with
/// chunked framing, whatever their size. The client's `Authorization` header
/// is not forwarded.
pub async fn proxy_storage(
    State(state): State<AppState>,
    request: Request,
) -> Result<Response, ServerError> {
    let (parts, body) = request.into_parts();

    let path = storage_path(parts.uri.path());
    let url = match parts.uri.query() {
        Some(query) => format!(
            "{}://{}{}?{}",
            state.upstream_scheme, state.storage_host, path, query
        ),
        None => format!("{}://{}{}", state.upstream_scheme, state.storage_host, path),
    };
    tracing::debug!("Rewrote {} into {}", parts.uri, url);

    // Blob URLs are pre-signed; the client's registry token is meant for this
    // proxy, not for the storage origin
    let mut headers = proxy::forward_headers(&parts.headers);
    headers.remove(header::AUTHORIZATION);
    proxy::set_header(&mut headers, header::HOST, &state.storage_host);

    let upstream = UpstreamRequest {
        method: parts.method,
        url,
        headers,
        body: proxy::outbound_body(body),
    }
    .send(&state.http_client)
    .await?;

    Ok(proxy::into_response(upstream, |_, headers| {
        headers.remove(header::CONTENT_LENGTH);
    }))
}
