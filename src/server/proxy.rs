//! Plumbing shared by every forwarding route: header filtering, body
//! streaming in both directions and upstream error reporting.

use crate::server::error::{ServerError, ServerErrorExt};
use axum::{
    body::{Body, HttpBody},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    response::Response,
};

/// Headers that describe a single connection and must not be forwarded
const HOP_BY_HOP_HEADERS: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Copy end-to-end headers, dropping hop-by-hop headers and `Host`
pub fn forward_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut headers = inbound.clone();
    for name in HOP_BY_HOP_HEADERS.iter() {
        headers.remove(name);
    }
    headers.remove(header::HOST);
    headers
}

/// Convert an inbound body into a streaming outbound body.
///
/// Returns `None` for bodies known to be empty so that bodiless requests are
/// not sent with chunked framing.
pub fn outbound_body(body: Body) -> Option<reqwest::Body> {
    if body.size_hint().exact() == Some(0) {
        return None;
    }
    Some(reqwest::Body::wrap_stream(body.into_data_stream()))
}

/// A request about to be sent to an upstream origin
pub struct UpstreamRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<reqwest::Body>,
}

impl UpstreamRequest {
    /// Issue exactly one round trip.
    ///
    /// Network failures become a 502 for this request only; nothing is retried.
    pub async fn send(self, client: &reqwest::Client) -> Result<reqwest::Response, ServerError> {
        let UpstreamRequest {
            method,
            url,
            headers,
            body,
        } = self;

        let mut builder = client.request(method.clone(), &url).headers(headers);
        if let Some(body) = body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .server_err(StatusCode::BAD_GATEWAY, "Upstream request failed")
            .map_err(|e| {
                e.with_context("method", method.to_string())
                    .with_context("url", url.clone())
            })?;

        tracing::info!(
            method = %method,
            url = %url,
            status = response.status().as_u16(),
            "Upstream request completed"
        );
        Ok(response)
    }
}

/// Stream an upstream response back to the client.
///
/// `rewrite` sees the status and the already filtered headers before the
/// response is assembled.
pub fn into_response(
    upstream: reqwest::Response,
    rewrite: impl FnOnce(StatusCode, &mut HeaderMap),
) -> Response {
    let status = upstream.status();
    let mut headers = forward_headers(upstream.headers());
    rewrite(status, &mut headers);

    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Set a header from a string, skipping values that are not valid header text
pub fn set_header(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => tracing::warn!("Refusing to set invalid {} header value: {:?}", name, value),
    }
}
