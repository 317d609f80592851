use axum::{
    extract::{Extension, Request, State},
    http::{header, HeaderName, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
};

use super::rewrite::{rewrite_registry_path, ResponseRewrite};
use crate::server::error::ServerError;
use crate::server::middleware::OriginalHost;
use crate::server::proxy::{self, UpstreamRequest};
use crate::server::state::AppState;

const API_VERSION_HEADER: HeaderName = HeaderName::from_static("docker-distribution-api-version");

/// Header explaining why the proxy answered a request itself
pub const PROXY_ERROR_HEADER: HeaderName = HeaderName::from_static("x-registry-proxy-error");

/// Answer the registry API-version probe locally.
///
/// Clients call `/v2/` before anything else; answering it here keeps the
/// backend's own challenge out of the picture until a real request is made.
pub async fn api_version() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(API_VERSION_HEADER, HeaderValue::from_static("registry/2.0"))],
        "ok",
    )
}

/// Build the outbound `User-Agent`, keeping the client's own agent last
fn decorated_user_agent(client_host: &str, client_agent: &str) -> String {
    format!(
        "registry-proxy/{} customDomain/{} {}",
        env!("CARGO_PKG_VERSION"),
        client_host,
        client_agent
    )
}

fn head_rejected() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        [(
            PROXY_ERROR_HEADER,
            HeaderValue::from_static("HEAD requests are not supported by this proxy"),
        )],
    )
        .into_response()
}

/// Forward a registry API request to the backend under the repository prefix
pub async fn proxy_registry(
    State(state): State<AppState>,
    Extension(original_host): Extension<OriginalHost>,
    request: Request,
) -> Result<Response, ServerError> {
    let (parts, body) = request.into_parts();

    if state.reject_head_requests && parts.method == Method::HEAD {
        tracing::debug!("Rejecting HEAD request for {}", parts.uri.path());
        return Ok(head_rejected());
    }

    let registry = &state.registry;
    let path = rewrite_registry_path(parts.uri.path(), &registry.repo_prefix);
    let url = match parts.uri.query() {
        Some(query) => format!("{}://{}{}?{}", state.upstream_scheme, registry.host, path, query),
        None => format!("{}://{}{}", state.upstream_scheme, registry.host, path),
    };
    tracing::debug!("Rewrote {} into {}", parts.uri, url);

    let mut headers = proxy::forward_headers(&parts.headers);
    proxy::set_header(&mut headers, header::HOST, &registry.host);

    // With an authenticator configured the client's own credential never
    // reaches the backend, even when no replacement is available
    if let Some(authenticator) = &state.authenticator {
        headers.remove(header::AUTHORIZATION);
        if let Some(value) = authenticator.authorization().await {
            headers.insert(header::AUTHORIZATION, value);
        }
    }

    if let Some(agent) = parts
        .headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
    {
        let agent = decorated_user_agent(original_host.as_str(), agent);
        proxy::set_header(&mut headers, header::USER_AGENT, &agent);
    }

    let upstream = UpstreamRequest {
        method: parts.method.clone(),
        url,
        headers,
        body: proxy::outbound_body(body),
    }
    .send(&state.http_client)
    .await?;

    let rewrite = ResponseRewrite {
        method: &parts.method,
        client_host: original_host.as_str(),
        storage_host: &state.storage_host,
        upstream_scheme: state.upstream_scheme,
        upstream_host: &registry.host,
    };

    Ok(proxy::into_response(upstream, |status, headers| {
        rewrite.apply(status, headers)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decorated_user_agent() {
        let agent = decorated_user_agent("images.example.com", "docker/27.0");
        assert_eq!(
            agent,
            format!(
                "registry-proxy/{} customDomain/images.example.com docker/27.0",
                env!("CARGO_PKG_VERSION")
            )
        );
    }

    #[tokio::test]
    async fn test_api_version_is_answered_locally() {
        let response = api_version().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("docker-distribution-api-version").unwrap(),
            "registry/2.0"
        );
    }

    #[test]
    fn test_head_rejection_response() {
        let response = head_rejected();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert!(response.headers().contains_key("x-registry-proxy-error"));
    }
}
