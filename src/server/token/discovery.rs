use axum::http::{header, StatusCode};
use thiserror::Error;
use url::Url;

use crate::server::registry::rewrite::extract_realm;

/// Reasons the backend's token endpoint could not be determined
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("failed to probe {url}: {source}")]
    Unreachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} answered 401 without a WWW-Authenticate challenge")]
    MissingChallenge { url: String },

    #[error("challenge from {url} carries no realm: {challenge}")]
    MissingRealm { url: String, challenge: String },

    #[error("realm {realm:?} is not a valid URL: {source}")]
    InvalidRealm {
        realm: String,
        #[source]
        source: url::ParseError,
    },
}

/// Probe the backend API root and read the token endpoint from its challenge.
///
/// Returns `Ok(None)` when the backend does not challenge at all, in which
/// case no token route is served.
pub async fn discover_token_endpoint(
    client: &reqwest::Client,
    probe_url: &str,
) -> Result<Option<Url>, DiscoveryError> {
    let response = client
        .get(probe_url)
        .send()
        .await
        .map_err(|source| DiscoveryError::Unreachable {
            url: probe_url.to_string(),
            source,
        })?;

    let status = response.status();
    let challenge = response
        .headers()
        .get(header::WWW_AUTHENTICATE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let Some(challenge) = challenge else {
        if status == StatusCode::UNAUTHORIZED {
            return Err(DiscoveryError::MissingChallenge {
                url: probe_url.to_string(),
            });
        }
        tracing::info!(
            "{} answered {} without an auth challenge, token route disabled",
            probe_url,
            status
        );
        return Ok(None);
    };

    let realm = extract_realm(&challenge).ok_or_else(|| DiscoveryError::MissingRealm {
        url: probe_url.to_string(),
        challenge: challenge.clone(),
    })?;

    let endpoint = Url::parse(realm).map_err(|source| DiscoveryError::InvalidRealm {
        realm: realm.to_string(),
        source,
    })?;

    tracing::info!("Discovered token endpoint {}", endpoint);
    Ok(Some(endpoint))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::test_support::spawn_server;
    use axum::{http::HeaderValue, routing::get, Router};

    async fn backend(status: StatusCode, challenge: Option<&'static str>) -> String {
        let app = Router::new().route(
            "/v2/",
            get(move || async move {
                let mut response = axum::response::Response::new(axum::body::Body::empty());
                *response.status_mut() = status;
                if let Some(challenge) = challenge {
                    response.headers_mut().insert(
                        header::WWW_AUTHENTICATE,
                        HeaderValue::from_static(challenge),
                    );
                }
                response
            }),
        );
        let addr = spawn_server(app).await;
        format!("http://{}/v2/", addr)
    }

    #[tokio::test]
    async fn test_discovers_realm() {
        let url = backend(
            StatusCode::UNAUTHORIZED,
            Some(r#"Bearer realm="https://auth.example.com/token",service="gcr.io""#),
        )
        .await;

        let endpoint = discover_token_endpoint(&reqwest::Client::new(), &url)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(endpoint.as_str(), "https://auth.example.com/token");
    }

    #[tokio::test]
    async fn test_no_challenge_disables_token_route() {
        let url = backend(StatusCode::OK, None).await;
        let endpoint = discover_token_endpoint(&reqwest::Client::new(), &url)
            .await
            .unwrap();
        assert!(endpoint.is_none());
    }

    #[tokio::test]
    async fn test_unauthorized_without_challenge_fails() {
        let url = backend(StatusCode::UNAUTHORIZED, None).await;
        let err = discover_token_endpoint(&reqwest::Client::new(), &url)
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::MissingChallenge { .. }));
    }

    #[tokio::test]
    async fn test_challenge_without_realm_fails() {
        let url = backend(StatusCode::UNAUTHORIZED, Some(r#"Bearer service="gcr.io""#)).await;
        let err = discover_token_endpoint(&reqwest::Client::new(), &url)
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::MissingRealm { .. }));
    }

    #[tokio::test]
    async fn test_invalid_realm_fails() {
        let url = backend(StatusCode::UNAUTHORIZED, Some(r#"Bearer realm="/token""#)).await;
        let err = discover_token_endpoint(&reqwest::Client::new(), &url)
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::InvalidRealm { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_backend_fails() {
        let err = discover_token_endpoint(&reqwest::Client::new(), "http://127.0.0.1:1/v2/")
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::Unreachable { .. }));
    }
}
