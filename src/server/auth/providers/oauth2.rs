use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::http::HeaderValue;
use moka::{future::Cache, Expiry};
use serde::Deserialize;
use std::time::{Duration, Instant};

use crate::server::auth::{basic_auth_value, Authenticator};

/// Username registries expect when an OAuth2 access token is sent as basic auth
const ACCESS_TOKEN_USERNAME: &str = "oauth2accesstoken";

/// Lifetime assumed when the token endpoint omits `expires_in`
const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 3600;

/// Tokens are dropped this long before they actually expire
const EXPIRY_SKEW_SECS: u64 = 60;

/// Token response from an OAuth2 token endpoint
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Clone)]
struct CachedCredential {
    value: HeaderValue,
    ttl: Duration,
}

struct CredentialExpiry;

impl Expiry<(), CachedCredential> for CredentialExpiry {
    fn expire_after_create(
        &self,
        _key: &(),
        value: &CachedCredential,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Authenticator that lazily fetches and caches an OAuth2 access token.
///
/// Uses the refresh-token grant when a refresh token is configured and the
/// client-credentials grant otherwise. The cache coalesces concurrent callers
/// onto a single in-flight refresh.
pub struct OAuth2TokenSource {
    http_client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    refresh_token: Option<String>,
    scopes: Vec<String>,
    cache: Cache<(), CachedCredential>,
}

impl OAuth2TokenSource {
    pub fn new(
        http_client: reqwest::Client,
        token_url: String,
        client_id: String,
        client_secret: String,
        refresh_token: Option<String>,
        scopes: Vec<String>,
    ) -> Self {
        let cache = Cache::builder()
            .max_capacity(1)
            .expire_after(CredentialExpiry)
            .build();

        Self {
            http_client,
            token_url,
            client_id,
            client_secret,
            refresh_token,
            scopes,
            cache,
        }
    }

    /// Request a new access token from the token endpoint
    async fn fetch_credential(&self) -> Result<CachedCredential> {
        let scope = self.scopes.join(" ");
        let mut form: Vec<(&str, &str)> = vec![
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        match &self.refresh_token {
            Some(refresh_token) => {
                form.push(("grant_type", "refresh_token"));
                form.push(("refresh_token", refresh_token.as_str()));
            }
            None => form.push(("grant_type", "client_credentials")),
        }
        if !scope.is_empty() {
            form.push(("scope", scope.as_str()));
        }

        tracing::debug!("Refreshing OAuth2 access token from {}", self.token_url);

        let response = self
            .http_client
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .context("Token refresh request failed")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            anyhow::bail!(
                "Token refresh failed with status {}: {}",
                status,
                error_text
            );
        }

        let token: TokenResponse = response
            .json()
            .await
            .context("Failed to parse token response")?;

        let lifetime = token.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
        let ttl = Duration::from_secs(lifetime.saturating_sub(EXPIRY_SKEW_SECS));
        let value = basic_auth_value(ACCESS_TOKEN_USERNAME, &token.access_token)
            .context("Access token cannot be encoded as a header value")?;

        tracing::info!("Obtained OAuth2 access token valid for {}s", lifetime);

        Ok(CachedCredential { value, ttl })
    }
}

#[async_trait]
impl Authenticator for OAuth2TokenSource {
    async fn authorization(&self) -> Option<HeaderValue> {
        match self.cache.try_get_with((), self.fetch_credential()).await {
            Ok(credential) => Some(credential.value),
            Err(e) => {
                tracing::warn!(
                    token_url = %self.token_url,
                    error = ?e,
                    "Credential refresh failed, forwarding request without Authorization header"
                );
                None
            }
        }
    }

    fn kind(&self) -> &'static str {
        "oauth2 token source"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::test_support::spawn_server;
    use axum::{extract::State, http::StatusCode, routing::post, Form, Json, Router};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Clone)]
    struct TokenServer {
        hits: Arc<AtomicUsize>,
        expires_in: u64,
    }

    async fn issue_token(
        State(server): State<TokenServer>,
        Form(form): Form<HashMap<String, String>>,
    ) -> Result<Json<serde_json::Value>, StatusCode> {
        let hit = server.hits.fetch_add(1, Ordering::SeqCst) + 1;
        let grant = form.get("grant_type").cloned().unwrap_or_default();
        if form.get("client_secret").map(String::as_str) != Some("secret") {
            return Err(StatusCode::UNAUTHORIZED);
        }
        Ok(Json(serde_json::json!({
            "access_token": format!("{}-{}", grant, hit),
            "token_type": "Bearer",
            "expires_in": server.expires_in,
        })))
    }

    async fn start_token_server(expires_in: u64) -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route("/token", post(issue_token))
            .with_state(TokenServer {
                hits: hits.clone(),
                expires_in,
            });
        let addr = spawn_server(app).await;
        (format!("http://{}/token", addr), hits)
    }

    fn source(token_url: String, secret: &str, refresh_token: Option<&str>) -> OAuth2TokenSource {
        OAuth2TokenSource::new(
            reqwest::Client::new(),
            token_url,
            "client".to_string(),
            secret.to_string(),
            refresh_token.map(str::to_string),
            vec![],
        )
    }

    fn decode(value: &HeaderValue) -> String {
        use base64::Engine;
        let encoded = value.to_str().unwrap().strip_prefix("Basic ").unwrap();
        String::from_utf8(
            base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .unwrap(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_client_credentials_token_is_cached() {
        let (token_url, hits) = start_token_server(3600).await;
        let auth = source(token_url, "secret", None);

        let first = auth.authorization().await.unwrap();
        let second = auth.authorization().await.unwrap();

        assert_eq!(decode(&first), "oauth2accesstoken:client_credentials-1");
        assert_eq!(first, second);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refresh_token_grant() {
        let (token_url, _) = start_token_server(3600).await;
        let auth = source(token_url, "secret", Some("1//refresh"));

        let value = auth.authorization().await.unwrap();
        assert_eq!(decode(&value), "oauth2accesstoken:refresh_token-1");
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed() {
        // Lifetime shorter than the skew expires immediately
        let (token_url, hits) = start_token_server(30).await;
        let auth = source(token_url, "secret", None);

        auth.authorization().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let value = auth.authorization().await.unwrap();

        assert_eq!(decode(&value), "oauth2accesstoken:client_credentials-2");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let (token_url, hits) = start_token_server(3600).await;
        let auth = Arc::new(source(token_url, "secret", None));

        let mut handles = vec![];
        for _ in 0..8 {
            let auth = auth.clone();
            handles.push(tokio::spawn(async move { auth.authorization().await }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_some());
        }

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rejected_refresh_fails_open() {
        let (token_url, _) = start_token_server(3600).await;
        let auth = source(token_url, "wrong", None);

        assert!(auth.authorization().await.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_token_endpoint_fails_open() {
        let auth = source("http://127.0.0.1:1/token".to_string(), "secret", None);
        assert!(auth.authorization().await.is_none());
    }
}
