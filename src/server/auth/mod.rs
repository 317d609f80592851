pub mod providers;

use crate::server::settings::AuthSettings;
use anyhow::Result;
use async_trait::async_trait;
use axum::http::HeaderValue;
use std::sync::Arc;

pub use providers::{OAuth2TokenSource, ServiceAccountKeyAuthenticator, StaticHeaderAuthenticator};

/// Source of the `Authorization` header attached to backend registry requests.
///
/// Implementations decide how the credential is produced (fixed value, key
/// file, refreshing token) so that call sites never branch on the strategy.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Get the current credential.
    ///
    /// Returns `None` when no credential is available right now, in which case
    /// the request is forwarded without an `Authorization` header. Refresh
    /// failures are reported this way rather than as errors.
    async fn authorization(&self) -> Option<HeaderValue>;

    /// Short label of the strategy, for logs
    fn kind(&self) -> &'static str;
}

/// Optional authenticator shared across requests
pub type OptionalAuthenticator = Option<Arc<dyn Authenticator>>;

/// Build the configured authenticator.
///
/// Key files are read here, once, so an unreadable file aborts startup.
pub fn from_settings(
    settings: Option<&AuthSettings>,
    http_client: reqwest::Client,
) -> Result<OptionalAuthenticator> {
    let authenticator: Arc<dyn Authenticator> = match settings {
        None => {
            tracing::info!(
                "No backend credentials configured - proxied requests are sent unauthenticated"
            );
            return Ok(None);
        }
        Some(AuthSettings::Static { header }) => {
            Arc::new(StaticHeaderAuthenticator::new(header)?)
        }
        Some(AuthSettings::ServiceAccountKey { key_file }) => {
            Arc::new(ServiceAccountKeyAuthenticator::from_key_file(key_file)?)
        }
        Some(AuthSettings::OAuth2 {
            token_url,
            client_id,
            client_secret,
            refresh_token,
            scopes,
        }) => Arc::new(OAuth2TokenSource::new(
            http_client,
            token_url.clone(),
            client_id.clone(),
            client_secret.clone(),
            refresh_token.clone(),
            scopes.clone(),
        )),
    };

    tracing::info!(
        "Using {} credentials to authenticate proxied requests",
        authenticator.kind()
    );
    Ok(Some(authenticator))
}

/// Encode a basic-auth header value for `username:password`
pub(crate) fn basic_auth_value(username: &str, password: &str) -> Result<HeaderValue> {
    use base64::Engine;

    let encoded =
        base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", username, password));
    let mut value = HeaderValue::from_str(&format!("Basic {}", encoded))?;
    value.set_sensitive(true);
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_auth_value() {
        let value = basic_auth_value("_json_key", "{}").unwrap();
        assert_eq!(value.to_str().unwrap(), "Basic X2pzb25fa2V5Ont9");
        assert!(value.is_sensitive());
    }

    #[tokio::test]
    async fn test_no_settings_yields_no_authenticator() {
        let authenticator = from_settings(None, reqwest::Client::new()).unwrap();
        assert!(authenticator.is_none());
    }

    #[tokio::test]
    async fn test_static_settings() {
        let settings = AuthSettings::Static {
            header: "Bearer token-123".to_string(),
        };
        let authenticator = from_settings(Some(&settings), reqwest::Client::new())
            .unwrap()
            .unwrap();

        assert_eq!(authenticator.kind(), "static header");
        assert_eq!(
            authenticator.authorization().await.unwrap(),
            "Bearer token-123"
        );
    }

    #[test]
    fn test_missing_key_file_is_an_error() {
        let settings = AuthSettings::ServiceAccountKey {
            key_file: "/definitely/not/here.json".to_string(),
        };
        assert!(from_settings(Some(&settings), reqwest::Client::new()).is_err());
    }
}
