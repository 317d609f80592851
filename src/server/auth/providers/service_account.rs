use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::http::HeaderValue;
use std::path::Path;

use crate::server::auth::{basic_auth_value, Authenticator};

/// Username under which registries accept a raw JSON service-account key
const JSON_KEY_USERNAME: &str = "_json_key";

/// Authenticator backed by a service-account key file.
///
/// The file is read once; the basic-auth value derived from it never changes
/// for the lifetime of the process.
pub struct ServiceAccountKeyAuthenticator {
    value: HeaderValue,
}

impl ServiceAccountKeyAuthenticator {
    pub fn from_key_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let key = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read key file from {}", path.display()))?;

        tracing::info!("Using service account key from {}", path.display());
        Self::from_key(&key)
    }

    pub fn from_key(key: &str) -> Result<Self> {
        let value = basic_auth_value(JSON_KEY_USERNAME, key)
            .context("Service account key cannot be encoded as a header value")?;
        Ok(Self { value })
    }
}

#[async_trait]
impl Authenticator for ServiceAccountKeyAuthenticator {
    async fn authorization(&self) -> Option<HeaderValue> {
        Some(self.value.clone())
    }

    fn kind(&self) -> &'static str {
        "service account key"
    }
}
