use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::http::HeaderValue;

use crate::server::auth::Authenticator;

/// Authenticator that always returns the same, operator-supplied header value
pub struct StaticHeaderAuthenticator {
    value: HeaderValue,
}

impl StaticHeaderAuthenticator {
    pub fn new(header: &str) -> Result<Self> {
        let mut value = HeaderValue::from_str(header)
            .context("Static auth header is not a valid HTTP header value")?;
        value.set_sensitive(true);
        Ok(Self { value })
    }
}

#[async_trait]
impl Authenticator for StaticHeaderAuthenticator {
    async fn authorization(&self) -> Option<HeaderValue> {
        Some(self.value.clone())
    }

    fn kind(&self) -> &'static str {
        "static header"
    }
}
