pub mod handlers;
pub mod rewrite;
pub mod routes;

use anyhow::{bail, Result};

/// Backend registry coordinates, fixed at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Backend registry host, e.g. "gcr.io"
    pub host: String,
    /// Namespace injected after `/v2/` on every forwarded path
    pub repo_prefix: String,
}

impl RegistryConfig {
    pub fn new(host: impl Into<String>, repo_prefix: impl Into<String>) -> Result<Self> {
        let host = host.into();
        let repo_prefix = repo_prefix.into().trim_matches('/').to_string();

        if host.is_empty() {
            bail!("Registry host must not be empty");
        }
        if repo_prefix.is_empty() {
            bail!("Repository prefix must not be empty");
        }

        Ok(Self { host, repo_prefix })
    }
}
