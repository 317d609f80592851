use crate::server::auth::{self, OptionalAuthenticator};
use crate::server::registry::RegistryConfig;
use crate::server::settings::Settings;
use crate::server::token::discover_token_endpoint;
use anyhow::{Context, Result};
use std::sync::Arc;
use url::Url;

/// Full state for HTTP server.
///
/// Everything here is fixed once the server starts; handlers only read it.
#[derive(Clone)]
pub struct AppState {
    /// Shared client for all outbound calls. Never follows redirects.
    pub http_client: reqwest::Client,
    pub registry: Arc<RegistryConfig>,
    pub storage_host: Arc<str>,
    pub authenticator: OptionalAuthenticator,
    /// Discovered token endpoint; `None` when the backend issues no challenge
    pub token_endpoint: Option<Arc<Url>>,
    pub reject_head_requests: bool,
    /// Scheme used for every outbound request
    pub upstream_scheme: &'static str,
}

/// Build the outbound HTTP client
pub fn build_http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .context("Failed to build HTTP client")
}

impl AppState {
    /// Create state for the HTTP server.
    ///
    /// Runs token-endpoint discovery against the backend; a failed discovery
    /// aborts startup.
    pub async fn new_for_server(settings: &Settings) -> Result<Self> {
        let http_client = build_http_client()?;

        let registry = RegistryConfig::new(
            settings.registry.host.clone(),
            settings.registry.repo_prefix.clone(),
        )?;

        let authenticator = auth::from_settings(settings.auth.as_ref(), http_client.clone())
            .context("Failed to initialize backend credentials")?;

        let probe_url = format!("https://{}/v2/", registry.host);
        tracing::info!("Discovering token endpoint via {}", probe_url);
        let token_endpoint = discover_token_endpoint(&http_client, &probe_url)
            .await
            .context("Token endpoint discovery failed")?;

        Ok(Self {
            http_client,
            registry: Arc::new(registry),
            storage_host: Arc::from(settings.registry.storage_host.as_str()),
            authenticator,
            token_endpoint: token_endpoint.map(Arc::new),
            reject_head_requests: settings.server.reject_head_requests,
            upstream_scheme: "https",
        })
    }
}
