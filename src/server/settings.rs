use config::{Config, ConfigError};
use serde::Deserialize;
use std::env;

/// Prefix for structured environment overrides, e.g. `REGISTRY_PROXY_REGISTRY__HOST`
const ENV_PREFIX: &str = "REGISTRY_PROXY";

/// Variables that steer where settings are loaded from. They share the prefix
/// but are not settings themselves.
const LOADER_VARS: [&str; 2] = ["REGISTRY_PROXY_CONFIG_DIR", "REGISTRY_PROXY_CONFIG_RUN_MODE"];

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub registry: RegistrySettings,
    #[serde(default)]
    pub auth: Option<AuthSettings>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    /// Listen port. Mandatory; also read from the conventional `PORT` variable.
    #[serde(default)]
    pub port: Option<u16>,

    /// Redirect unmatched browser requests to the backend's web UI
    #[serde(default = "default_browser_redirects")]
    pub browser_redirects: bool,

    /// Answer `HEAD` on proxied registry paths locally with an error
    /// instead of forwarding them
    #[serde(default)]
    pub reject_head_requests: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_browser_redirects() -> bool {
    true
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: None,
            browser_redirects: default_browser_redirects(),
            reject_head_requests: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RegistrySettings {
    /// Backend registry host (e.g., "gcr.io", "europe-docker.pkg.dev")
    #[serde(default)]
    pub host: String,

    /// Namespace injected between `/v2/` and the client's repository path
    #[serde(default)]
    pub repo_prefix: String,

    /// Object-storage origin that serves blob redirects
    #[serde(default = "default_storage_host")]
    pub storage_host: String,
}

fn default_storage_host() -> String {
    "storage.googleapis.com".to_string()
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            host: String::new(),
            repo_prefix: String::new(),
            storage_host: default_storage_host(),
        }
    }
}

/// Credential attached to requests forwarded to the backend registry
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AuthSettings {
    /// Fixed `Authorization` header value
    Static { header: String },
    /// JSON service-account key, sent as basic auth with the `_json_key` user
    ServiceAccountKey { key_file: String },
    /// OAuth2 token endpoint, refreshed lazily
    #[serde(rename = "oauth2")]
    OAuth2 {
        token_url: String,
        client_id: String,
        client_secret: String,
        #[serde(default)]
        refresh_token: Option<String>,
        #[serde(default)]
        scopes: Vec<String>,
    },
}

impl Settings {
    /// Substitute environment variables in a string value
    /// Replaces ${VAR_NAME} or ${VAR_NAME:-default} with environment variable values
    fn substitute_env_vars_in_string(s: &str) -> String {
        let re = regex::Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}")
            .expect("placeholder pattern is valid");

        re.replace_all(s, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default_value = caps.get(2).map(|m| m.as_str());

            match env::var(var_name) {
                Ok(val) => val,
                Err(_) => default_value.unwrap_or("").to_string(),
            }
        })
        .to_string()
    }

    /// Convert a config::Value to a serde_json::Value, performing environment variable substitution
    fn config_value_to_json(value: &config::Value) -> serde_json::Value {
        use config::ValueKind;

        match &value.kind {
            ValueKind::Nil => serde_json::Value::Null,
            ValueKind::Boolean(b) => serde_json::Value::Bool(*b),
            ValueKind::I64(i) => serde_json::Value::Number((*i).into()),
            ValueKind::I128(i) => serde_json::Value::Number((*i as i64).into()),
            ValueKind::U64(u) => serde_json::Value::Number((*u).into()),
            ValueKind::U128(u) => serde_json::Value::Number((*u as u64).into()),
            ValueKind::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            ValueKind::String(s) => {
                serde_json::Value::String(Self::substitute_env_vars_in_string(s))
            }
            ValueKind::Table(table) => {
                let mut map = serde_json::Map::new();
                for (k, v) in table.iter() {
                    map.insert(k.clone(), Self::config_value_to_json(v));
                }
                serde_json::Value::Object(map)
            }
            ValueKind::Array(arr) => {
                let vec: Vec<serde_json::Value> =
                    arr.iter().map(Self::config_value_to_json).collect();
                serde_json::Value::Array(vec)
            }
        }
    }

    /// Try to add a config file with multiple extension attempts (.toml, .yaml, .yml)
    /// Returns true if a file was loaded
    fn try_add_config_file(
        builder: &mut config::ConfigBuilder<config::builder::DefaultState>,
        config_dir: &str,
        name: &str,
    ) -> bool {
        let extensions = ["toml", "yaml", "yml"];

        for ext in extensions {
            let path = format!("{}/{}.{}", config_dir, name, ext);
            if std::path::Path::new(&path).exists() {
                tracing::info!("Loading config file: {}", path);
                *builder = builder
                    .clone()
                    .add_source(config::File::with_name(&format!("{}/{}", config_dir, name)));
                return true;
            }
        }

        tracing::debug!(
            "Optional config file not found: {}/{}.{{toml,yaml,yml}}",
            config_dir,
            name
        );
        false
    }

    /// Environment source for `REGISTRY_PROXY_<SECTION>__<KEY>` overrides,
    /// leaving out the loader's own variables
    fn environment_source(vars: impl IntoIterator<Item = (String, String)>) -> config::Environment {
        let vars: config::Map<String, String> = vars
            .into_iter()
            .filter(|(key, _)| !LOADER_VARS.contains(&key.as_str()))
            .collect();

        config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .source(Some(vars))
    }

    /// Load settings from config files and the environment, then validate them.
    ///
    /// All config files are optional: a deployment configured purely through
    /// environment variables is the common case.
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode =
            env::var("REGISTRY_PROXY_CONFIG_RUN_MODE").unwrap_or_else(|_| "production".into());
        let config_dir = env::var("REGISTRY_PROXY_CONFIG_DIR").unwrap_or_else(|_| "config".into());

        let mut builder = Config::builder();

        let mut loaded = 0;
        for name in ["default", run_mode.as_str(), "local"] {
            if Self::try_add_config_file(&mut builder, &config_dir, name) {
                loaded += 1;
            }
        }
        if loaded == 0 {
            tracing::info!(
                "No config files found in {}, using environment variables only",
                config_dir
            );
        }

        let builder = builder.add_source(Self::environment_source(env::vars()));

        let config = builder.build()?;

        let root_value = config
            .cache
            .into_table()
            .map_err(|e| ConfigError::Message(format!("Failed to get config table: {}", e)))?;

        let mut json_map = serde_json::Map::new();
        for (k, v) in root_value.iter() {
            json_map.insert(k.clone(), Self::config_value_to_json(v));
        }

        let mut settings = Self::from_json(serde_json::Value::Object(json_map))?;
        settings.apply_conventional_env(|key| env::var(key).ok());
        settings.validate()?;
        Ok(settings)
    }

    /// Deserialize from a JSON value, warning about unknown fields
    fn from_json(value: serde_json::Value) -> Result<Self, ConfigError> {
        let mut unused_fields = Vec::new();
        let settings: Settings = serde_ignored::deserialize(value, |path| {
            unused_fields.push(path.to_string());
        })
        .map_err(|e| ConfigError::Message(format!("Failed to deserialize settings: {}", e)))?;

        for field in &unused_fields {
            tracing::warn!("Unknown configuration field in proxy config: {}", field);
        }

        Ok(settings)
    }

    /// Apply the conventional unprefixed variables (`PORT`, `REGISTRY_HOST`, ...).
    ///
    /// These take precedence over config files and prefixed variables, matching
    /// how hosting platforms inject `PORT`.
    fn apply_conventional_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(port) = non_empty("PORT") {
            match port.parse::<u16>() {
                Ok(port) => self.server.port = Some(port),
                Err(_) => tracing::warn!("Ignoring invalid PORT value: {}", port),
            }
        }
        if non_empty("DISABLE_BROWSER_REDIRECTS").is_some() {
            self.server.browser_redirects = false;
        }
        if let Some(host) = non_empty("REGISTRY_HOST") {
            self.registry.host = host;
        }
        if let Some(prefix) = non_empty("REPO_PREFIX") {
            self.registry.repo_prefix = prefix;
        }
        if self.auth.is_none() {
            if let Some(header) = non_empty("AUTH_HEADER") {
                self.auth = Some(AuthSettings::Static { header });
            } else if let Some(key_file) = non_empty("GOOGLE_APPLICATION_CREDENTIALS") {
                self.auth = Some(AuthSettings::ServiceAccountKey { key_file });
            }
        }
    }

    /// Check mandatory values and normalize the repository prefix
    fn validate(&mut self) -> Result<(), ConfigError> {
        if self.server.port.is_none() {
            return Err(ConfigError::Message(
                "Listen port not configured. Set PORT or REGISTRY_PROXY_SERVER__PORT environment variable or [server] port in config".to_string(),
            ));
        }

        self.registry.host = self.registry.host.trim().to_string();
        if self.registry.host.is_empty() {
            return Err(ConfigError::Message(
                "Registry host not configured. Set REGISTRY_HOST or REGISTRY_PROXY_REGISTRY__HOST environment variable or [registry] host in config".to_string(),
            ));
        }

        self.registry.repo_prefix = self.registry.repo_prefix.trim().trim_matches('/').to_string();
        if self.registry.repo_prefix.is_empty() {
            return Err(ConfigError::Message(
                "Repository prefix not configured. Set REPO_PREFIX or REGISTRY_PROXY_REGISTRY__REPO_PREFIX environment variable or [registry] repo_prefix in config".to_string(),
            ));
        }

        if self.registry.storage_host.trim().is_empty() {
            return Err(ConfigError::Message(
                "[registry] storage_host must not be empty".to_string(),
            ));
        }

        match &self.auth {
            Some(AuthSettings::Static { header }) if header.is_empty() => {
                return Err(ConfigError::Message(
                    "[auth] header must not be empty for static authentication".to_string(),
                ));
            }
            Some(AuthSettings::ServiceAccountKey { key_file }) if key_file.is_empty() => {
                return Err(ConfigError::Message(
                    "[auth] key_file must not be empty for service-account-key authentication"
                        .to_string(),
                ));
            }
            Some(AuthSettings::OAuth2 { token_url, .. }) if token_url.is_empty() => {
                return Err(ConfigError::Message(
                    "[auth] token_url must not be empty for oauth2 authentication".to_string(),
                ));
            }
            _ => {}
        }

        Ok(())
    }

    /// Listen address as `host:port`. Only valid after validation.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port.unwrap_or_default())
    }
}
