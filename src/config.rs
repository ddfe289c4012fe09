//! Configuration management for Proxygate.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::error::{GatewayError, Result};

/// Prefix of environment variables that override file configuration.
const ENV_PREFIX: &str = "PROXYGATE";
/// Separator between nested keys in environment variable names.
const ENV_SEPARATOR: &str = "__";

/// Main configuration for the Proxygate service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Application metadata
    #[serde(default)]
    pub app: AppConfig,

    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// CORS configuration
    #[serde(default)]
    pub cors: CorsConfig,

    /// Rate limiter configuration
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Upstream services
    #[serde(default = "default_services")]
    pub services: Vec<ServiceConfig>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            app: AppConfig::default(),
            server: ServerConfig::default(),
            cors: CorsConfig::default(),
            limiter: LimiterConfig::default(),
            services: default_services(),
        }
    }
}

/// Application metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Display name
    #[serde(default = "default_app_name")]
    pub name: String,

    /// Reported version
    #[serde(default = "default_app_version")]
    pub version: String,

    /// Verbose diagnostics
    #[serde(default)]
    pub debug: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            version: default_app_version(),
            debug: false,
        }
    }
}

fn default_app_name() -> String {
    "SWAPI Proxy".to_string()
}

fn default_app_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8000))
}

/// CORS configuration. A `*` entry allows anything.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    #[serde(default)]
    pub allowed_origins: Vec<String>,

    #[serde(default = "wildcard")]
    pub allowed_methods: Vec<String>,

    #[serde(default = "wildcard")]
    pub allowed_headers: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            allowed_methods: wildcard(),
            allowed_headers: wildcard(),
        }
    }
}

fn wildcard() -> Vec<String> {
    vec!["*".to_string()]
}

/// How a counter's expiry reacts to further increments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpiryPolicy {
    /// Expiry is anchored at the first increment of a window
    #[default]
    Fixed,
    /// Every increment pushes the expiry out by the full period
    Sliding,
}

/// Rate limiter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Counter store DSN; the scheme selects the backend (`mem://`, `redis://`, `rediss://`)
    #[serde(default = "default_backend_dsn")]
    pub backend_dsn: String,

    /// Counter expiry policy, applied by every backend
    #[serde(default)]
    pub expiry: ExpiryPolicy,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            backend_dsn: default_backend_dsn(),
            expiry: ExpiryPolicy::default(),
        }
    }
}

fn default_backend_dsn() -> String {
    "mem://".to_string()
}

/// A named upstream backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Unique service name, used as the first path segment
    pub name: String,

    /// Base URL requests are forwarded to
    pub host: String,

    /// Upstream request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: f64,

    /// Requests allowed per client within one period
    #[serde(default = "default_rate_limit")]
    pub rate_limit: u64,

    /// Rate limit period in seconds (0 disables expiry)
    #[serde(default = "default_rate_limit_period")]
    pub rate_limit_period: u64,

    /// Simultaneous in-flight upstream requests
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
}

impl ServiceConfig {
    /// Create a service with default limits.
    pub fn new(name: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            timeout: default_timeout(),
            rate_limit: default_rate_limit(),
            rate_limit_period: default_rate_limit_period(),
            max_concurrent_requests: default_max_concurrent_requests(),
        }
    }

    /// Upstream timeout as a duration.
    ///
    /// Values `validate` would reject saturate to `Duration::MAX`.
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout).unwrap_or(Duration::MAX)
    }

    /// Rate limit window, `None` when counters never expire.
    pub fn rate_limit_period(&self) -> Option<Duration> {
        (self.rate_limit_period > 0).then(|| Duration::from_secs(self.rate_limit_period))
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.name.contains('/') {
            return Err(GatewayError::Config(format!(
                "invalid service name `{}`",
                self.name
            )));
        }

        let url = reqwest::Url::parse(&self.host).map_err(|e| {
            GatewayError::Config(format!("service `{}` has invalid host: {}", self.name, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(GatewayError::Config(format!(
                "service `{}` host must be an http(s) URL",
                self.name
            )));
        }

        if !self.timeout.is_finite() || self.timeout <= 0.0 {
            return Err(GatewayError::Config(format!(
                "service `{}` timeout must be positive",
                self.name
            )));
        }
        if Duration::try_from_secs_f64(self.timeout).is_err() {
            return Err(GatewayError::Config(format!(
                "service `{}` timeout is out of range",
                self.name
            )));
        }

        if self.max_concurrent_requests == 0 {
            return Err(GatewayError::Config(format!(
                "service `{}` must allow at least one concurrent request",
                self.name
            )));
        }

        Ok(())
    }
}

fn default_services() -> Vec<ServiceConfig> {
    vec![ServiceConfig::new("swapi", "https://swapi.dev/api")]
}

fn default_timeout() -> f64 {
    5.0
}

fn default_rate_limit() -> u64 {
    100
}

fn default_rate_limit_period() -> u64 {
    3600
}

fn default_max_concurrent_requests() -> usize {
    10
}

impl GatewayConfig {
    /// Load configuration from an optional YAML file, then apply
    /// `PROXYGATE_*` environment overrides (`__` separates nested keys).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(config::File::from(path).format(config::FileFormat::Yaml));
        }

        let config: GatewayConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| GatewayError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: GatewayConfig = serde_yaml::from_str(yaml)
            .map_err(|e| GatewayError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants the rest of the service relies on.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for service in &self.services {
            service.validate()?;
            if !seen.insert(service.name.as_str()) {
                return Err(GatewayError::Config(format!(
                    "duplicate service name `{}`",
                    service.name
                )));
            }
        }
        Ok(())
    }
}

/// Read-only lookup of configured services by name.
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    services: HashMap<String, Arc<ServiceConfig>>,
}

impl ServiceRegistry {
    /// Build a registry, rejecting duplicate names.
    pub fn new(services: impl IntoIterator<Item = ServiceConfig>) -> Result<Self> {
        let mut map = HashMap::new();
        for service in services {
            let name = service.name.clone();
            if map.insert(name.clone(), Arc::new(service)).is_some() {
                return Err(GatewayError::Config(format!(
                    "duplicate service name `{}`",
                    name
                )));
            }
        }
        Ok(Self { services: map })
    }

    /// Look up a service by name.
    pub fn get(&self, name: &str) -> Option<Arc<ServiceConfig>> {
        self.services.get(name).cloned()
    }

    /// Names of all registered services.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}
