use http::Uri;
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

use crate::dispatch::DispatchLimits;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("at least one backend must be configured")]
    NoBackends,

    #[error("invalid backend url {url:?}: {reason}")]
    InvalidBackendUrl { url: String, reason: String },

    #[error("health check {0} must be greater than zero")]
    InvalidHealthCheck(&'static str),
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub backends: Vec<BackendConfig>,
    #[serde(default)]
    pub health_check: HealthCheckConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HealthCheckConfig {
    pub check_interval_seconds: u64,
    pub check_timeout_seconds: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            check_interval_seconds: 20,
            check_timeout_seconds: 2,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DispatchConfig {
    pub retry_limit: u32,
    pub attempt_limit: u32,
    pub retry_backoff_micros: u64,
    pub forward_timeout_seconds: u64,
    pub max_request_body_bytes: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            retry_limit: 3,
            attempt_limit: 3,
            retry_backoff_micros: 10,
            forward_timeout_seconds: 30,
            max_request_body_bytes: 8 * 1024 * 1024,
        }
    }
}

impl DispatchConfig {
    pub fn limits(&self) -> DispatchLimits {
        DispatchLimits {
            retry_limit: self.retry_limit,
            attempt_limit: self.attempt_limit,
            backoff: Duration::from_micros(self.retry_backoff_micros),
        }
    }

    pub fn forward_timeout(&self) -> Duration {
        Duration::from_secs(self.forward_timeout_seconds)
    }
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.backends.is_empty() {
            return Err(ConfigError::NoBackends);
        }
        for backend in &self.backends {
            backend.uri()?;
        }
        if self.health_check.check_interval_seconds == 0 {
            return Err(ConfigError::InvalidHealthCheck("interval"));
        }
        if self.health_check.check_timeout_seconds == 0 {
            return Err(ConfigError::InvalidHealthCheck("timeout"));
        }
        Ok(())
    }
}

impl BackendConfig {
    /// Parses the base URL, accepting only absolute `http://host[:port][/base]` targets.
    pub fn uri(&self) -> Result<Uri, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidBackendUrl {
            url: self.url.clone(),
            reason: reason.to_string(),
        };

        let uri: Uri = self.url.parse().map_err(|e: http::uri::InvalidUri| invalid(&e.to_string()))?;
        match uri.scheme_str() {
            Some("http") => {}
            Some(other) => return Err(invalid(&format!("unsupported scheme {other}"))),
            None => return Err(invalid("missing scheme")),
        }
        if uri.authority().is_none() {
            return Err(invalid("missing host"));
        }
        if uri.query().is_some() {
            return Err(invalid("query strings are not allowed in a backend url"));
        }
        Ok(uri)
    }
}
