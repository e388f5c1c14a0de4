use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming an optional JSON config file.
pub const CONFIG_ENV: &str = "TRANSPORT_METRICS_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Completed transactions retained for percentile math
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Bounded event queue between producers and the bus
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// How often the server logs a report
    #[serde(default = "default_report_interval_ms")]
    pub report_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// `tracing` filter used when RUST_LOG is unset
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_cache_capacity() -> usize {
    4096
}
fn default_queue_capacity() -> usize {
    1024
}
fn default_report_interval_ms() -> u64 {
    10_000
}
fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 3000))
}
fn default_log_filter() -> String {
    "info".into()
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            cache_capacity: default_cache_capacity(),
            queue_capacity: default_queue_capacity(),
            report_interval_ms: default_report_interval_ms(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            log_filter: default_log_filter(),
        }
    }
}

impl MetricsConfig {
    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms)
    }
}

impl Config {
    /// Load from the file named by [`CONFIG_ENV`], or fall back to defaults.
    pub fn load() -> Result<Self, ConfigError> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) if !path.is_empty() => Self::from_file(path),
            _ => Ok(Self::default()),
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.metrics.cache_capacity == 0 {
            return Err(ConfigError::Invalid(
                "metrics.cache_capacity must be at least 1".into(),
            ));
        }
        if self.metrics.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "metrics.queue_capacity must be at least 1".into(),
            ));
        }
        if self.metrics.report_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "metrics.report_interval_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::from_json("{}").unwrap();
        assert_eq!(config.metrics.cache_capacity, 4096);
        assert_eq!(config.metrics.queue_capacity, 1024);
        assert_eq!(config.metrics.report_interval(), Duration::from_secs(10));
        assert_eq!(config.server.listen_addr.port(), 3000);
        assert_eq!(config.server.log_filter, "info");
    }

    #[test]
    fn test_partial_override() {
        let config = Config::from_json(
            r#"{ "metrics": { "cache_capacity": 16 }, "server": { "listen_addr": "127.0.0.1:9000" } }"#,
        )
        .unwrap();
        assert_eq!(config.metrics.cache_capacity, 16);
        assert_eq!(config.metrics.queue_capacity, 1024);
        assert_eq!(config.server.listen_addr.port(), 9000);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let result = Config::from_json(r#"{ "metrics": { "cache_capacity": 0 } }"#);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            Config::from_json("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            Config::from_file("/definitely/not/here.json"),
            Err(ConfigError::Read { .. })
        ));
    }
}
