//! Configuration loading.
//!
//! Every section has working defaults, so a missing or partial
//! `config.toml` still yields a runnable setup pointed at the real
//! platform endpoints.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use url::Url;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub viewers: ViewersConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Upstream platform endpoints.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Channel page base, used for resolution by name.
    pub site_url: String,
    /// Token issuance endpoint.
    pub token_url: String,
    /// WebSocket connect endpoint; the session token is appended as a
    /// query parameter.
    pub connect_url: String,
    /// Viewer-count read endpoint.
    pub viewers_url: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            site_url: "https://kick.com".into(),
            token_url: "https://websockets.kick.com/viewer/v1/token".into(),
            connect_url: "wss://websockets.kick.com/viewer/v1/connect".into(),
            viewers_url: "https://kick.com/current-viewers".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Address the coordinator listens on for worker links.
    pub listen_addr: String,
    /// URL workers dial to reach the coordinator.
    pub url: String,
    /// Channel the pool presents on until resolution overrides it.
    pub default_channel_id: String,
    /// How long a stat collection round waits for worker reports.
    pub stat_timeout_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:9300".into(),
            url: "ws://127.0.0.1:9300".into(),
            default_channel_id: "15108912".into(),
            stat_timeout_ms: 4_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Global target session count, divided across attached workers.
    pub pool_limit: u32,
    /// Acquisitions issued per backfill cycle.
    pub batch_size: usize,
    pub backfill_interval_ms: u64,
    pub reassert_interval_ms: u64,
    pub ping_interval_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_limit: 8_000,
            batch_size: 50,
            backfill_interval_ms: 23_000,
            reassert_interval_ms: 15_000,
            ping_interval_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ViewersConfig {
    /// Poll cadence while the metric is fresh.
    pub fast_poll_ms: u64,
    /// Poll cadence once the metric has stabilized.
    pub slow_poll_ms: u64,
    /// Parse-failure retries before a poll gives up.
    pub retry_budget: u32,
    /// Jitter window for the retry delay, avoids synchronized retry
    /// storms against the upstream endpoint.
    pub retry_jitter_min_ms: u64,
    pub retry_jitter_max_ms: u64,
}

impl Default for ViewersConfig {
    fn default() -> Self {
        Self {
            fast_poll_ms: 1_000,
            slow_poll_ms: 64_000,
            retry_budget: 3,
            retry_jitter_min_ms: 900,
            retry_jitter_max_ms: 1_200,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("network.site_url", &self.network.site_url),
            ("network.token_url", &self.network.token_url),
            ("network.connect_url", &self.network.connect_url),
            ("network.viewers_url", &self.network.viewers_url),
            ("coordinator.url", &self.coordinator.url),
        ] {
            Url::parse(value).map_err(|e| ConfigError::InvalidValue {
                field,
                reason: e.to_string(),
            })?;
        }

        if self.pool.pool_limit == 0 {
            return Err(ConfigError::InvalidValue {
                field: "pool.pool_limit",
                reason: "must be greater than zero".into(),
            }
            .into());
        }
        if self.pool.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "pool.batch_size",
                reason: "must be greater than zero".into(),
            }
            .into());
        }
        if self.viewers.retry_jitter_min_ms > self.viewers.retry_jitter_max_ms {
            return Err(ConfigError::InvalidValue {
                field: "viewers.retry_jitter_min_ms",
                reason: "must not exceed retry_jitter_max_ms".into(),
            }
            .into());
        }
        Ok(())
    }

    pub fn stat_timeout(&self) -> Duration {
        Duration::from_millis(self.coordinator.stat_timeout_ms)
    }

    /// Install the global tracing subscriber.
    pub fn init_logging(&self) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&self.logging.level));
        let builder = tracing_subscriber::fmt().with_env_filter(filter);
        if self.logging.format == "json" {
            builder.json().init();
        } else {
            builder.init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pool.pool_limit, 8_000);
        assert_eq!(config.pool.batch_size, 50);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "[pool]\npool_limit = 16\n\n[logging]\nlevel = \"debug\"\n"
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.pool.pool_limit, 16);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.pool.batch_size, 50);
        assert_eq!(config.coordinator.stat_timeout_ms, 4_000);
    }

    #[test]
    fn rejects_zero_pool_limit() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[pool]\npool_limit = 0\n").unwrap();
        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn rejects_invalid_url() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[network]\ntoken_url = \"not a url\"\n").unwrap();
        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = Config::load_or_default("/nonexistent/viewpool.toml").unwrap();
        assert_eq!(config.pool.pool_limit, 8_000);
    }
}
