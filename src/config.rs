//! Configuration types for the gateway.
//!
//! Config is loaded once at startup from a TOML file and validated before the
//! server opens any ports. Invalid configs are rejected with a clear error
//! rather than silently falling back to defaults.
//!
//! # Example
//! ```toml
//! [gateway]
//! bind_addr = "0.0.0.0:8080"
//! cache_refresh_secs = 30
//!
//! [store]
//! database_path = "gateway.db"
//!
//! [rate_limit]
//! redis_url = "redis://127.0.0.1:6379"
//!
//! [access_log]
//! brokers = "localhost:9092"
//! topic = "gateway-access-log"
//! ```

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Top-level gateway configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub store: StoreConfig,
    pub rate_limit: RateLimitConfig,
    pub access_log: AccessLogConfig,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let config: Self = toml::from_str(&content).context("parsing config TOML")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.gateway.cache_refresh_secs > 0,
            "gateway.cache_refresh_secs must be greater than zero"
        );
        anyhow::ensure!(
            !self.store.database_path.as_os_str().is_empty(),
            "store.database_path must not be empty"
        );
        anyhow::ensure!(
            !self.rate_limit.redis_url.is_empty(),
            "rate_limit.redis_url must not be empty"
        );
        anyhow::ensure!(
            !self.access_log.brokers.is_empty(),
            "access_log.brokers must not be empty"
        );
        anyhow::ensure!(
            !self.access_log.topic.is_empty(),
            "access_log.topic must not be empty"
        );
        Ok(())
    }
}

/// Core gateway settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    /// Address the single listener binds to (default: `0.0.0.0:8080`).
    #[serde(default = "defaults::bind_addr")]
    pub bind_addr: String,

    /// How often the route cache refreshes on its own, in seconds, measured
    /// from the end of one refresh to the start of the next (default: 30).
    #[serde(default = "defaults::cache_refresh_secs")]
    pub cache_refresh_secs: u64,

    /// Request timeout for outbound dispatch to downstream services, in
    /// milliseconds (default: 30 000). A timeout here maps to `502`.
    #[serde(default = "defaults::dispatch_timeout_ms")]
    pub dispatch_timeout_ms: u64,

    /// Environment variable whose value is the Bearer token required for all
    /// admin (`/routes*`) requests. Leave unset to disable admin
    /// authentication (only recommended when the listener is strictly
    /// firewalled to trusted operators).
    #[serde(default)]
    pub admin_token_env: Option<String>,

    /// `tracing-subscriber` filter directive, e.g. `"gatewayd=debug,tower_http=info"`.
    /// Used only when `RUST_LOG` is unset; `RUST_LOG` always takes precedence.
    #[serde(default)]
    pub log_level: Option<String>,
}

/// Route Store connection settings (SQLite).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    /// Path to the SQLite database file. Created if it does not exist.
    pub database_path: std::path::PathBuf,
}

/// Rate Limiter connection settings (Redis).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Redis connection URL, e.g. `redis://127.0.0.1:6379`.
    pub redis_url: String,

    /// Timeout for individual Redis commands, in milliseconds (default: 50).
    /// Exceeding this is treated as a store error — the rate limiter fails
    /// open rather than blocking the request pipeline.
    #[serde(default = "defaults::redis_timeout_ms")]
    pub redis_timeout_ms: u64,
}

/// Access Log Publisher settings (Kafka).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccessLogConfig {
    /// Comma-separated `host:port` bootstrap brokers.
    pub brokers: String,

    /// Topic every `AccessLogEvent` is published to.
    pub topic: String,

    /// Consumer group id used by the dashboard's own consumer task.
    #[serde(default = "defaults::consumer_group")]
    pub consumer_group: String,
}

mod defaults {
    pub fn bind_addr() -> String {
        "0.0.0.0:8080".to_string()
    }
    pub fn cache_refresh_secs() -> u64 {
        30
    }
    pub fn dispatch_timeout_ms() -> u64 {
        30_000
    }
    pub fn redis_timeout_ms() -> u64 {
        50
    }
    pub fn consumer_group() -> String {
        "gateway-dashboard".to_string()
    }
}
