// src/config/app.rs

use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Clone, PartialEq, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Upper bound for handling one HTTP request
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub test_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            test_mode: false,
        }
    }
}

/// Tunables of the credential pool engine.
#[derive(Debug, Deserialize, Clone, PartialEq, Serialize)]
pub struct PoolConfig {
    /// How long a drawn backup stays in the reserve before the reaper deletes it
    #[serde(default = "default_backup_retention_hours")]
    pub backup_retention_hours: u64,
    #[serde(default = "default_reaper_interval")]
    pub reaper_interval_secs: u64,
    /// Failover hops a single inbound request may take
    #[serde(default = "default_max_failover_hops")]
    pub max_failover_hops: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            backup_retention_hours: default_backup_retention_hours(),
            reaper_interval_secs: default_reaper_interval(),
            max_failover_hops: default_max_failover_hops(),
        }
    }
}

impl PoolConfig {
    /// Ten years; anything above is clamped
    pub const MAX_RETENTION_HOURS: u64 = 87_600;

    pub fn retention(&self) -> chrono::Duration {
        let hours = self.backup_retention_hours.min(Self::MAX_RETENTION_HOURS);
        chrono::Duration::hours(hours as i64)
    }

    pub fn reaper_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.reaper_interval_secs)
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Default, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    /// Absent means the in-memory store
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default)]
    pub redis_key_prefix: Option<String>,
    #[serde(default)]
    pub pool: PoolConfig,
}

impl AppConfig {
    pub const DEFAULT_KEY_PREFIX: &'static str = "key_relay:";

    pub fn key_prefix(&self) -> &str {
        self.redis_key_prefix
            .as_deref()
            .unwrap_or(Self::DEFAULT_KEY_PREFIX)
    }
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    30
}

fn default_backup_retention_hours() -> u64 {
    24
}

fn default_reaper_interval() -> u64 {
    60
}

fn default_max_failover_hops() -> u32 {
    3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let config: AppConfig = serde_yaml::from_str("pool:\n  max_failover_hops: 2\n").unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.pool.max_failover_hops, 2);
        assert_eq!(config.pool.backup_retention_hours, 24);
        assert_eq!(config.key_prefix(), "key_relay:");
        assert_eq!(config.pool.retention(), chrono::Duration::hours(24));
    }
}
