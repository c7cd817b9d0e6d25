// src/config/validation.rs

use crate::config::{AppConfig, PoolConfig};
use crate::error::{AppError, Result};
use tracing::{debug, warn};
use url::Url;

pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(config: &AppConfig) -> Result<()> {
        debug!("Starting configuration validation");

        if let Err(e) = Self::validate_redis_config(config) {
            warn!("Redis config validation failed: {}", e);
            return Err(e);
        }

        if let Err(e) = Self::validate_server_config(config) {
            warn!("Server config validation failed: {}", e);
            return Err(e);
        }

        if let Err(e) = Self::validate_pool_config(&config.pool) {
            warn!("Pool config validation failed: {}", e);
            return Err(e);
        }

        debug!("Configuration validation completed successfully");
        Ok(())
    }

    fn validate_redis_config(config: &AppConfig) -> Result<()> {
        if let Some(redis_url) = &config.redis_url {
            let url = Url::parse(redis_url).map_err(|e| {
                AppError::config_validation(
                    format!("Invalid URL in redis_url: {e}"),
                    Some("redis_url"),
                )
            })?;
            if !matches!(url.scheme(), "redis" | "rediss" | "redis+unix" | "unix") {
                return Err(AppError::config_validation(
                    format!("Unsupported redis_url scheme '{}'", url.scheme()),
                    Some("redis_url"),
                ));
            }
        }
        if config.redis_key_prefix.as_deref() == Some("") {
            return Err(AppError::config_validation(
                "Redis key prefix cannot be empty",
                Some("redis_key_prefix"),
            ));
        }
        Ok(())
    }

    fn validate_server_config(config: &AppConfig) -> Result<()> {
        // Allow port 0 in test mode (system will assign a free port)
        if config.server.port == 0 && !config.server.test_mode {
            return Err(AppError::config_validation(
                "Server port cannot be 0 (except in test mode)",
                Some("server.port"),
            ));
        }
        if config.server.request_timeout_secs == 0 {
            return Err(AppError::config_validation(
                "Request timeout cannot be 0",
                Some("server.request_timeout_secs"),
            ));
        }
        if config.server.host.trim().is_empty() {
            return Err(AppError::config_validation(
                "Server host cannot be empty",
                Some("server.host"),
            ));
        }
        Ok(())
    }

    fn validate_pool_config(pool: &PoolConfig) -> Result<()> {
        if !(1..=PoolConfig::MAX_RETENTION_HOURS).contains(&pool.backup_retention_hours) {
            return Err(AppError::config_validation(
                format!(
                    "Backup retention must be between 1 and {} hours",
                    PoolConfig::MAX_RETENTION_HOURS
                ),
                Some("pool.backup_retention_hours"),
            ));
        }
        if pool.reaper_interval_secs == 0 {
            return Err(AppError::config_validation(
                "Reaper interval cannot be 0",
                Some("pool.reaper_interval_secs"),
            ));
        }
        if !(1..=10).contains(&pool.max_failover_hops) {
            return Err(AppError::config_validation(
                "Max failover hops must be between 1 and 10",
                Some("pool.max_failover_hops"),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(ConfigValidator::validate(&AppConfig::default()).is_ok());
    }

    #[test]
    fn test_port_zero_only_in_test_mode() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(ConfigValidator::validate(&config).is_err());

        config.server.test_mode = true;
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_rejects_bad_pool_values() {
        let mut config = AppConfig::default();
        config.pool.max_failover_hops = 11;
        assert!(matches!(
            ConfigValidator::validate(&config),
            Err(AppError::ConfigValidation { field: Some(f), .. }) if f == "pool.max_failover_hops"
        ));

        let mut config = AppConfig::default();
        config.pool.backup_retention_hours = 0;
        assert!(ConfigValidator::validate(&config).is_err());

        let mut config = AppConfig::default();
        config.pool.reaper_interval_secs = 0;
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_rejects_non_redis_url() {
        let mut config = AppConfig::default();
        config.redis_url = Some("not a url".to_string());
        assert!(ConfigValidator::validate(&config).is_err());

        config.redis_url = Some("http://localhost:6379".to_string());
        assert!(ConfigValidator::validate(&config).is_err());

        config.redis_url = Some("redis://127.0.0.1:6379".to_string());
        assert!(ConfigValidator::validate(&config).is_ok());
    }
}
