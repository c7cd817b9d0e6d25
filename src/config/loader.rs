// src/config/loader.rs

use crate::config::{AppConfig, ConfigValidator};
use crate::error::{AppError, Result};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

pub const CONFIG_PATH_ENV: &str = "KEY_RELAY_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Explicit path wins, then `KEY_RELAY_CONFIG`, then `config.yaml`.
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Load configuration from file or defaults, apply environment overrides, validate.
pub fn load_config(config_path: &Path) -> Result<AppConfig> {
    let mut config = if config_path.exists() {
        info!("Loading configuration from file: {}", config_path.display());
        load_from_file(config_path)?
    } else {
        info!("Configuration file not found, using defaults");
        AppConfig::default()
    };

    override_with_env(&mut config);

    ConfigValidator::validate(&config)?;

    debug!("Configuration loaded and validated successfully");
    Ok(config)
}

fn load_from_file(config_path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(config_path).map_err(|_| AppError::ConfigNotFound {
        path: config_path.display().to_string(),
    })?;

    serde_yaml::from_str(&content).map_err(|e| AppError::ConfigParse {
        message: format!("Failed to parse config file: {e}"),
        line: e.location().map(|loc| loc.line()),
    })
}

fn override_with_env(config: &mut AppConfig) {
    if let Ok(redis_url) = std::env::var("REDIS_URL") {
        info!("Overriding Redis URL from environment variable");
        config.redis_url = Some(redis_url);
    }

    if let Some(port) = parse_env::<u16>("PORT") {
        info!("Overriding server port from environment variable: {}", port);
        config.server.port = port;
    }

    if let Some(hours) = parse_env::<u64>("BACKUP_RETENTION_HOURS") {
        info!("Overriding backup retention from environment: {}h", hours);
        config.pool.backup_retention_hours = hours;
    }

    if let Some(hops) = parse_env::<u32>("MAX_FAILOVER_HOPS") {
        info!("Overriding max failover hops from environment: {}", hops);
        config.pool.max_failover_hops = hops;
    }
}

fn parse_env<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Invalid {} environment variable: {}", name, raw);
            None
        }
    }
}
