// tests/config_tests.rs

use key_relay::config::{load_config, resolve_config_path, CONFIG_PATH_ENV};
use key_relay::AppError;
use serial_test::serial;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const ENV_VARS: [&str; 5] = [
    "REDIS_URL",
    "PORT",
    "BACKUP_RETENTION_HOURS",
    "MAX_FAILOVER_HOPS",
    CONFIG_PATH_ENV,
];

fn cleanup_test_env_vars() {
    for name in ENV_VARS {
        std::env::remove_var(name);
    }
}

fn create_temp_config_file(dir: &TempDir, content: &str) -> PathBuf {
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, content).unwrap();
    path
}

#[test]
#[serial]
fn test_missing_file_falls_back_to_defaults() {
    cleanup_test_env_vars();
    let config = load_config(Path::new("/nonexistent/key-relay.yaml")).unwrap();

    assert_eq!(config.server.port, 8080);
    assert!(config.redis_url.is_none());
    assert_eq!(config.pool.backup_retention_hours, 24);
    assert_eq!(config.pool.reaper_interval_secs, 60);
    assert_eq!(config.pool.max_failover_hops, 3);
}

#[test]
#[serial]
fn test_load_from_yaml_and_env_override() {
    cleanup_test_env_vars();
    let dir = TempDir::new().unwrap();
    let path = create_temp_config_file(
        &dir,
        r#"
server:
  host: 127.0.0.1
  port: 9000
redis_key_prefix: "relay_test:"
pool:
  backup_retention_hours: 48
  reaper_interval_secs: 15
  max_failover_hops: 2
"#,
    );

    let config = load_config(&path).unwrap();
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.server.port, 9000);
    assert_eq!(config.key_prefix(), "relay_test:");
    assert_eq!(config.pool.backup_retention_hours, 48);
    assert_eq!(config.pool.reaper_interval_secs, 15);

    std::env::set_var("PORT", "9100");
    std::env::set_var("BACKUP_RETENTION_HOURS", "6");
    std::env::set_var("MAX_FAILOVER_HOPS", "5");
    std::env::set_var("REDIS_URL", "redis://cache:6379/2");
    let config = load_config(&path).unwrap();
    cleanup_test_env_vars();

    assert_eq!(config.server.port, 9100);
    assert_eq!(config.pool.backup_retention_hours, 6);
    assert_eq!(config.pool.max_failover_hops, 5);
    assert_eq!(config.redis_url.as_deref(), Some("redis://cache:6379/2"));
}

#[test]
#[serial]
fn test_unparsable_env_override_is_ignored() {
    cleanup_test_env_vars();
    std::env::set_var("PORT", "not-a-port");
    let config = load_config(Path::new("/nonexistent/key-relay.yaml")).unwrap();
    cleanup_test_env_vars();

    assert_eq!(config.server.port, 8080);
}

#[test]
#[serial]
fn test_env_override_is_validated() {
    cleanup_test_env_vars();
    std::env::set_var("MAX_FAILOVER_HOPS", "0");
    let result = load_config(Path::new("/nonexistent/key-relay.yaml"));
    cleanup_test_env_vars();

    assert!(matches!(result, Err(AppError::ConfigValidation { .. })));
}

#[test]
#[serial]
fn test_malformed_yaml_reports_parse_error() {
    cleanup_test_env_vars();
    let dir = TempDir::new().unwrap();
    let path = create_temp_config_file(&dir, "server:\n  port: [oops\n");

    assert!(matches!(load_config(&path), Err(AppError::ConfigParse { .. })));
}

#[test]
#[serial]
fn test_config_path_resolution_order() {
    cleanup_test_env_vars();
    assert_eq!(resolve_config_path(None), PathBuf::from("config.yaml"));

    std::env::set_var(CONFIG_PATH_ENV, "/etc/key-relay/config.yaml");
    assert_eq!(
        resolve_config_path(None),
        PathBuf::from("/etc/key-relay/config.yaml")
    );
    assert_eq!(
        resolve_config_path(Some(Path::new("local.yaml"))),
        PathBuf::from("local.yaml")
    );
    cleanup_test_env_vars();
}
