//! Metrics collection for the credential pool
//!
//! Counters go through the `metrics` facade; `exporters` installs the
//! Prometheus recorder and serves `/metrics`. Without the `metrics` feature
//! every recording call compiles to nothing.

pub mod exporters;
pub use exporters::{install_recorder, metrics_handler};

use crate::storage::CredentialStatus;

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// Outcome of a `resolve` call: `hit` or `miss`
pub fn record_resolution(outcome: &'static str) {
    #[cfg(feature = "metrics")]
    counter!("key_relay_resolutions_total", "outcome" => outcome).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = outcome;
}

/// Outcome of a failover: `failover`, `promoted`, `retry_local`, `pool_exhausted`
pub fn record_failover(outcome: &'static str) {
    #[cfg(feature = "metrics")]
    counter!("key_relay_failovers_total", "outcome" => outcome).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = outcome;
}

/// Result of a backup draw: `drawn` or `exhausted`
pub fn record_backup_draw(result: &'static str) {
    #[cfg(feature = "metrics")]
    counter!("key_relay_backup_draws_total", "result" => result).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = result;
}

pub fn record_backups_reaped(count: usize) {
    #[cfg(feature = "metrics")]
    counter!("key_relay_backups_reaped_total").increment(count as u64);
    #[cfg(not(feature = "metrics"))]
    let _ = count;
}

pub fn record_status_transition(status: CredentialStatus) {
    #[cfg(feature = "metrics")]
    counter!("key_relay_status_transitions_total", "status" => status.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = status;
}

/// Snapshot of credential health, refreshed by the overview read model
pub fn record_pool_health(total: usize, healthy: usize, backups_available: usize) {
    #[cfg(feature = "metrics")]
    {
        gauge!("key_relay_credentials_total").set(total as f64);
        gauge!("key_relay_credentials_healthy").set(healthy as f64);
        gauge!("key_relay_backups_available").set(backups_available as f64);
    }
    #[cfg(not(feature = "metrics"))]
    let _ = (total, healthy, backups_available);
}
