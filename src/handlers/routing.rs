// src/handlers/routing.rs

//! Request-path routes: which credential to use, and what happened to it.

use crate::admin::CredentialView;
use crate::core::{FailoverOutcome, FailureSignal};
use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::storage::{Credential, Provider};
use axum::{
    extract::{Path, State},
    Json,
};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// A credential handed to the request path, secret included.
#[derive(Debug, Serialize, Deserialize)]
pub struct RouteCredential {
    pub credential_id: String,
    pub provider: Provider,
    pub secret: String,
}

impl From<&Credential> for RouteCredential {
    fn from(credential: &Credential) -> Self {
        Self {
            credential_id: credential.id.clone(),
            provider: credential.provider.clone(),
            secret: credential.secret.expose_secret().clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct FailureReport {
    pub credential_id: String,
    /// Wins over `status_code` when both are present
    pub signal: Option<FailureSignal>,
    pub status_code: Option<u16>,
}

impl FailureReport {
    fn signal(&self) -> Result<FailureSignal> {
        match (self.signal, self.status_code) {
            (Some(signal), _) => Ok(signal),
            (None, Some(code)) => Ok(FailureSignal::from_status_code(code)),
            (None, None) => Err(AppError::validation(
                "signal",
                "either signal or status_code is required",
            )),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FailoverResponse {
    pub outcome: String,
    pub next: Option<RouteCredential>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UsageReport {
    pub credential_id: String,
    pub tokens: u64,
    #[serde(default = "default_requests")]
    pub requests: u64,
}

fn default_requests() -> u64 {
    1
}

pub async fn resolve_route(
    State(state): State<Arc<AppState>>,
    Path(target_id): Path<String>,
) -> Result<Json<RouteCredential>> {
    let credential = state.pool.resolve(&target_id).await?;
    Ok(Json(RouteCredential::from(&credential)))
}

/// `PoolExhausted` comes back as a 503 problem document.
pub async fn report_failure(
    State(state): State<Arc<AppState>>,
    Path(target_id): Path<String>,
    Json(report): Json<FailureReport>,
) -> Result<Json<FailoverResponse>> {
    let signal = report.signal()?;
    debug!(%target_id, credential_id = %report.credential_id, signal = signal.as_str(), "Failure reported");

    let outcome = state
        .pool
        .on_failure(&target_id, &report.credential_id, signal)
        .await?;

    let response = match &outcome {
        FailoverOutcome::PoolExhausted => return Err(AppError::PoolExhausted { target_id }),
        FailoverOutcome::Promoted { next, backup_id } => FailoverResponse {
            outcome: outcome.as_str().to_string(),
            next: Some(RouteCredential::from(next)),
            backup_id: Some(backup_id.clone()),
        },
        FailoverOutcome::Failover { next } => FailoverResponse {
            outcome: outcome.as_str().to_string(),
            next: Some(RouteCredential::from(next)),
            backup_id: None,
        },
        FailoverOutcome::RetryLocal => FailoverResponse {
            outcome: outcome.as_str().to_string(),
            next: None,
            backup_id: None,
        },
    };
    Ok(Json(response))
}

pub async fn record_usage(
    State(state): State<Arc<AppState>>,
    Path(_target_id): Path<String>,
    Json(report): Json<UsageReport>,
) -> Result<Json<CredentialView>> {
    let credential = state
        .pool
        .record_usage(&report.credential_id, report.tokens, report.requests)
        .await?;
    Ok(Json(CredentialView::from(&credential)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_wins_over_status_code() {
        let report = FailureReport {
            credential_id: "k1".into(),
            signal: Some(FailureSignal::Forbidden),
            status_code: Some(429),
        };
        assert_eq!(report.signal().unwrap(), FailureSignal::Forbidden);

        let report = FailureReport {
            credential_id: "k1".into(),
            signal: None,
            status_code: Some(402),
        };
        assert_eq!(report.signal().unwrap(), FailureSignal::QuotaExceeded);

        let report = FailureReport {
            credential_id: "k1".into(),
            signal: None,
            status_code: None,
        };
        assert!(report.signal().is_err());
    }
}
