// src/core/classifier.rs

use crate::storage::CredentialStatus;
use serde::{Deserialize, Serialize};

/// Upstream failure as reported by the request path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureSignal {
    /// 401
    Unauthorized,
    /// 402
    QuotaExceeded,
    /// 403
    Forbidden,
    /// 429
    RateLimited,
    TransientNetworkError,
    Unknown,
}

impl FailureSignal {
    /// Maps an upstream HTTP status to a signal.
    ///
    /// Only the codes with an unambiguous meaning escalate; everything else
    /// is `Unknown`, and 5xx/408 are treated as transient.
    pub fn from_status_code(status: u16) -> Self {
        match status {
            401 => Self::Unauthorized,
            402 => Self::QuotaExceeded,
            403 => Self::Forbidden,
            429 => Self::RateLimited,
            408 | 500 | 502 | 503 | 504 => Self::TransientNetworkError,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::QuotaExceeded => "quota_exceeded",
            Self::Forbidden => "forbidden",
            Self::RateLimited => "rate_limited",
            Self::TransientNetworkError => "transient_network_error",
            Self::Unknown => "unknown",
        }
    }
}

/// What the failover executor should do about a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthVerdict {
    /// `None` leaves the credential untouched.
    pub status: Option<CredentialStatus>,
    pub should_failover: bool,
    pub should_draw_backup: bool,
}

/// Pure policy table. Backups are only spent on failures that make the
/// secret unusable; rate limits fail over inside the bound pool first.
pub fn classify(signal: FailureSignal) -> HealthVerdict {
    let (status, should_failover, should_draw_backup) = match signal {
        FailureSignal::Unauthorized => (Some(CredentialStatus::Invalid), true, true),
        FailureSignal::QuotaExceeded => (Some(CredentialStatus::Exhausted), true, true),
        FailureSignal::Forbidden => (Some(CredentialStatus::Banned), true, true),
        FailureSignal::RateLimited => (Some(CredentialStatus::RateLimited), true, false),
        FailureSignal::TransientNetworkError | FailureSignal::Unknown => (None, false, false),
    };
    HealthVerdict {
        status,
        should_failover,
        should_draw_backup,
    }
}
