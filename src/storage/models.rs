// src/storage/models.rs

use crate::error::{AppError, Result};
use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Masks a secret for logs and dashboards: `sk-a...wxyz`.
pub fn preview_secret(secret: &str) -> String {
    if secret.chars().count() > 8 {
        let head: String = secret.chars().take(4).collect();
        let tail: String = secret
            .chars()
            .rev()
            .take(4)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        format!("{head}...{tail}")
    } else {
        "****".to_string()
    }
}

/// Upstream provider a secret was issued by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Provider {
    OhMyGpt,
    OpenHands,
    Other(String),
}

impl Provider {
    pub fn as_str(&self) -> &str {
        match self {
            Self::OhMyGpt => "ohmygpt",
            Self::OpenHands => "openhands",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "" => Err(AppError::validation("provider", "provider must not be empty")),
            "ohmygpt" => Ok(Self::OhMyGpt),
            "openhands" => Ok(Self::OpenHands),
            _ => Ok(Self::Other(normalized)),
        }
    }
}

impl TryFrom<String> for Provider {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Provider> for String {
    fn from(value: Provider) -> Self {
        value.as_str().to_string()
    }
}

/// Health of a credential. Only `Healthy` is routable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialStatus {
    Healthy,
    RateLimited,
    Exhausted,
    Banned,
    Invalid,
}

impl CredentialStatus {
    pub const ALL: [CredentialStatus; 5] = [
        Self::Healthy,
        Self::RateLimited,
        Self::Exhausted,
        Self::Banned,
        Self::Invalid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::RateLimited => "rate_limited",
            Self::Exhausted => "exhausted",
            Self::Banned => "banned",
            Self::Invalid => "invalid",
        }
    }
}

impl fmt::Display for CredentialStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CredentialStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| AppError::validation("status", format!("unknown status '{s}'")))
    }
}

/// A provider key that can serve upstream requests.
#[derive(Clone, Debug)]
pub struct Credential {
    pub id: String,
    pub secret: Secret<String>,
    pub provider: Provider,
    pub status: CredentialStatus,
    pub tokens_used: u64,
    pub requests_count: u64,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Credential {
    /// Usage counters stop here; Redis hashes hold signed 64-bit integers.
    pub const MAX_COUNTER: u64 = i64::MAX as u64;

    pub fn new(id: String, secret: String, provider: Provider, now: DateTime<Utc>) -> Self {
        Self {
            id,
            secret: Secret::new(secret),
            provider,
            status: CredentialStatus::Healthy,
            tokens_used: 0,
            requests_count: 0,
            last_failure_at: None,
            created_at: now,
        }
    }

    pub fn is_routable(&self) -> bool {
        self.status == CredentialStatus::Healthy
    }

    /// Applies a classified status. Non-healthy statuses stamp `last_failure_at`.
    pub fn mark(&mut self, status: CredentialStatus, now: DateTime<Utc>) {
        self.status = status;
        if status != CredentialStatus::Healthy {
            self.last_failure_at = Some(now);
        }
    }

    pub fn record_usage(&mut self, tokens: u64, requests: u64) {
        self.tokens_used = self.tokens_used.saturating_add(tokens).min(Self::MAX_COUNTER);
        self.requests_count = self
            .requests_count
            .saturating_add(requests)
            .min(Self::MAX_COUNTER);
    }

    /// Forces the credential back into rotation and clears its counters.
    /// `last_failure_at` is kept for audit.
    pub fn reset(&mut self) {
        self.status = CredentialStatus::Healthy;
        self.tokens_used = 0;
        self.requests_count = 0;
    }

    pub fn preview(&self) -> String {
        preview_secret(self.secret.expose_secret())
    }
}

/// Assignment of a credential to a routing target.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    pub target_id: String,
    pub credential_id: String,
    /// Lower value wins.
    pub priority: u32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Binding {
    pub fn new(
        target_id: String,
        credential_id: String,
        priority: u32,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        if priority == 0 {
            return Err(AppError::validation(
                "priority",
                "priority must be a positive integer",
            ));
        }
        Ok(Self {
            target_id,
            credential_id,
            priority,
            is_active: true,
            created_at: now,
        })
    }
}

/// A spare secret held in reserve until a target runs dry.
#[derive(Clone, Debug)]
pub struct BackupCredential {
    pub id: String,
    pub secret: Secret<String>,
    pub provider: Provider,
    pub is_used: bool,
    pub activated_at: Option<DateTime<Utc>>,
    pub deletes_at: Option<DateTime<Utc>>,
    pub used_for: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl BackupCredential {
    pub fn new(id: String, secret: String, provider: Provider, now: DateTime<Utc>) -> Self {
        Self {
            id,
            secret: Secret::new(secret),
            provider,
            is_used: false,
            activated_at: None,
            deletes_at: None,
            used_for: None,
            created_at: now,
        }
    }

    pub fn is_available(&self) -> bool {
        !self.is_used
    }

    /// available -> used
    pub fn mark_drawn(&mut self, target_id: &str, now: DateTime<Utc>, retention: Duration) {
        self.is_used = true;
        self.activated_at = Some(now);
        self.deletes_at = Some(now + retention);
        self.used_for = Some(target_id.to_string());
    }

    /// used -> available
    pub fn mark_restored(&mut self) {
        self.is_used = false;
        self.activated_at = None;
        self.deletes_at = None;
        self.used_for = None;
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.is_used && self.deletes_at.is_some_and(|deadline| deadline <= now)
    }

    pub fn preview(&self) -> String {
        preview_secret(self.secret.expose_secret())
    }
}

/// Which backups a listing should include.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupFilter {
    Available,
    Used,
    #[default]
    All,
}

impl BackupFilter {
    pub fn matches(&self, backup: &BackupCredential) -> bool {
        match self {
            Self::Available => !backup.is_used,
            Self::Used => backup.is_used,
            Self::All => true,
        }
    }
}
