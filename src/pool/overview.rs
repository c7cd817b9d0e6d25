// src/pool/overview.rs

use crate::core::resolver::rank_bindings;
use crate::error::Result;
use crate::metrics;
use crate::storage::{BackupFilter, Binding, Credential, CredentialStatus, PoolStore};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

pub const DELETED_DISPLAY_NAME: &str = "<deleted>";
pub const MISSING_STATUS: &str = "missing";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CredentialCounts {
    pub total: usize,
    pub healthy: usize,
    pub by_status: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BackupCounts {
    pub total: usize,
    pub available: usize,
    pub used: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BindingView {
    pub credential_id: String,
    pub display_name: String,
    pub priority: u32,
    pub is_active: bool,
    /// Credential status, or `missing` for a dangling binding
    pub status: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TargetView {
    pub target_id: String,
    pub bindings: Vec<BindingView>,
    /// What `resolve` would return right now
    pub current: Option<String>,
}

/// Dashboard projection over the stores. Computed on every call, never cached.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PoolOverview {
    pub credentials: CredentialCounts,
    pub backups: BackupCounts,
    pub targets: Vec<TargetView>,
}

impl PoolOverview {
    pub async fn collect(store: &dyn PoolStore) -> Result<Self> {
        let credentials = store.list_credentials(None).await?;
        let backups = store.list_backups(None, BackupFilter::All).await?;
        let bindings = store.list_all_bindings().await?;

        let mut by_status: BTreeMap<String, usize> = CredentialStatus::ALL
            .iter()
            .map(|status| (status.as_str().to_string(), 0))
            .collect();
        for credential in &credentials {
            *by_status.entry(credential.status.to_string()).or_default() += 1;
        }
        let healthy = by_status
            .get(CredentialStatus::Healthy.as_str())
            .copied()
            .unwrap_or(0);

        let available = backups.iter().filter(|b| b.is_available()).count();
        let backup_counts = BackupCounts {
            total: backups.len(),
            available,
            used: backups.len() - available,
        };

        metrics::record_pool_health(credentials.len(), healthy, available);

        let by_id: HashMap<&str, &Credential> =
            credentials.iter().map(|c| (c.id.as_str(), c)).collect();

        let mut grouped: BTreeMap<String, Vec<Binding>> = BTreeMap::new();
        for binding in bindings {
            grouped
                .entry(binding.target_id.clone())
                .or_default()
                .push(binding);
        }

        let targets = grouped
            .into_iter()
            .map(|(target_id, bindings)| target_view(target_id, bindings, &by_id))
            .collect();

        Ok(Self {
            credentials: CredentialCounts {
                total: credentials.len(),
                healthy,
                by_status,
            },
            backups: backup_counts,
            targets,
        })
    }
}

fn target_view(
    target_id: String,
    mut bindings: Vec<Binding>,
    by_id: &HashMap<&str, &Credential>,
) -> TargetView {
    let current = rank_bindings(bindings.clone())
        .into_iter()
        .find(|b| {
            by_id
                .get(b.credential_id.as_str())
                .is_some_and(|c| c.is_routable())
        })
        .map(|b| b.credential_id);

    bindings.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then_with(|| a.credential_id.cmp(&b.credential_id))
    });

    let bindings = bindings
        .into_iter()
        .map(|binding| {
            let credential = by_id.get(binding.credential_id.as_str());
            BindingView {
                display_name: credential
                    .map(|c| c.preview())
                    .unwrap_or_else(|| DELETED_DISPLAY_NAME.to_string()),
                status: credential
                    .map(|c| c.status.to_string())
                    .unwrap_or_else(|| MISSING_STATUS.to_string()),
                credential_id: binding.credential_id,
                priority: binding.priority,
                is_active: binding.is_active,
            }
        })
        .collect();

    TargetView {
        target_id,
        bindings,
        current,
    }
}
