// src/storage/memory.rs

use crate::error::{AppError, Entity, Result};
use crate::storage::{
    BackupCredential, BackupFilter, BackupStore, Binding, BindingStore, Credential,
    CredentialStatus, CredentialStore, Provider,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::trace;

#[derive(Default)]
struct BackupTable {
    rows: HashMap<String, (u64, BackupCredential)>,
    next_seq: u64,
}

impl BackupTable {
    /// Rows in first-in-first-used order.
    fn ordered(&self) -> Vec<&(u64, BackupCredential)> {
        let mut rows: Vec<_> = self.rows.values().collect();
        rows.sort_by(|(seq_a, a), (seq_b, b)| {
            a.created_at.cmp(&b.created_at).then(seq_a.cmp(seq_b))
        });
        rows
    }
}

/// In-memory implementation of all pool collections.
///
/// Each collection sits behind its own write lock, so every mutation is a
/// single critical section: status updates and usage increments on one id
/// are linearizable and `draw_backup` is a conditional update, not a
/// read-then-write.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    credentials: Arc<RwLock<HashMap<String, Credential>>>,
    backups: Arc<RwLock<BackupTable>>,
    // target_id -> credential_id -> binding
    bindings: Arc<RwLock<HashMap<String, BTreeMap<String, Binding>>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for InMemoryStore {
    async fn get_credential(&self, id: &str) -> Result<Credential> {
        let guard = self.credentials.read().await;
        guard
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::not_found(Entity::Credential, id))
    }

    async fn list_credentials(&self, provider: Option<&Provider>) -> Result<Vec<Credential>> {
        let guard = self.credentials.read().await;
        let mut credentials: Vec<Credential> = guard
            .values()
            .filter(|c| provider.map_or(true, |p| &c.provider == p))
            .cloned()
            .collect();
        credentials.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(credentials)
    }

    async fn create_credential(&self, credential: Credential) -> Result<()> {
        trace!("InMemoryStore::create_credential: waiting for write lock");
        let mut guard = self.credentials.write().await;
        if guard.contains_key(&credential.id) {
            return Err(AppError::DuplicateId { id: credential.id });
        }
        guard.insert(credential.id.clone(), credential);
        Ok(())
    }

    async fn update_status(
        &self,
        id: &str,
        status: CredentialStatus,
        now: DateTime<Utc>,
    ) -> Result<Credential> {
        trace!("InMemoryStore::update_status: waiting for write lock");
        let mut guard = self.credentials.write().await;
        let credential = guard
            .get_mut(id)
            .ok_or_else(|| AppError::not_found(Entity::Credential, id))?;
        credential.mark(status, now);
        Ok(credential.clone())
    }

    async fn increment_usage(&self, id: &str, tokens: u64, requests: u64) -> Result<Credential> {
        let mut guard = self.credentials.write().await;
        let credential = guard
            .get_mut(id)
            .ok_or_else(|| AppError::not_found(Entity::Credential, id))?;
        credential.record_usage(tokens, requests);
        Ok(credential.clone())
    }

    async fn reset_credential(&self, id: &str) -> Result<Credential> {
        let mut guard = self.credentials.write().await;
        let credential = guard
            .get_mut(id)
            .ok_or_else(|| AppError::not_found(Entity::Credential, id))?;
        credential.reset();
        Ok(credential.clone())
    }

    async fn delete_credential(&self, id: &str) -> Result<()> {
        let mut guard = self.credentials.write().await;
        guard
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| AppError::not_found(Entity::Credential, id))
    }
}

#[async_trait]
impl BackupStore for InMemoryStore {
    async fn get_backup(&self, id: &str) -> Result<BackupCredential> {
        let guard = self.backups.read().await;
        guard
            .rows
            .get(id)
            .map(|(_, backup)| backup.clone())
            .ok_or_else(|| AppError::not_found(Entity::Backup, id))
    }

    async fn list_backups(
        &self,
        provider: Option<&Provider>,
        filter: BackupFilter,
    ) -> Result<Vec<BackupCredential>> {
        let guard = self.backups.read().await;
        Ok(guard
            .ordered()
            .into_iter()
            .map(|(_, backup)| backup)
            .filter(|b| filter.matches(b))
            .filter(|b| provider.map_or(true, |p| &b.provider == p))
            .cloned()
            .collect())
    }

    async fn create_backup(&self, backup: BackupCredential) -> Result<()> {
        let mut guard = self.backups.write().await;
        if guard.rows.contains_key(&backup.id) {
            return Err(AppError::DuplicateId { id: backup.id });
        }
        let seq = guard.next_seq;
        guard.next_seq += 1;
        guard.rows.insert(backup.id.clone(), (seq, backup));
        Ok(())
    }

    async fn draw_backup(
        &self,
        provider: &Provider,
        target_id: &str,
        now: DateTime<Utc>,
        retention: Duration,
    ) -> Result<Option<BackupCredential>> {
        trace!("InMemoryStore::draw_backup: waiting for write lock");
        let mut guard = self.backups.write().await;
        let candidate = guard
            .ordered()
            .into_iter()
            .map(|(_, backup)| backup)
            .find(|b| b.is_available() && &b.provider == provider)
            .map(|b| b.id.clone());

        let Some(id) = candidate else {
            return Ok(None);
        };
        let Some((_, backup)) = guard.rows.get_mut(&id) else {
            return Ok(None);
        };
        backup.mark_drawn(target_id, now, retention);
        Ok(Some(backup.clone()))
    }

    async fn restore_backup(&self, id: &str) -> Result<BackupCredential> {
        let mut guard = self.backups.write().await;
        let (_, backup) = guard
            .rows
            .get_mut(id)
            .ok_or_else(|| AppError::not_found(Entity::Backup, id))?;
        if backup.is_available() {
            return Err(AppError::AlreadyAvailable { id: id.to_string() });
        }
        backup.mark_restored();
        Ok(backup.clone())
    }

    async fn delete_backup(&self, id: &str) -> Result<()> {
        let mut guard = self.backups.write().await;
        guard
            .rows
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| AppError::not_found(Entity::Backup, id))
    }

    async fn reap_backups(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let mut guard = self.backups.write().await;
        let expired: Vec<String> = guard
            .rows
            .values()
            .filter(|(_, b)| b.is_expired(now))
            .map(|(_, b)| b.id.clone())
            .collect();
        for id in &expired {
            guard.rows.remove(id);
        }
        Ok(expired)
    }
}

#[async_trait]
impl BindingStore for InMemoryStore {
    async fn create_binding(&self, binding: Binding) -> Result<()> {
        let mut guard = self.bindings.write().await;
        let edges = guard.entry(binding.target_id.clone()).or_default();
        if edges.contains_key(&binding.credential_id) {
            return Err(AppError::DuplicateBinding {
                target_id: binding.target_id,
                credential_id: binding.credential_id,
            });
        }
        edges.insert(binding.credential_id.clone(), binding);
        Ok(())
    }

    async fn set_binding_active(
        &self,
        target_id: &str,
        credential_id: &str,
        is_active: bool,
    ) -> Result<Binding> {
        let mut guard = self.bindings.write().await;
        let binding = guard
            .get_mut(target_id)
            .and_then(|edges| edges.get_mut(credential_id))
            .ok_or_else(|| {
                AppError::not_found(Entity::Binding, format!("{target_id}/{credential_id}"))
            })?;
        binding.is_active = is_active;
        Ok(binding.clone())
    }

    async fn delete_binding(&self, target_id: &str, credential_id: &str) -> Result<()> {
        let mut guard = self.bindings.write().await;
        let removed = guard
            .get_mut(target_id)
            .and_then(|edges| edges.remove(credential_id));
        if guard.get(target_id).is_some_and(BTreeMap::is_empty) {
            guard.remove(target_id);
        }
        removed.map(|_| ()).ok_or_else(|| {
            AppError::not_found(Entity::Binding, format!("{target_id}/{credential_id}"))
        })
    }

    async fn list_bindings_for_target(&self, target_id: &str) -> Result<Vec<Binding>> {
        let guard = self.bindings.read().await;
        Ok(guard
            .get(target_id)
            .map(|edges| edges.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn list_all_bindings(&self) -> Result<Vec<Binding>> {
        let guard = self.bindings.read().await;
        let mut targets: Vec<&String> = guard.keys().collect();
        targets.sort();
        Ok(targets
            .into_iter()
            .flat_map(|target| guard[target].values().cloned())
            .collect())
    }
}
