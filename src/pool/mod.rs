// src/pool/mod.rs

//! Typed command functions over the credential pool.
//!
//! The admin routes and the request path both go through `KeyPool`, so there
//! is exactly one code path per operation.

pub mod import;
pub mod overview;

pub use import::{ImportFailure, ImportReport};
pub use overview::PoolOverview;

use crate::config::PoolConfig;
use crate::core::{FailoverExecutor, FailoverOutcome, FailureSignal, Resolver};
use crate::error::{AppError, Entity, Result};
use crate::storage::{
    BackupCredential, BackupFilter, Binding, Credential, PoolStore, Provider,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, instrument};

pub struct KeyPool {
    store: Arc<dyn PoolStore>,
    resolver: Resolver,
    executor: FailoverExecutor,
    max_failover_hops: u32,
}

impl KeyPool {
    pub fn new(store: Arc<dyn PoolStore>, config: &PoolConfig) -> Self {
        let resolver = Resolver::new(store.clone());
        let executor = FailoverExecutor::new(store.clone(), resolver.clone(), config.retention());
        Self {
            store,
            resolver,
            executor,
            max_failover_hops: config.max_failover_hops,
        }
    }

    pub fn store(&self) -> Arc<dyn PoolStore> {
        self.store.clone()
    }

    pub fn max_failover_hops(&self) -> u32 {
        self.max_failover_hops
    }

    // --- Credentials ---

    pub async fn list_credentials(&self, provider: Option<&Provider>) -> Result<Vec<Credential>> {
        self.store.list_credentials(provider).await
    }

    pub async fn get_credential(&self, id: &str) -> Result<Credential> {
        self.store.get_credential(id).await
    }

    #[instrument(level = "info", skip(self, secret))]
    pub async fn create_credential(
        &self,
        id: &str,
        secret: &str,
        provider: Provider,
    ) -> Result<Credential> {
        let (id, secret) = validate_record(id, secret)?;
        let credential = Credential::new(id, secret, provider, Utc::now());
        self.store.create_credential(credential.clone()).await?;
        info!(credential.preview = %credential.preview(), "Credential created");
        Ok(credential)
    }

    pub async fn reset_credential(&self, id: &str) -> Result<Credential> {
        let credential = self.store.reset_credential(id).await?;
        info!(credential_id = id, "Credential reset to healthy");
        Ok(credential)
    }

    pub async fn delete_credential(&self, id: &str) -> Result<()> {
        self.store.delete_credential(id).await?;
        info!(credential_id = id, "Credential deleted");
        Ok(())
    }

    /// Usage accounting reported by the request path.
    pub async fn record_usage(&self, id: &str, tokens: u64, requests: u64) -> Result<Credential> {
        self.store.increment_usage(id, tokens, requests).await
    }

    pub async fn import_credentials(&self, provider: Provider, data: &str) -> ImportReport {
        let mut report = ImportReport::default();
        for (line, parsed) in import::parse_lines(data) {
            match parsed {
                Ok(record) => {
                    let outcome = self
                        .create_credential(&record.id, &record.secret, provider.clone())
                        .await
                        .map(|c| c.id);
                    report.record(line, Some(record.id), outcome);
                }
                Err(e) => report.record(line, None, Err(e)),
            }
        }
        info!(
            provider = %provider,
            succeeded = report.succeeded_count(),
            failed = report.failed_count(),
            "Credential import finished"
        );
        report
    }

    // --- Backups ---

    pub async fn list_backups(
        &self,
        provider: Option<&Provider>,
        filter: BackupFilter,
    ) -> Result<Vec<BackupCredential>> {
        self.store.list_backups(provider, filter).await
    }

    #[instrument(level = "info", skip(self, secret))]
    pub async fn create_backup(
        &self,
        id: &str,
        secret: &str,
        provider: Provider,
    ) -> Result<BackupCredential> {
        let (id, secret) = validate_record(id, secret)?;
        let backup = BackupCredential::new(id, secret, provider, Utc::now());
        self.store.create_backup(backup.clone()).await?;
        info!(backup.preview = %backup.preview(), "Backup created");
        Ok(backup)
    }

    pub async fn restore_backup(&self, id: &str) -> Result<BackupCredential> {
        let backup = self.store.restore_backup(id).await?;
        info!(backup_id = id, "Backup restored to the reserve");
        Ok(backup)
    }

    pub async fn delete_backup(&self, id: &str) -> Result<()> {
        self.store.delete_backup(id).await?;
        info!(backup_id = id, "Backup deleted");
        Ok(())
    }

    pub async fn import_backups(&self, provider: Provider, data: &str) -> ImportReport {
        let mut report = ImportReport::default();
        for (line, parsed) in import::parse_lines(data) {
            match parsed {
                Ok(record) => {
                    let outcome = self
                        .create_backup(&record.id, &record.secret, provider.clone())
                        .await
                        .map(|b| b.id);
                    report.record(line, Some(record.id), outcome);
                }
                Err(e) => report.record(line, None, Err(e)),
            }
        }
        info!(
            provider = %provider,
            succeeded = report.succeeded_count(),
            failed = report.failed_count(),
            "Backup import finished"
        );
        report
    }

    pub async fn reap_backups(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        self.store.reap_backups(now).await
    }

    // --- Bindings ---

    /// All bindings, or only those of one target
    pub async fn list_bindings(&self, target_id: Option<&str>) -> Result<Vec<Binding>> {
        match target_id {
            Some(target_id) => {
                let mut bindings = self.store.list_bindings_for_target(target_id).await?;
                bindings.sort_by(|a, b| a.credential_id.cmp(&b.credential_id));
                Ok(bindings)
            }
            None => self.store.list_all_bindings().await,
        }
    }

    /// The credential must exist when the binding is created; later deletion
    /// only makes the binding dangling.
    #[instrument(level = "info", skip(self))]
    pub async fn create_binding(
        &self,
        target_id: &str,
        credential_id: &str,
        priority: u32,
    ) -> Result<Binding> {
        let target_id = target_id.trim();
        if target_id.is_empty() {
            return Err(AppError::validation("target_id", "target id must not be empty"));
        }
        match self.store.get_credential(credential_id).await {
            Ok(_) => {}
            Err(AppError::NotFound { .. }) => {
                return Err(AppError::not_found(Entity::Credential, credential_id));
            }
            Err(e) => return Err(e),
        }
        let binding = Binding::new(
            target_id.to_string(),
            credential_id.to_string(),
            priority,
            Utc::now(),
        )?;
        self.store.create_binding(binding.clone()).await?;
        info!("Binding created");
        Ok(binding)
    }

    pub async fn toggle_binding(
        &self,
        target_id: &str,
        credential_id: &str,
        is_active: bool,
    ) -> Result<Binding> {
        let binding = self
            .store
            .set_binding_active(target_id, credential_id, is_active)
            .await?;
        info!(target_id, credential_id, is_active, "Binding toggled");
        Ok(binding)
    }

    pub async fn delete_binding(&self, target_id: &str, credential_id: &str) -> Result<()> {
        self.store.delete_binding(target_id, credential_id).await?;
        info!(target_id, credential_id, "Binding deleted");
        Ok(())
    }

    // --- Routing ---

    pub async fn resolve(&self, target_id: &str) -> Result<Credential> {
        self.resolver.resolve(target_id).await
    }

    pub async fn on_failure(
        &self,
        target_id: &str,
        credential_id: &str,
        signal: FailureSignal,
    ) -> Result<FailoverOutcome> {
        self.executor
            .on_failure(target_id, credential_id, signal)
            .await
    }

    pub(crate) fn executor(&self) -> &FailoverExecutor {
        &self.executor
    }

    // --- Read model ---

    pub async fn overview(&self) -> Result<PoolOverview> {
        PoolOverview::collect(self.store.as_ref()).await
    }
}

fn validate_record(id: &str, secret: &str) -> Result<(String, String)> {
    let id = id.trim();
    let secret = secret.trim();
    if id.is_empty() {
        return Err(AppError::validation("id", "id must not be empty"));
    }
    if id.contains('|') || id.chars().any(char::is_whitespace) {
        return Err(AppError::validation(
            "id",
            "id must not contain whitespace or '|'",
        ));
    }
    if secret.is_empty() {
        return Err(AppError::validation("secret", "secret must not be empty"));
    }
    Ok((id.to_string(), secret.to_string()))
}
