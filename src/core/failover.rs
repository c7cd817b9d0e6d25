// src/core/failover.rs

use crate::core::classifier::{classify, FailureSignal, HealthVerdict};
use crate::core::resolver::Resolver;
use crate::error::{AppError, Result};
use crate::metrics;
use crate::storage::{BackupCredential, Binding, Credential, PoolStore};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use secrecy::ExposeSecret;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// What the caller should do after reporting a failure.
#[derive(Debug, Clone)]
pub enum FailoverOutcome {
    /// Retry the in-flight request once against `next`.
    Failover { next: Credential },
    /// A backup was drawn and bound to the target as `next`.
    Promoted { next: Credential, backup_id: String },
    /// Nothing changed; the same credential may be retried after a backoff.
    RetryLocal,
    /// Terminal for the request.
    PoolExhausted,
}

impl FailoverOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Failover { .. } => "failover",
            Self::Promoted { .. } => "promoted",
            Self::RetryLocal => "retry_local",
            Self::PoolExhausted => "pool_exhausted",
        }
    }

    pub fn next(&self) -> Option<&Credential> {
        match self {
            Self::Failover { next } | Self::Promoted { next, .. } => Some(next),
            Self::RetryLocal | Self::PoolExhausted => None,
        }
    }
}

/// Applies classified failures to the store and finds the next credential,
/// promoting a backup when the target has nothing healthy left.
pub struct FailoverExecutor {
    store: Arc<dyn PoolStore>,
    resolver: Resolver,
    retention: Duration,
    // Один мьютекс на target: промоушены одного target идут строго по очереди
    promotion_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl FailoverExecutor {
    pub fn new(store: Arc<dyn PoolStore>, resolver: Resolver, retention: Duration) -> Self {
        Self {
            store,
            resolver,
            retention,
            promotion_locks: DashMap::new(),
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Classifies `signal` and writes the resulting status if it differs.
    ///
    /// Returns the verdict together with the failing credential as stored
    /// after the update. `NotFound` when the credential no longer exists.
    pub async fn record_failure(
        &self,
        credential_id: &str,
        signal: FailureSignal,
    ) -> Result<(HealthVerdict, Credential)> {
        let verdict = classify(signal);
        let credential = self.store.get_credential(credential_id).await?;

        let credential = match verdict.status {
            Some(status) if status != credential.status => {
                let updated = self
                    .store
                    .update_status(credential_id, status, Utc::now())
                    .await?;
                metrics::record_status_transition(status);
                info!(
                    credential_id,
                    credential.preview = %updated.preview(),
                    from = %credential.status,
                    to = %status,
                    signal = signal.as_str(),
                    "Credential status changed"
                );
                updated
            }
            _ => credential,
        };

        Ok((verdict, credential))
    }

    /// Full failover step for one reported failure.
    #[instrument(level = "info", skip(self, signal), fields(signal = signal.as_str()))]
    pub async fn on_failure(
        &self,
        target_id: &str,
        credential_id: &str,
        signal: FailureSignal,
    ) -> Result<FailoverOutcome> {
        let (verdict, failing) = self.record_failure(credential_id, signal).await?;
        let outcome = self.advance(target_id, &failing, verdict).await?;
        metrics::record_failover(outcome.as_str());
        Ok(outcome)
    }

    async fn advance(
        &self,
        target_id: &str,
        failing: &Credential,
        verdict: HealthVerdict,
    ) -> Result<FailoverOutcome> {
        if !verdict.should_failover {
            debug!("Signal does not warrant failover, retry locally");
            return Ok(FailoverOutcome::RetryLocal);
        }

        if let Some(next) = self.try_resolve(target_id).await? {
            return Ok(FailoverOutcome::Failover { next });
        }

        if !verdict.should_draw_backup {
            warn!("No healthy credential left and signal does not allow a backup draw");
            return Ok(FailoverOutcome::PoolExhausted);
        }

        let lock = self
            .promotion_locks
            .entry(target_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let outcome = {
            let _guard = lock.lock().await;
            self.promote_locked(target_id, failing).await
        };
        drop(lock);
        // Запись живёт, пока её кто-то держит или ждёт
        self.promotion_locks
            .remove_if(target_id, |_, lock| Arc::strong_count(lock) == 1);
        outcome
    }

    /// Runs under the per-target promotion lock.
    async fn promote_locked(
        &self,
        target_id: &str,
        failing: &Credential,
    ) -> Result<FailoverOutcome> {
        // A concurrent promotion may have refilled the target while we waited.
        if let Some(next) = self.try_resolve(target_id).await? {
            debug!(credential_id = %next.id, "Target refilled by a concurrent promotion");
            return Ok(FailoverOutcome::Failover { next });
        }

        let drawn = self
            .store
            .draw_backup(&failing.provider, target_id, Utc::now(), self.retention)
            .await?;
        let Some(backup) = drawn else {
            metrics::record_backup_draw("exhausted");
            warn!(provider = %failing.provider, "Backup reserve exhausted");
            return Ok(FailoverOutcome::PoolExhausted);
        };
        metrics::record_backup_draw("drawn");

        let next = self.promote(target_id, &backup).await?;
        Ok(FailoverOutcome::Promoted {
            next,
            backup_id: backup.id,
        })
    }

    async fn try_resolve(&self, target_id: &str) -> Result<Option<Credential>> {
        match self.resolver.resolve(target_id).await {
            Ok(credential) => Ok(Some(credential)),
            Err(AppError::NoHealthyCredential { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Copies a drawn backup into the credential store and binds it after
    /// every existing binding of the target.
    async fn promote(&self, target_id: &str, backup: &BackupCredential) -> Result<Credential> {
        let now = Utc::now();
        let suffix = Uuid::new_v4().simple().to_string();
        let credential = Credential::new(
            format!("{}-{}", backup.id, &suffix[..8]),
            backup.secret.expose_secret().clone(),
            backup.provider.clone(),
            now,
        );

        if let Err(e) = self.store.create_credential(credential.clone()).await {
            error!(
                backup_id = %backup.id,
                error = %e,
                "Drawn backup could not be stored as a credential"
            );
            self.undo_promotion(backup, None).await;
            return Err(e);
        }

        let priority = match self.bind_promoted(target_id, &credential.id, now).await {
            Ok(priority) => priority,
            Err(e) => {
                error!(
                    backup_id = %backup.id,
                    credential_id = %credential.id,
                    error = %e,
                    "Promoted credential could not be bound to target"
                );
                self.undo_promotion(backup, Some(&credential.id)).await;
                return Err(e);
            }
        };

        info!(
            backup_id = %backup.id,
            credential_id = %credential.id,
            credential.preview = %credential.preview(),
            priority,
            "Backup promoted into target"
        );
        Ok(credential)
    }

    async fn bind_promoted(
        &self,
        target_id: &str,
        credential_id: &str,
        now: DateTime<Utc>,
    ) -> Result<u32> {
        let priority = self
            .store
            .list_bindings_for_target(target_id)
            .await?
            .iter()
            .map(|b| b.priority)
            .max()
            .map_or(1, |max| max.saturating_add(1));
        let binding = Binding::new(
            target_id.to_string(),
            credential_id.to_string(),
            priority,
            now,
        )?;
        self.store.create_binding(binding).await?;
        Ok(priority)
    }

    /// Best-effort rollback of a half-done promotion: the copied credential
    /// goes away and the backup returns to the reserve.
    async fn undo_promotion(&self, backup: &BackupCredential, credential_id: Option<&str>) {
        if let Some(credential_id) = credential_id {
            if let Err(e) = self.store.delete_credential(credential_id).await {
                warn!(credential_id, error = %e, "Failed to remove orphaned promoted credential");
            }
        }
        match self.store.restore_backup(&backup.id).await {
            Ok(_) => info!(backup_id = %backup.id, "Backup returned to the reserve"),
            Err(e) => warn!(
                backup_id = %backup.id,
                error = %e,
                "Failed to return backup to the reserve"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{
        BackupFilter, BackupStore, BindingStore, CredentialStatus, CredentialStore, InMemoryStore,
        Provider,
    };
    use async_trait::async_trait;

    async fn seed(store: &InMemoryStore, keys: &[(&str, u32)], backups: &[&str]) {
        let now = Utc::now();
        for (id, priority) in keys {
            store
                .create_credential(Credential::new(
                    id.to_string(),
                    format!("secret-for-{id}"),
                    Provider::OhMyGpt,
                    now,
                ))
                .await
                .unwrap();
            store
                .create_binding(Binding::new("t".into(), id.to_string(), *priority, now).unwrap())
                .await
                .unwrap();
        }
        for id in backups {
            store
                .create_backup(BackupCredential::new(
                    id.to_string(),
                    format!("backup-secret-{id}"),
                    Provider::OhMyGpt,
                    now,
                ))
                .await
                .unwrap();
        }
    }

    async fn executor_with(
        keys: &[(&str, u32)],
        backups: &[&str],
    ) -> (Arc<InMemoryStore>, FailoverExecutor) {
        let store = Arc::new(InMemoryStore::new());
        seed(&store, keys, backups).await;
        let executor = FailoverExecutor::new(
            store.clone(),
            Resolver::new(store.clone()),
            Duration::hours(24),
        );
        (store, executor)
    }

    #[tokio::test]
    async fn test_unknown_signal_leaves_state_alone() {
        let (store, executor) = executor_with(&[("k1", 1)], &[]).await;
        let outcome = executor
            .on_failure("t", "k1", FailureSignal::Unknown)
            .await
            .unwrap();

        assert!(matches!(outcome, FailoverOutcome::RetryLocal));
        let k1 = store.get_credential("k1").await.unwrap();
        assert_eq!(k1.status, CredentialStatus::Healthy);
        assert!(k1.last_failure_at.is_none());
    }

    #[tokio::test]
    async fn test_rate_limit_without_alternative_is_exhausted_and_keeps_backups() {
        let (store, executor) = executor_with(&[("k1", 1)], &["b1"]).await;
        let outcome = executor
            .on_failure("t", "k1", FailureSignal::RateLimited)
            .await
            .unwrap();

        assert!(matches!(outcome, FailoverOutcome::PoolExhausted));
        assert!(store.get_backup("b1").await.unwrap().is_available());
    }

    #[tokio::test]
    async fn test_promotion_binds_after_existing_priorities() {
        let (store, executor) = executor_with(&[("k1", 1), ("k5", 5)], &["b1"]).await;
        store.set_binding_active("t", "k5", false).await.unwrap();

        let outcome = executor
            .on_failure("t", "k1", FailureSignal::Forbidden)
            .await
            .unwrap();
        let FailoverOutcome::Promoted { next, backup_id } = outcome else {
            panic!("expected promotion, got {outcome:?}");
        };

        assert_eq!(backup_id, "b1");
        assert!(next.id.starts_with("b1-"));
        assert_eq!(next.id.len(), "b1-".len() + 8);
        assert_eq!(next.secret.expose_secret(), "backup-secret-b1");

        let bindings = store.list_bindings_for_target("t").await.unwrap();
        let promoted = bindings.iter().find(|b| b.credential_id == next.id).unwrap();
        assert_eq!(promoted.priority, 6);
        assert!(promoted.is_active);

        let backup = store.get_backup("b1").await.unwrap();
        assert_eq!(backup.used_for.as_deref(), Some("t"));
    }

    #[tokio::test]
    async fn test_missing_credential_is_not_found() {
        let (_store, executor) = executor_with(&[], &[]).await;
        assert!(matches!(
            executor.on_failure("t", "ghost", FailureSignal::Unauthorized).await,
            Err(AppError::NotFound { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_failures_promote_once() {
        let (store, executor) = executor_with(&[("k1", 1)], &["b1", "b2", "b3"]).await;
        let executor = Arc::new(executor);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let executor = executor.clone();
                tokio::spawn(async move {
                    executor
                        .on_failure("t", "k1", FailureSignal::QuotaExceeded)
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut promoted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                FailoverOutcome::Promoted { .. } => promoted += 1,
                FailoverOutcome::Failover { .. } => {}
                other => panic!("unexpected outcome {other:?}"),
            }
        }

        assert_eq!(promoted, 1);
        let available = store
            .list_backups(None, BackupFilter::Available)
            .await
            .unwrap();
        assert_eq!(available.len(), 2);
        assert!(executor.promotion_locks.is_empty());
    }

    /// Delegates to `InMemoryStore` but refuses to bind promoted credentials.
    struct FailingBindStore {
        inner: InMemoryStore,
    }

    #[async_trait]
    impl CredentialStore for FailingBindStore {
        async fn get_credential(&self, id: &str) -> Result<Credential> {
            self.inner.get_credential(id).await
        }
        async fn list_credentials(&self, provider: Option<&Provider>) -> Result<Vec<Credential>> {
            self.inner.list_credentials(provider).await
        }
        async fn create_credential(&self, credential: Credential) -> Result<()> {
            self.inner.create_credential(credential).await
        }
        async fn update_status(
            &self,
            id: &str,
            status: CredentialStatus,
            now: DateTime<Utc>,
        ) -> Result<Credential> {
            self.inner.update_status(id, status, now).await
        }
        async fn increment_usage(
            &self,
            id: &str,
            tokens: u64,
            requests: u64,
        ) -> Result<Credential> {
            self.inner.increment_usage(id, tokens, requests).await
        }
        async fn reset_credential(&self, id: &str) -> Result<Credential> {
            self.inner.reset_credential(id).await
        }
        async fn delete_credential(&self, id: &str) -> Result<()> {
            self.inner.delete_credential(id).await
        }
    }

    #[async_trait]
    impl BackupStore for FailingBindStore {
        async fn get_backup(&self, id: &str) -> Result<BackupCredential> {
            self.inner.get_backup(id).await
        }
        async fn list_backups(
            &self,
            provider: Option<&Provider>,
            filter: BackupFilter,
        ) -> Result<Vec<BackupCredential>> {
            self.inner.list_backups(provider, filter).await
        }
        async fn create_backup(&self, backup: BackupCredential) -> Result<()> {
            self.inner.create_backup(backup).await
        }
        async fn draw_backup(
            &self,
            provider: &Provider,
            target_id: &str,
            now: DateTime<Utc>,
            retention: Duration,
        ) -> Result<Option<BackupCredential>> {
            self.inner.draw_backup(provider, target_id, now, retention).await
        }
        async fn restore_backup(&self, id: &str) -> Result<BackupCredential> {
            self.inner.restore_backup(id).await
        }
        async fn delete_backup(&self, id: &str) -> Result<()> {
            self.inner.delete_backup(id).await
        }
        async fn reap_backups(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
            self.inner.reap_backups(now).await
        }
    }

    #[async_trait]
    impl BindingStore for FailingBindStore {
        async fn create_binding(&self, binding: Binding) -> Result<()> {
            if binding.credential_id.starts_with("b1-") {
                return Err(AppError::RedisConnection {
                    message: "connection reset".into(),
                });
            }
            self.inner.create_binding(binding).await
        }
        async fn set_binding_active(
            &self,
            target_id: &str,
            credential_id: &str,
            is_active: bool,
        ) -> Result<Binding> {
            self.inner
                .set_binding_active(target_id, credential_id, is_active)
                .await
        }
        async fn delete_binding(&self, target_id: &str, credential_id: &str) -> Result<()> {
            self.inner.delete_binding(target_id, credential_id).await
        }
        async fn list_bindings_for_target(&self, target_id: &str) -> Result<Vec<Binding>> {
            self.inner.list_bindings_for_target(target_id).await
        }
        async fn list_all_bindings(&self) -> Result<Vec<Binding>> {
            self.inner.list_all_bindings().await
        }
    }

    #[tokio::test]
    async fn test_failed_bind_returns_backup_to_reserve() {
        let store = Arc::new(FailingBindStore {
            inner: InMemoryStore::new(),
        });
        seed(&store.inner, &[("k1", 1)], &["b1"]).await;
        let executor = FailoverExecutor::new(
            store.clone(),
            Resolver::new(store.clone()),
            Duration::hours(24),
        );

        let result = executor
            .on_failure("t", "k1", FailureSignal::Unauthorized)
            .await;
        assert!(matches!(result, Err(AppError::RedisConnection { .. })));

        let backup = store.get_backup("b1").await.unwrap();
        assert!(backup.is_available());
        assert!(backup.used_for.is_none());
        let ids: Vec<_> = store
            .list_credentials(None)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec!["k1".to_string()]);

        // The restored backup is drawn again on the next failure
        let retry = executor
            .on_failure("t", "k1", FailureSignal::Unauthorized)
            .await;
        assert!(matches!(retry, Err(AppError::RedisConnection { .. })));
        assert!(store.get_backup("b1").await.unwrap().is_available());
        assert!(executor.promotion_locks.is_empty());
    }
}
