// src/storage/traits.rs

use crate::error::Result;
use crate::storage::{
    BackupCredential, BackupFilter, Binding, Credential, CredentialStatus, Provider,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

/// Durable record of every provider key.
///
/// Mutations on one id are linearizable; there is no cross-credential transaction.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Fetch a credential, `NotFound` if it does not exist
    async fn get_credential(&self, id: &str) -> Result<Credential>;

    /// List credentials, optionally narrowed to one provider, ordered by id
    async fn list_credentials(&self, provider: Option<&Provider>) -> Result<Vec<Credential>>;

    /// Insert a new credential, `DuplicateId` if the id is taken
    async fn create_credential(&self, credential: Credential) -> Result<()>;

    /// Overwrite the health status and return the updated record
    async fn update_status(
        &self,
        id: &str,
        status: CredentialStatus,
        now: DateTime<Utc>,
    ) -> Result<Credential>;

    /// Add to the usage counters
    async fn increment_usage(&self, id: &str, tokens: u64, requests: u64) -> Result<Credential>;

    /// Back to healthy with zeroed counters
    async fn reset_credential(&self, id: &str) -> Result<Credential>;

    /// Hard delete
    async fn delete_credential(&self, id: &str) -> Result<()>;
}

/// Reserve of spare secrets not yet bound to any target.
#[async_trait]
pub trait BackupStore: Send + Sync {
    async fn get_backup(&self, id: &str) -> Result<BackupCredential>;

    /// Oldest first
    async fn list_backups(
        &self,
        provider: Option<&Provider>,
        filter: BackupFilter,
    ) -> Result<Vec<BackupCredential>>;

    async fn create_backup(&self, backup: BackupCredential) -> Result<()>;

    /// Atomically claim the oldest available backup of `provider`.
    ///
    /// Returns `Ok(None)` when the reserve is exhausted. A backup is never
    /// handed to two callers.
    async fn draw_backup(
        &self,
        provider: &Provider,
        target_id: &str,
        now: DateTime<Utc>,
        retention: Duration,
    ) -> Result<Option<BackupCredential>>;

    /// used -> available. `NotFound` or `AlreadyAvailable` otherwise.
    async fn restore_backup(&self, id: &str) -> Result<BackupCredential>;

    async fn delete_backup(&self, id: &str) -> Result<()>;

    /// Delete every used backup whose deadline has passed. Returns the removed ids.
    async fn reap_backups(&self, now: DateTime<Utc>) -> Result<Vec<String>>;
}

/// Many-to-many mapping of routing targets to credentials.
#[async_trait]
pub trait BindingStore: Send + Sync {
    /// Conditional insert, `DuplicateBinding` if the pair exists
    async fn create_binding(&self, binding: Binding) -> Result<()>;

    async fn set_binding_active(
        &self,
        target_id: &str,
        credential_id: &str,
        is_active: bool,
    ) -> Result<Binding>;

    async fn delete_binding(&self, target_id: &str, credential_id: &str) -> Result<()>;

    async fn list_bindings_for_target(&self, target_id: &str) -> Result<Vec<Binding>>;

    /// Every binding, ordered by target then credential id
    async fn list_all_bindings(&self) -> Result<Vec<Binding>>;
}

/// A single backend serving all three collections.
pub trait PoolStore: CredentialStore + BackupStore + BindingStore {}

impl<T> PoolStore for T where T: CredentialStore + BackupStore + BindingStore {}
