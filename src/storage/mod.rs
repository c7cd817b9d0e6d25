// src/storage/mod.rs

pub mod memory;
pub mod models;
#[cfg(feature = "redis")]
pub mod redis;
pub mod traits;

pub use memory::InMemoryStore;
pub use models::{
    preview_secret, BackupCredential, BackupFilter, Binding, Credential, CredentialStatus,
    Provider,
};
#[cfg(feature = "redis")]
pub use self::redis::RedisStore;
pub use traits::{BackupStore, BindingStore, CredentialStore, PoolStore};
