// src/state.rs

use crate::config::AppConfig;
use crate::error::Result;
use crate::pool::KeyPool;
use crate::storage::{InMemoryStore, PoolStore};
use std::sync::Arc;
use tracing::info;

/// Shared application state accessible by all Axum handlers.
pub struct AppState {
    pub config: AppConfig,
    pub pool: Arc<KeyPool>,
}

impl AppState {
    /// Picks the storage backend from the config and builds the pool on top of it.
    pub async fn new(config: &AppConfig) -> Result<Self> {
        let store = build_store(config).await?;
        Ok(Self::with_store(config.clone(), store))
    }

    /// State over an already constructed store.
    pub fn with_store(config: AppConfig, store: Arc<dyn PoolStore>) -> Self {
        let pool = Arc::new(KeyPool::new(store, &config.pool));
        Self { config, pool }
    }
}

#[cfg(feature = "redis")]
async fn build_store(config: &AppConfig) -> Result<Arc<dyn PoolStore>> {
    let Some(redis_url) = config.redis_url.as_deref() else {
        info!("No redis_url configured, using the in-memory store");
        return Ok(Arc::new(InMemoryStore::new()));
    };

    let pool = deadpool_redis::Config::from_url(redis_url)
        .create_pool(Some(deadpool_redis::Runtime::Tokio1))?;
    let store = crate::storage::RedisStore::new(pool, config.key_prefix()).await?;
    info!(redis.key_prefix = config.key_prefix(), "Redis persistence is enabled");
    Ok(Arc::new(store))
}

#[cfg(not(feature = "redis"))]
async fn build_store(config: &AppConfig) -> Result<Arc<dyn PoolStore>> {
    if config.redis_url.is_some() {
        tracing::warn!("redis_url is set but the binary was built without the `redis` feature; using the in-memory store");
    } else {
        info!("No redis_url configured, using the in-memory store");
    }
    Ok(Arc::new(InMemoryStore::new()))
}
