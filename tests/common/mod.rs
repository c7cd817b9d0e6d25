//! Common test utilities and fixtures
#![allow(dead_code)]

use chrono::{DateTime, Utc};
use key_relay::{
    config::AppConfig,
    storage::{
        BackupCredential, BackupStore, Binding, BindingStore, Credential, CredentialStore,
        InMemoryStore, Provider,
    },
    AppState, KeyPool,
};
use std::sync::Arc;

/// Test configuration builder
pub struct TestConfigBuilder {
    config: AppConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        let mut config = AppConfig::default();
        config.server.test_mode = true;
        Self { config }
    }

    pub fn with_retention_hours(mut self, hours: u64) -> Self {
        self.config.pool.backup_retention_hours = hours;
        self
    }

    pub fn with_max_hops(mut self, hops: u32) -> Self {
        self.config.pool.max_failover_hops = hops;
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// In-memory pool with a handle on the raw store for direct seeding and assertions
pub struct TestPool {
    pub store: Arc<InMemoryStore>,
    pub pool: Arc<KeyPool>,
    pub state: Arc<AppState>,
}

impl TestPool {
    pub fn new() -> Self {
        Self::with_config(TestConfigBuilder::new().build())
    }

    pub fn with_config(config: AppConfig) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let state = Arc::new(AppState::with_store(config, store.clone()));
        let pool = state.pool.clone();
        Self { store, pool, state }
    }

    pub fn router(&self) -> axum::Router {
        key_relay::create_router(self.state.clone())
    }

    pub async fn credential(&self, id: &str) -> Credential {
        self.credential_for(id, Provider::OhMyGpt).await
    }

    pub async fn credential_for(&self, id: &str, provider: Provider) -> Credential {
        let credential = Credential::new(id.into(), secret_for(id), provider, Utc::now());
        self.store.create_credential(credential.clone()).await.unwrap();
        credential
    }

    pub async fn bind(&self, target_id: &str, credential_id: &str, priority: u32) {
        let binding =
            Binding::new(target_id.into(), credential_id.into(), priority, Utc::now()).unwrap();
        self.store.create_binding(binding).await.unwrap();
    }

    /// Credential plus an active binding on `target_id`
    pub async fn bound(&self, target_id: &str, credential_id: &str, priority: u32) {
        self.credential(credential_id).await;
        self.bind(target_id, credential_id, priority).await;
    }

    pub async fn backup(&self, id: &str) {
        self.backup_at(id, Provider::OhMyGpt, Utc::now()).await;
    }

    pub async fn backup_at(&self, id: &str, provider: Provider, created_at: DateTime<Utc>) {
        let backup = BackupCredential::new(id.into(), secret_for(id), provider, created_at);
        self.store.create_backup(backup).await.unwrap();
    }
}

impl Default for TestPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Deterministic secret long enough to be masked as `sk-t...{id}`
pub fn secret_for(id: &str) -> String {
    format!("sk-test-secret-{id}")
}

/// Test utilities for HTTP requests
pub mod http {
    use axum::{body::Body, http::Request};
    use serde_json::Value;

    pub fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    pub fn get_request(uri: &str) -> Request<Body> {
        Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    pub fn empty_request(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }
}

/// Test assertions and utilities
pub mod assertions {
    use axum::{body::to_bytes, response::Response};
    use serde_json::Value;

    pub async fn assert_json_response(response: Response, expected_status: u16) -> Value {
        assert_eq!(response.status().as_u16(), expected_status);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).expect("Response body should be valid JSON")
    }

    pub async fn assert_error_response(
        response: Response,
        expected_status: u16,
        error_type: &str,
    ) -> Value {
        let json = assert_json_response(response, expected_status).await;

        assert!(json.get("type").is_some(), "Error response should have 'type' field");
        assert_eq!(
            json["type"].as_str().unwrap(),
            error_type,
            "Error type mismatch"
        );
        json
    }
}
