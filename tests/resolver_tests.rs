// tests/resolver_tests.rs

mod common;

use chrono::Utc;
use common::TestPool;
use key_relay::storage::{BindingStore, CredentialStatus, CredentialStore};
use key_relay::AppError;

#[tokio::test]
async fn test_priority_order_and_demotion() {
    let t = TestPool::new();
    t.bound("T", "k-prio-3", 3).await;
    t.bound("T", "k-prio-1", 1).await;
    t.bound("T", "k-prio-2", 2).await;

    for _ in 0..5 {
        assert_eq!(t.pool.resolve("T").await.unwrap().id, "k-prio-1");
    }

    t.store
        .update_status("k-prio-1", CredentialStatus::Exhausted, Utc::now())
        .await
        .unwrap();
    assert_eq!(t.pool.resolve("T").await.unwrap().id, "k-prio-2");
}

#[tokio::test]
async fn test_tie_break_is_deterministic() {
    let t = TestPool::new();
    t.bound("T", "zeta", 1).await;
    t.bound("T", "alpha", 1).await;
    t.bound("T", "mid", 1).await;

    for _ in 0..20 {
        assert_eq!(t.pool.resolve("T").await.unwrap().id, "alpha");
    }
}

#[tokio::test]
async fn test_inactive_and_deleted_credentials_are_never_returned() {
    let t = TestPool::new();
    t.bound("T", "k1", 1).await;
    t.bound("T", "k2", 2).await;

    t.pool.toggle_binding("T", "k1", false).await.unwrap();
    t.pool.delete_credential("k2").await.unwrap();

    assert!(matches!(
        t.pool.resolve("T").await,
        Err(AppError::NoHealthyCredential { .. })
    ));

    // The dangling binding stays in the table, it is only skipped.
    assert_eq!(t.store.list_bindings_for_target("T").await.unwrap().len(), 2);

    t.pool.toggle_binding("T", "k1", true).await.unwrap();
    assert_eq!(t.pool.resolve("T").await.unwrap().id, "k1");
}

#[tokio::test]
async fn test_reset_returns_credential_to_rotation() {
    let t = TestPool::new();
    t.bound("T", "k1", 1).await;
    t.bound("T", "k2", 2).await;
    t.store
        .update_status("k1", CredentialStatus::Banned, Utc::now())
        .await
        .unwrap();
    assert_eq!(t.pool.resolve("T").await.unwrap().id, "k2");

    t.pool.reset_credential("k1").await.unwrap();
    assert_eq!(t.pool.resolve("T").await.unwrap().id, "k1");
}

#[tokio::test]
async fn test_targets_are_independent() {
    let t = TestPool::new();
    t.bound("A", "shared", 2).await;
    t.bind("B", "shared", 1).await;
    t.bound("A", "only-a", 1).await;

    assert_eq!(t.pool.resolve("A").await.unwrap().id, "only-a");
    assert_eq!(t.pool.resolve("B").await.unwrap().id, "shared");
}
