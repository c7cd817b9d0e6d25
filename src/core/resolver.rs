// src/core/resolver.rs

use crate::error::{AppError, Result};
use crate::metrics;
use crate::storage::{Binding, Credential, PoolStore};
use std::sync::Arc;
use tracing::{debug, instrument, trace};

/// Active bindings in routing order: priority ascending, then credential id.
///
/// The id tie-break makes the order total, so every process picks the same
/// primary for identical state.
pub fn rank_bindings(bindings: Vec<Binding>) -> Vec<Binding> {
    let mut active: Vec<Binding> = bindings.into_iter().filter(|b| b.is_active).collect();
    active.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then_with(|| a.credential_id.cmp(&b.credential_id))
    });
    active
}

/// Picks the credential that should serve the next request for a target.
///
/// Read-only: every call reflects the latest committed state and nothing is
/// cached between calls.
#[derive(Clone)]
pub struct Resolver {
    store: Arc<dyn PoolStore>,
}

impl Resolver {
    pub fn new(store: Arc<dyn PoolStore>) -> Self {
        Self { store }
    }

    /// Returns the best healthy credential or `NoHealthyCredential`.
    #[instrument(level = "debug", skip(self))]
    pub async fn resolve(&self, target_id: &str) -> Result<Credential> {
        let ranked = rank_bindings(self.store.list_bindings_for_target(target_id).await?);
        trace!(candidates = ranked.len(), "Ranked active bindings");

        for binding in &ranked {
            let credential = match self.store.get_credential(&binding.credential_id).await {
                Ok(credential) => credential,
                // Dangling binding: the credential was deleted underneath it.
                Err(AppError::NotFound { .. }) => {
                    trace!(credential_id = %binding.credential_id, "Skipping dangling binding");
                    continue;
                }
                Err(e) => return Err(e),
            };
            if credential.is_routable() {
                debug!(
                    credential_id = %credential.id,
                    credential.preview = %credential.preview(),
                    priority = binding.priority,
                    "Resolved credential for target"
                );
                metrics::record_resolution("hit");
                return Ok(credential);
            }
        }

        debug!("No healthy credential for target");
        metrics::record_resolution("miss");
        Err(AppError::NoHealthyCredential {
            target_id: target_id.to_string(),
        })
    }
}
