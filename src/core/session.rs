// src/core/session.rs

use crate::core::classifier::FailureSignal;
use crate::core::failover::FailoverOutcome;
use crate::error::{AppError, Result};
use crate::pool::KeyPool;
use crate::storage::Credential;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// What the request path should try next.
#[derive(Debug, Clone)]
pub enum NextAttempt {
    /// Send the request to this credential.
    Switch(Credential),
    /// Same credential, after the caller's own backoff.
    RetryLocal,
}

/// Retry budget for one inbound request.
///
/// Counts failover hops and stops at `max_hops`; checks the cancellation
/// token before every hop.
pub struct FailoverSession {
    pool: Arc<KeyPool>,
    target_id: String,
    max_hops: u32,
    hops: u32,
    cancel: CancellationToken,
}

impl FailoverSession {
    pub fn new(
        pool: Arc<KeyPool>,
        target_id: impl Into<String>,
        max_hops: u32,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            pool,
            target_id: target_id.into(),
            max_hops,
            hops: 0,
            cancel,
        }
    }

    /// Session bounded by the pool's configured hop budget.
    pub fn with_pool_budget(
        pool: Arc<KeyPool>,
        target_id: impl Into<String>,
        cancel: CancellationToken,
    ) -> Self {
        let max_hops = pool.max_failover_hops();
        Self::new(pool, target_id, max_hops, cancel)
    }

    pub fn hops(&self) -> u32 {
        self.hops
    }

    /// First credential to try.
    pub async fn current(&self) -> Result<Credential> {
        self.ensure_not_cancelled()?;
        self.pool.resolve(&self.target_id).await
    }

    /// Reports a failed attempt and returns what to try next.
    ///
    /// `PoolExhausted` is terminal: the budget is spent or nothing is left.
    pub async fn report_failure(
        &mut self,
        credential_id: &str,
        signal: FailureSignal,
    ) -> Result<NextAttempt> {
        self.ensure_not_cancelled()?;

        if self.hops >= self.max_hops {
            // Бюджет исчерпан: статус всё равно записываем, но резерв не трогаем
            let (verdict, _) = self
                .pool
                .executor()
                .record_failure(credential_id, signal)
                .await?;
            if !verdict.should_failover {
                return Ok(NextAttempt::RetryLocal);
            }
            warn!(
                target_id = %self.target_id,
                hops = self.hops,
                "Failover budget spent for this request"
            );
            return Err(self.exhausted());
        }

        let outcome = self
            .pool
            .on_failure(&self.target_id, credential_id, signal)
            .await?;

        match outcome {
            FailoverOutcome::Failover { next } | FailoverOutcome::Promoted { next, .. } => {
                self.hops += 1;
                debug!(
                    target_id = %self.target_id,
                    hops = self.hops,
                    next = %next.id,
                    "Switching credential"
                );
                // The state change stands, but no new upstream attempt after cancellation.
                self.ensure_not_cancelled()?;
                Ok(NextAttempt::Switch(next))
            }
            FailoverOutcome::RetryLocal => Ok(NextAttempt::RetryLocal),
            FailoverOutcome::PoolExhausted => Err(self.exhausted()),
        }
    }

    fn ensure_not_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        Ok(())
    }

    fn exhausted(&self) -> AppError {
        AppError::PoolExhausted {
            target_id: self.target_id.clone(),
        }
    }
}
