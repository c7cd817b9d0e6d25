// src/core/mod.rs

pub mod classifier;
pub mod failover;
pub mod reaper;
pub mod resolver;
pub mod session;

pub use classifier::{classify, FailureSignal, HealthVerdict};
pub use failover::{FailoverExecutor, FailoverOutcome};
pub use reaper::BackupReaper;
pub use resolver::{rank_bindings, Resolver};
pub use session::{FailoverSession, NextAttempt};
