//! Typed errors a caller branches on.
//!
//! Transient backend failures (cache/storage) stay as `anyhow::Error` on
//! the [`Cache`](super::cache::Cache) / [`DurableStore`](super::durable::DurableStore)
//! traits themselves -- the caller only ever needs to know "it failed" at
//! that boundary, same as `MapDataStore` upstream. These types are for
//! outcomes a caller matches on and branches behavior by.

/// Result of running an action through the permission evaluator.
#[derive(Debug, thiserror::Error)]
pub enum PermissionError {
    /// §4.9: evaluator ran and denied the action.
    #[error("permission denied")]
    Denied,
    /// §4.9: evaluator itself failed.
    #[error("permission evaluator error: {0}")]
    EvaluatorFailed(String),
}
