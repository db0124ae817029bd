//! Errors raised by the reconciliation engine itself

use cloudcrd_common::ResourceKind;
use thiserror::Error;

/// A string could not be parsed as an object key
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    /// Key had no name component
    #[error("object key '{0}' has an empty name")]
    EmptyName(String),

    /// Key had more than one `/`
    #[error("unexpected object key format: '{0}'")]
    Malformed(String),

    /// Object carried no `metadata.name`
    #[error("object has no name")]
    Unnamed,
}

/// Supervisor lifecycle errors
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Caches did not report initial sync before the startup deadline
    #[error("timed out after {timeout_secs}s waiting for caches to sync: {kinds:?}")]
    CacheSyncTimeout {
        /// Kinds whose cache was still unsynced
        kinds: Vec<ResourceKind>,
        /// Configured deadline
        timeout_secs: u64,
    },

    /// The same kind was registered twice
    #[error("a reconcile unit for {0} is already registered")]
    DuplicateKind(ResourceKind),

    /// Shutdown was requested before startup completed
    #[error("shutdown requested during startup")]
    Cancelled,
}
