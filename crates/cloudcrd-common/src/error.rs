//! Error types for the cloudcrd controllers
//!
//! Reconcilers return [`ReconcileError`] up to the worker boundary, which is
//! the only place an error is turned into "retry with backoff" or "drop".

use thiserror::Error;

/// Error returned by a reconciliation attempt
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The Project referenced by an Instance or Database is not in the cache
    #[error("project '{namespace}/{name}' not found")]
    ProjectNotFound {
        /// Namespace the lookup was made in
        namespace: String,
        /// Referenced project name (after defaulting)
        name: String,
    },

    /// Service-account credentials could not be resolved
    #[error("credentials for project '{project}': {message}")]
    Credentials {
        /// Project key (`namespace/name`) whose credentials failed
        project: String,
        /// Description of what failed (missing secret, malformed key, ...)
        message: String,
    },

    /// A provider call failed with something other than an absence signal
    #[error("provider error during {action} of '{resource}': {message}")]
    Provider {
        /// What was attempted (get, create, delete, list)
        action: String,
        /// Provider-side name of the resource
        resource: String,
        /// Underlying provider message
        message: String,
    },

    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// The object can never be reconciled as declared
    #[error("validation error: {0}")]
    Validation(String),

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Where the error occurred (e.g. "worker", "dispatch")
        context: String,
        /// Description of what failed
        message: String,
    },
}

impl ReconcileError {
    /// Create a project-not-found error
    pub fn project_not_found(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::ProjectNotFound {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Create a credentials error for the given project key
    pub fn credentials(project: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Credentials {
            project: project.into(),
            message: message.into(),
        }
    }

    /// Create a provider error
    pub fn provider(
        action: impl Into<String>,
        resource: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Provider {
            action: action.into(),
            resource: resource.into(),
            message: message.into(),
        }
    }

    /// Create an internal error with context
    pub fn internal(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Internal {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Whether the key should be re-queued with backoff.
    ///
    /// Configuration errors (missing project or credentials) are retried on
    /// the same schedule as transient provider failures: the missing object
    /// may appear later. Only validation errors are dropped.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ReconcileError::Validation(_))
    }
}
