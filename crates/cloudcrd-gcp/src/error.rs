//! Provider error types
//!
//! Every failed call is classified exactly once, where the HTTP response is
//! received. Callers match on [`ErrorClass`] instead of inspecting status
//! codes themselves.

use thiserror::Error;

/// Closed classification of a failed provider call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// HTTP 404: the resource does not exist
    NotFound,
    /// HTTP 403: permission denied (sometimes also means "does not exist")
    Forbidden,
    /// Anything else, including transport and authentication failures
    Other,
}

impl ErrorClass {
    /// Classify an HTTP status code
    pub fn from_status(status: u16) -> Self {
        match status {
            404 => ErrorClass::NotFound,
            403 => ErrorClass::Forbidden,
            _ => ErrorClass::Other,
        }
    }
}

/// Service-account credential errors
#[derive(Debug, Error)]
pub enum CredentialError {
    /// Key JSON could not be parsed
    #[error("malformed service account key: {0}")]
    MalformedKey(String),

    /// Private key could not be used for signing
    #[error("invalid private key for '{client_email}': {message}")]
    InvalidKey {
        /// Service account the key belongs to
        client_email: String,
        /// Underlying signing error
        message: String,
    },

    /// The token endpoint rejected the assertion or was unreachable
    #[error("token exchange failed: {0}")]
    TokenExchange(String),
}

/// A failed call against a Google API
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The API answered with an error status
    #[error("{action} '{resource}' failed with HTTP {status}: {message}")]
    Api {
        /// Operation attempted (get, insert, delete, list)
        action: &'static str,
        /// Name of the resource acted on
        resource: String,
        /// HTTP status code
        status: u16,
        /// Classification derived from `status`
        class: ErrorClass,
        /// Message from the error body, or the raw body
        message: String,
    },

    /// The request never got an answer, or the answer could not be decoded
    #[error("{action} '{resource}' failed: {message}")]
    Transport {
        /// Operation attempted
        action: &'static str,
        /// Name of the resource acted on
        resource: String,
        /// Description of the failure
        message: String,
    },

    /// No access token could be obtained
    #[error(transparent)]
    Credentials(#[from] CredentialError),
}

impl ProviderError {
    /// Build an API error, classifying `status`
    pub fn api(
        action: &'static str,
        resource: impl Into<String>,
        status: u16,
        message: impl Into<String>,
    ) -> Self {
        ProviderError::Api {
            action,
            resource: resource.into(),
            status,
            class: ErrorClass::from_status(status),
            message: message.into(),
        }
    }

    /// Build a transport error
    pub fn transport(
        action: &'static str,
        resource: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        ProviderError::Transport {
            action,
            resource: resource.into(),
            message: message.into(),
        }
    }

    /// Classification of this error
    pub fn class(&self) -> ErrorClass {
        match self {
            ProviderError::Api { class, .. } => *class,
            ProviderError::Transport { .. } | ProviderError::Credentials(_) => ErrorClass::Other,
        }
    }

    /// Operation that failed, `auth` for credential errors
    pub fn action(&self) -> &'static str {
        match self {
            ProviderError::Api { action, .. } | ProviderError::Transport { action, .. } => action,
            ProviderError::Credentials(_) => "auth",
        }
    }
}
