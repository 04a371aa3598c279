//! Error types for the controller.
//!
//! Remote failures are classified by status code so callers can tell the
//! expected outcomes (not found, conflict) apart from genuine failures.

use thiserror::Error;

/// Error type for controller operations
#[derive(Error, Debug)]
pub enum Error {
    /// The object does not exist (HTTP 404)
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },

    /// The object already exists or was modified concurrently (HTTP 409)
    #[error("{kind} {namespace}/{name} conflict: {message}")]
    Conflict {
        kind: String,
        namespace: String,
        name: String,
        message: String,
    },

    /// Any other error status returned by the API server
    #[error("Kubernetes API error ({code}): {message}")]
    Api { code: u16, message: String },

    /// Transport or client-side error
    #[error("Kubernetes client error: {0}")]
    Kube(#[from] kube::Error),

    /// A watch notification that could not be decoded into an event
    #[error("Malformed watch event: {0}")]
    MalformedEvent(String),

    /// Error status delivered inside a watch stream
    #[error("Watch error ({code}): {message}")]
    Watch { code: u16, message: String },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A supervised loop iteration panicked
    #[error("Iteration panicked: {0}")]
    Panicked(String),
}

impl Error {
    /// Classify a kube error for an operation on `kind` `namespace/name`.
    pub fn from_kube(err: kube::Error, kind: &str, namespace: &str, name: &str) -> Self {
        match err {
            kube::Error::Api(e) if e.code == 404 => Error::NotFound {
                kind: kind.to_string(),
                namespace: namespace.to_string(),
                name: name.to_string(),
            },
            kube::Error::Api(e) if e.code == 409 => Error::Conflict {
                kind: kind.to_string(),
                namespace: namespace.to_string(),
                name: name.to_string(),
                message: e.message.clone(),
            },
            kube::Error::Api(e) => Error::Api {
                code: e.code,
                message: e.message.clone(),
            },
            other => Error::Kube(other),
        }
    }

    /// Check if this error indicates a not-found condition
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. } | Error::Api { code: 404, .. })
    }

    /// Check if this error indicates an already-exists / conflict condition
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. } | Error::Api { code: 409, .. })
    }

    /// Check if this error is an undecodable watch notification
    pub fn is_malformed(&self) -> bool {
        matches!(self, Error::MalformedEvent(_))
    }

    /// Check if a watch must restart from a fresh resource version (HTTP 410)
    pub fn is_gone(&self) -> bool {
        matches!(
            self,
            Error::Watch { code: 410, .. } | Error::Api { code: 410, .. }
        )
    }
}

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, Error>;
