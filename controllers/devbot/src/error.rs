//! Controller-specific error types.
//!
//! Conditions are the user-facing error channel; these errors are reserved
//! for failures the framework should retry (API outages, write conflicts).

use github_client::GitHubError;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the Devbot controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// GitHub API error
    #[error("GitHub error: {0}")]
    GitHub(#[from] GitHubError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Finalizer add/remove or cleanup failed
    #[error("Finalizer error: {0}")]
    Finalizer(#[source] Box<kube::runtime::finalizer::Error<ControllerError>>),

    /// Status could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Object is missing a field the API server always sets
    #[error("Missing object metadata: {0}")]
    MissingMetadata(String),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// HTTP server error
    #[error("Server error: {0}")]
    Server(#[from] std::io::Error),
}

impl ControllerError {
    /// HTTP status code of an underlying Kubernetes API error, if any
    pub fn kube_code(&self) -> Option<u16> {
        match self {
            ControllerError::Kube(e) => crate::reconcile_helpers::kube_error_code(e),
            ControllerError::Finalizer(e) => match e.as_ref() {
                kube::runtime::finalizer::Error::ApplyFailed(inner)
                | kube::runtime::finalizer::Error::CleanupFailed(inner) => inner.kube_code(),
                kube::runtime::finalizer::Error::AddFinalizer(e)
                | kube::runtime::finalizer::Error::RemoveFinalizer(e) => {
                    crate::reconcile_helpers::kube_error_code(e)
                }
                _ => None,
            },
            _ => None,
        }
    }

    /// Whether this is an optimistic-concurrency conflict (HTTP 409)
    pub fn is_conflict(&self) -> bool {
        self.kube_code() == Some(409)
    }
}

impl From<kube::runtime::finalizer::Error<ControllerError>> for ControllerError {
    fn from(e: kube::runtime::finalizer::Error<ControllerError>) -> Self {
        match e {
            // Unwrap our own errors so the error policy sees the original.
            kube::runtime::finalizer::Error::ApplyFailed(inner)
            | kube::runtime::finalizer::Error::CleanupFailed(inner) => inner,
            other => ControllerError::Finalizer(Box::new(other)),
        }
    }
}
