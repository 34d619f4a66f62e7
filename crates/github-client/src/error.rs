//! GitHub client errors

use thiserror::Error;

/// Errors that can occur when interacting with the GitHub API
#[derive(Debug, Error)]
pub enum GitHubError {
    /// HTTP request/response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// GitHub API returned an unexpected status
    #[error("GitHub API error: {0}")]
    Api(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The token was rejected (401)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The token lacks permission for the resource (403)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Resource not found (404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// The request was rejected as invalid (422), e.g. a duplicate hook
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl GitHubError {
    /// Whether the error is a 404
    pub fn is_not_found(&self) -> bool {
        matches!(self, GitHubError::NotFound(_))
    }

    /// Whether the error is a 401 or 403
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            GitHubError::Authentication(_) | GitHubError::Forbidden(_)
        )
    }
}
