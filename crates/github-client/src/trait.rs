//! GitHubClient trait for mocking
//!
//! The concrete `GitHubClient` implements this trait; reconcilers only see
//! `dyn GitHubClientTrait`, so tests can substitute `MockGitHubClient`.

use crate::error::GitHubError;
use crate::models::*;

/// Trait for GitHub API client operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait GitHubClientTrait: Send + Sync {
    /// Get the base URL
    fn base_url(&self) -> &str;

    /// Validate the token with a lightweight authenticated request
    async fn validate_token(&self) -> Result<User, GitHubError>;

    /// Repository metadata, including the default branch
    async fn get_repository(&self, owner: &str, name: &str) -> Result<Repository, GitHubError>;

    /// All branches of a repository, across all pages
    async fn list_branches(&self, owner: &str, name: &str) -> Result<Vec<Branch>, GitHubError>;

    // Webhook operations
    async fn list_hooks(&self, owner: &str, name: &str) -> Result<Vec<Hook>, GitHubError>;
    async fn create_hook(
        &self,
        owner: &str,
        name: &str,
        request: &CreateHookRequest,
    ) -> Result<Hook, GitHubError>;
    async fn update_hook_config(
        &self,
        owner: &str,
        name: &str,
        hook_id: u64,
        config: &HookConfig,
    ) -> Result<(), GitHubError>;
    async fn update_hook_events(
        &self,
        owner: &str,
        name: &str,
        hook_id: u64,
        events: &[String],
    ) -> Result<Hook, GitHubError>;
    async fn ping_hook(&self, owner: &str, name: &str, hook_id: u64) -> Result<(), GitHubError>;
    async fn delete_hook(&self, owner: &str, name: &str, hook_id: u64) -> Result<(), GitHubError>;
}

/// Builds a client for a token loaded at reconcile time
pub trait GitHubClientFactory: Send + Sync {
    fn create(&self, token: &str) -> Result<Box<dyn GitHubClientTrait>, GitHubError>;
}
