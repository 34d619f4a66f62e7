//! GitHub API client
//!
//! Implements the subset of the GitHub REST API used by Devbot:
//! `/user`, `/repos/{owner}/{repo}`, `/repos/{owner}/{repo}/branches` and
//! `/repos/{owner}/{repo}/hooks`.

use crate::common::{HttpClient, segment};
use crate::error::GitHubError;
use crate::github_trait::{GitHubClientFactory, GitHubClientTrait};
use crate::models::*;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// GitHub API client
#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: HttpClient,
}

impl GitHubClient {
    /// Create a new GitHub client
    ///
    /// # Arguments
    /// * `base_url` - API base URL (e.g., "https://api.github.com")
    /// * `token` - personal access token
    pub fn new(base_url: String, token: String) -> Result<Self, GitHubError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http: HttpClient::new(client, base_url, token),
        })
    }

    fn repo_path(owner: &str, name: &str) -> String {
        format!("/repos/{}/{}", segment(owner), segment(name))
    }

    fn hook_path(owner: &str, name: &str, hook_id: u64) -> String {
        format!("{}/hooks/{}", Self::repo_path(owner, name), hook_id)
    }

    /// Validate the token by fetching the authenticated user.
    ///
    /// # Returns
    /// * `Ok(User)` - Token is valid and GitHub is reachable
    /// * `Err(GitHubError::Authentication)` - Token was rejected
    pub async fn validate_token(&self) -> Result<User, GitHubError> {
        debug!("Validating GitHub token");
        let user: User = self.http.get("/user").await?;
        debug!("Token validated for user {}", user.login);
        Ok(user)
    }

    pub async fn get_repository(&self, owner: &str, name: &str) -> Result<Repository, GitHubError> {
        self.http.get(&Self::repo_path(owner, name)).await
    }

    pub async fn list_branches(&self, owner: &str, name: &str) -> Result<Vec<Branch>, GitHubError> {
        self.http
            .get_all_pages(&format!("{}/branches", Self::repo_path(owner, name)))
            .await
    }

    pub async fn list_hooks(&self, owner: &str, name: &str) -> Result<Vec<Hook>, GitHubError> {
        self.http
            .get_all_pages(&format!("{}/hooks", Self::repo_path(owner, name)))
            .await
    }

    pub async fn create_hook(
        &self,
        owner: &str,
        name: &str,
        request: &CreateHookRequest,
    ) -> Result<Hook, GitHubError> {
        let body = serde_json::to_value(request)?;
        self.http
            .post(&format!("{}/hooks", Self::repo_path(owner, name)), &body)
            .await
    }

    /// Patch the delivery configuration (`PATCH /hooks/{id}/config`)
    pub async fn update_hook_config(
        &self,
        owner: &str,
        name: &str,
        hook_id: u64,
        config: &HookConfig,
    ) -> Result<(), GitHubError> {
        let body = serde_json::to_value(config)?;
        let _: HookConfig = self
            .http
            .patch(&format!("{}/config", Self::hook_path(owner, name, hook_id)), &body)
            .await?;
        Ok(())
    }

    /// Replace the subscribed event set
    pub async fn update_hook_events(
        &self,
        owner: &str,
        name: &str,
        hook_id: u64,
        events: &[String],
    ) -> Result<Hook, GitHubError> {
        let body = serde_json::json!({ "events": events });
        self.http
            .patch(&Self::hook_path(owner, name, hook_id), &body)
            .await
    }

    pub async fn ping_hook(&self, owner: &str, name: &str, hook_id: u64) -> Result<(), GitHubError> {
        self.http
            .post_empty(&format!("{}/pings", Self::hook_path(owner, name, hook_id)))
            .await
    }

    pub async fn delete_hook(&self, owner: &str, name: &str, hook_id: u64) -> Result<(), GitHubError> {
        self.http.delete(&Self::hook_path(owner, name, hook_id)).await
    }
}

#[async_trait::async_trait]
impl GitHubClientTrait for GitHubClient {
    fn base_url(&self) -> &str {
        self.http.base_url()
    }

    async fn validate_token(&self) -> Result<User, GitHubError> {
        self.validate_token().await
    }

    async fn get_repository(&self, owner: &str, name: &str) -> Result<Repository, GitHubError> {
        self.get_repository(owner, name).await
    }

    async fn list_branches(&self, owner: &str, name: &str) -> Result<Vec<Branch>, GitHubError> {
        self.list_branches(owner, name).await
    }

    async fn list_hooks(&self, owner: &str, name: &str) -> Result<Vec<Hook>, GitHubError> {
        self.list_hooks(owner, name).await
    }

    async fn create_hook(
        &self,
        owner: &str,
        name: &str,
        request: &CreateHookRequest,
    ) -> Result<Hook, GitHubError> {
        self.create_hook(owner, name, request).await
    }

    async fn update_hook_config(
        &self,
        owner: &str,
        name: &str,
        hook_id: u64,
        config: &HookConfig,
    ) -> Result<(), GitHubError> {
        self.update_hook_config(owner, name, hook_id, config).await
    }

    async fn update_hook_events(
        &self,
        owner: &str,
        name: &str,
        hook_id: u64,
        events: &[String],
    ) -> Result<Hook, GitHubError> {
        self.update_hook_events(owner, name, hook_id, events).await
    }

    async fn ping_hook(&self, owner: &str, name: &str, hook_id: u64) -> Result<(), GitHubError> {
        self.ping_hook(owner, name, hook_id).await
    }

    async fn delete_hook(&self, owner: &str, name: &str, hook_id: u64) -> Result<(), GitHubError> {
        self.delete_hook(owner, name, hook_id).await
    }
}

/// Builds real [`GitHubClient`]s against a fixed API base URL
#[derive(Debug, Clone)]
pub struct DefaultGitHubClientFactory {
    base_url: String,
}

impl DefaultGitHubClientFactory {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

impl GitHubClientFactory for DefaultGitHubClientFactory {
    fn create(&self, token: &str) -> Result<Box<dyn GitHubClientTrait>, GitHubError> {
        Ok(Box::new(GitHubClient::new(
            self.base_url.clone(),
            token.to_string(),
        )?))
    }
}
