//! GitHub REST API Client
//!
//! A Rust client library for the parts of the GitHub REST API that Devbot
//! needs: token validation, repository metadata, branch enumeration and
//! repository webhooks.
//!
//! # Example
//!
//! ```no_run
//! use github_client::{CreateHookRequest, GitHubClient, GitHubClientTrait};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = GitHubClient::new(
//!     "https://api.github.com".to_string(),
//!     "ghp_your_token".to_string(),
//! )?;
//!
//! client.validate_token().await?;
//!
//! let repo = client.get_repository("acme", "shop").await?;
//! let branches = client.list_branches("acme", "shop").await?;
//! println!("{} has {} branches", repo.full_name, branches.len());
//!
//! let hook = client
//!     .create_hook(
//!         "acme",
//!         "shop",
//!         &CreateHookRequest::push("https://devbot.example.com/github/webhook", "s3cr3t"),
//!     )
//!     .await?;
//! client.ping_hook("acme", "shop", hook.id).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Pagination**: list operations follow the `Link: rel="next"` header
//! - **Error mapping**: 401, 403 and 404 map to dedicated error variants
//! - **Mocking**: `MockGitHubClient` behind the `test-util` feature

pub mod client;
pub mod common;
pub mod error;
#[path = "trait.rs"]
pub mod github_trait;
pub mod models;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::{DefaultGitHubClientFactory, GitHubClient};
pub use common::HttpClient;
pub use error::GitHubError;
pub use github_trait::{GitHubClientFactory, GitHubClientTrait};
pub use models::*;
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockCall, MockFailure, MockGitHubClient, MockGitHubClientFactory};
