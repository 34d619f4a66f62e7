//! Mock GitHubClient for unit testing
//!
//! Stores repositories, branches and hooks in memory and records every
//! mutating call so tests can assert on the writes a reconciler made.

use crate::error::GitHubError;
use crate::github_trait::{GitHubClientFactory, GitHubClientTrait};
use crate::models::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A mutating call received by the mock
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    CreateHook { repo: String, url: Option<String> },
    UpdateHookConfig { repo: String, hook_id: u64 },
    UpdateHookEvents { repo: String, hook_id: u64, events: Vec<String> },
    PingHook { repo: String, hook_id: u64 },
    DeleteHook { repo: String, hook_id: u64 },
}

/// Failure injected for one operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    Unauthorized,
    Forbidden,
    NotFound,
    Internal,
}

impl MockFailure {
    fn to_error(self, context: &str) -> GitHubError {
        match self {
            MockFailure::Unauthorized => GitHubError::Authentication(format!("{context}: 401")),
            MockFailure::Forbidden => GitHubError::Forbidden(format!("{context}: 403")),
            MockFailure::NotFound => GitHubError::NotFound(format!("{context}: 404")),
            MockFailure::Internal => GitHubError::Api(format!("{context}: 500")),
        }
    }
}

/// Mock GitHubClient for testing
///
/// Cloning shares the underlying store, so a test can keep one handle while
/// the factory hands another to the code under test.
#[derive(Debug, Clone)]
pub struct MockGitHubClient {
    base_url: String,
    repositories: Arc<Mutex<HashMap<String, Repository>>>,
    branches: Arc<Mutex<HashMap<String, Vec<Branch>>>>,
    hooks: Arc<Mutex<HashMap<String, Vec<Hook>>>>,
    failures: Arc<Mutex<HashMap<&'static str, MockFailure>>>,
    calls: Arc<Mutex<Vec<MockCall>>>,
    next_id: Arc<Mutex<u64>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn key(owner: &str, name: &str) -> String {
    format!("{owner}/{name}")
}

impl MockGitHubClient {
    /// Create a new mock client
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            repositories: Arc::new(Mutex::new(HashMap::new())),
            branches: Arc::new(Mutex::new(HashMap::new())),
            hooks: Arc::new(Mutex::new(HashMap::new())),
            failures: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(Mutex::new(1)),
        }
    }

    /// Add a repository with the given default branch (for test setup)
    pub fn add_repository(&self, owner: &str, name: &str, default_branch: &str) {
        let id = self.next_id();
        lock(&self.repositories).insert(
            key(owner, name),
            Repository {
                id,
                name: name.to_string(),
                full_name: key(owner, name),
                default_branch: default_branch.to_string(),
                private: false,
                clone_url: Some(format!("https://github.com/{owner}/{name}.git")),
            },
        );
    }

    /// Override the clone URL reported for a repository (for test setup)
    pub fn set_clone_url(&self, owner: &str, name: &str, url: &str) {
        if let Some(repository) = lock(&self.repositories).get_mut(&key(owner, name)) {
            repository.clone_url = Some(url.to_string());
        }
    }

    /// Set or move a branch head (for test setup)
    pub fn set_branch(&self, owner: &str, name: &str, branch: &str, sha: &str) {
        let mut branches = lock(&self.branches);
        let list = branches.entry(key(owner, name)).or_default();
        let commit = CommitRef {
            sha: sha.to_string(),
        };
        match list.iter_mut().find(|b| b.name == branch) {
            Some(existing) => existing.commit = commit,
            None => list.push(Branch {
                name: branch.to_string(),
                commit,
            }),
        }
    }

    /// Add a hook as if it was created out of band (for test setup)
    pub fn add_hook(&self, owner: &str, name: &str, mut hook: Hook) -> u64 {
        if hook.id == 0 {
            hook.id = self.next_id();
        }
        let id = hook.id;
        lock(&self.hooks).entry(key(owner, name)).or_default().push(hook);
        id
    }

    /// Current hooks of a repository
    pub fn hooks(&self, owner: &str, name: &str) -> Vec<Hook> {
        lock(&self.hooks)
            .get(&key(owner, name))
            .cloned()
            .unwrap_or_default()
    }

    /// Make `operation` fail until cleared
    pub fn fail(&self, operation: &'static str, failure: MockFailure) {
        lock(&self.failures).insert(operation, failure);
    }

    /// Remove an injected failure
    pub fn clear_failure(&self, operation: &'static str) {
        lock(&self.failures).remove(operation);
    }

    /// Mutating calls received so far
    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.calls).clone()
    }

    /// Forget recorded calls
    pub fn reset_calls(&self) {
        lock(&self.calls).clear();
    }

    fn next_id(&self) -> u64 {
        let mut id = lock(&self.next_id);
        let current = *id;
        *id += 1;
        current
    }

    fn check(&self, operation: &'static str) -> Result<(), GitHubError> {
        match lock(&self.failures).get(operation) {
            Some(failure) => Err(failure.to_error(operation)),
            None => Ok(()),
        }
    }

    fn record(&self, call: MockCall) {
        lock(&self.calls).push(call);
    }

    fn with_hook<T>(
        &self,
        owner: &str,
        name: &str,
        hook_id: u64,
        f: impl FnOnce(&mut Hook) -> T,
    ) -> Result<T, GitHubError> {
        let mut hooks = lock(&self.hooks);
        hooks
            .get_mut(&key(owner, name))
            .and_then(|list| list.iter_mut().find(|h| h.id == hook_id))
            .map(f)
            .ok_or_else(|| GitHubError::NotFound(format!("hook {hook_id} not found")))
    }
}

#[async_trait::async_trait]
impl GitHubClientTrait for MockGitHubClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn validate_token(&self) -> Result<User, GitHubError> {
        self.check("validate_token")?;
        Ok(User {
            id: 1,
            login: "devbot".to_string(),
        })
    }

    async fn get_repository(&self, owner: &str, name: &str) -> Result<Repository, GitHubError> {
        self.check("get_repository")?;
        lock(&self.repositories)
            .get(&key(owner, name))
            .cloned()
            .ok_or_else(|| GitHubError::NotFound(format!("repository {} not found", key(owner, name))))
    }

    async fn list_branches(&self, owner: &str, name: &str) -> Result<Vec<Branch>, GitHubError> {
        self.check("list_branches")?;
        Ok(lock(&self.branches)
            .get(&key(owner, name))
            .cloned()
            .unwrap_or_default())
    }

    async fn list_hooks(&self, owner: &str, name: &str) -> Result<Vec<Hook>, GitHubError> {
        self.check("list_hooks")?;
        Ok(self.hooks(owner, name))
    }

    async fn create_hook(
        &self,
        owner: &str,
        name: &str,
        request: &CreateHookRequest,
    ) -> Result<Hook, GitHubError> {
        self.check("create_hook")?;
        self.record(MockCall::CreateHook {
            repo: key(owner, name),
            url: request.config.url.clone(),
        });
        let mut config = request.config.clone();
        config.secret = None;
        let hook = Hook {
            id: self.next_id(),
            name: request.name.clone(),
            active: request.active,
            events: request.events.clone(),
            config,
        };
        lock(&self.hooks)
            .entry(key(owner, name))
            .or_default()
            .push(hook.clone());
        Ok(hook)
    }

    async fn update_hook_config(
        &self,
        owner: &str,
        name: &str,
        hook_id: u64,
        config: &HookConfig,
    ) -> Result<(), GitHubError> {
        self.check("update_hook_config")?;
        self.record(MockCall::UpdateHookConfig {
            repo: key(owner, name),
            hook_id,
        });
        self.with_hook(owner, name, hook_id, |hook| {
            if config.url.is_some() {
                hook.config.url = config.url.clone();
            }
            if config.content_type.is_some() {
                hook.config.content_type = config.content_type.clone();
            }
            if config.insecure_ssl.is_some() {
                hook.config.insecure_ssl = config.insecure_ssl.clone();
            }
        })
    }

    async fn update_hook_events(
        &self,
        owner: &str,
        name: &str,
        hook_id: u64,
        events: &[String],
    ) -> Result<Hook, GitHubError> {
        self.check("update_hook_events")?;
        self.record(MockCall::UpdateHookEvents {
            repo: key(owner, name),
            hook_id,
            events: events.to_vec(),
        });
        self.with_hook(owner, name, hook_id, |hook| {
            hook.events = events.to_vec();
            hook.clone()
        })
    }

    async fn ping_hook(&self, owner: &str, name: &str, hook_id: u64) -> Result<(), GitHubError> {
        self.check("ping_hook")?;
        self.record(MockCall::PingHook {
            repo: key(owner, name),
            hook_id,
        });
        self.with_hook(owner, name, hook_id, |_| ())
    }

    async fn delete_hook(&self, owner: &str, name: &str, hook_id: u64) -> Result<(), GitHubError> {
        self.check("delete_hook")?;
        self.record(MockCall::DeleteHook {
            repo: key(owner, name),
            hook_id,
        });
        let mut hooks = lock(&self.hooks);
        let list = hooks.entry(key(owner, name)).or_default();
        let before = list.len();
        list.retain(|h| h.id != hook_id);
        if list.len() == before {
            return Err(GitHubError::NotFound(format!("hook {hook_id} not found")));
        }
        Ok(())
    }
}

/// Factory handing out clones of one shared [`MockGitHubClient`]
///
/// Records the tokens it was asked to build clients for.
#[derive(Debug, Clone)]
pub struct MockGitHubClientFactory {
    client: MockGitHubClient,
    tokens: Arc<Mutex<Vec<String>>>,
}

impl MockGitHubClientFactory {
    pub fn new(client: MockGitHubClient) -> Self {
        Self {
            client,
            tokens: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Tokens passed to [`GitHubClientFactory::create`]
    pub fn tokens(&self) -> Vec<String> {
        lock(&self.tokens).clone()
    }
}

impl GitHubClientFactory for MockGitHubClientFactory {
    fn create(&self, token: &str) -> Result<Box<dyn GitHubClientTrait>, GitHubError> {
        lock(&self.tokens).push(token.to_string());
        Ok(Box::new(self.client.clone()))
    }
}
