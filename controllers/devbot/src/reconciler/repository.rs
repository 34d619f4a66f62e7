//! Repository reconciliation
//!
//! Authenticates against the forge, publishes the default branch and the head
//! revision of every branch, and keeps a push webhook registered for the
//! controller's public URL.

use super::secrets::{AUTH_SECRET_REASONS, SecretError, WEBHOOK_SECRET_REASONS};
use super::{Reconciler, TRANSIENT_RETRY};
use crate::duration::parse_refresh_interval;
use crate::error::ControllerError;
use crate::reconcile_helpers::{StatusHandle, object_key};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use crds::{
    Conditions, GitHubRepositorySpec, InvalidReason, Repository, RepositoryStatus, StaleReason,
    UnauthenticatedReason,
};
use github_client::{CreateHookRequest, GitHubClientTrait, GitHubError, Hook, HookConfig, PUSH_EVENT};
use kube::runtime::controller::Action;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Minimum time between two webhook pings
pub const PING_INTERVAL: ChronoDuration = ChronoDuration::minutes(5);

/// Outcome of one forge interaction step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Step succeeded, continue with the next one
    Synced,
    /// Step recorded a condition that is retried at the refresh interval
    Blocked,
    /// Step recorded `Stale(InternalError)`
    Failed,
}

/// What has to happen to the forge hooks for the controller URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookAction {
    Create,
    Update {
        id: u64,
        fix_config: bool,
        fix_events: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookPlan {
    pub action: HookAction,
    /// Further hooks pointing at the same URL
    pub duplicates: Vec<u64>,
}

/// Compares the forge hooks against the single hook the controller wants for `url`.
pub fn plan_hook(hooks: &[Hook], url: &str) -> HookPlan {
    let mut matching = hooks.iter().filter(|h| h.url() == Some(url));
    let Some(hook) = matching.next() else {
        return HookPlan {
            action: HookAction::Create,
            duplicates: Vec::new(),
        };
    };
    HookPlan {
        action: HookAction::Update {
            id: hook.id,
            fix_config: !hook.is_json(),
            fix_events: !hook.is_push_only(),
        },
        duplicates: matching.map(|h| h.id).collect(),
    }
}

/// Whether the hook should be pinged again
pub fn ping_due(last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    last.is_none_or(|last| now - last >= PING_INTERVAL)
}

/// Probes the forge with the loaded token.
pub async fn authenticate(
    client: &dyn GitHubClientTrait,
    status: &mut RepositoryStatus,
    generation: Option<i64>,
) -> SyncOutcome {
    match client.validate_token().await {
        Ok(user) => {
            debug!("Authenticated against {} as {}", client.base_url(), user.login);
            status.clear_if_due_to_any_of(&[UnauthenticatedReason::AuthenticationFailed]);
            SyncOutcome::Synced
        }
        Err(e) if e.is_auth() => {
            warn!("Token rejected by {}: {}", client.base_url(), e);
            status.set_due_to(
                UnauthenticatedReason::AuthenticationFailed,
                generation,
                format!("authentication failed: {e}"),
            );
            SyncOutcome::Blocked
        }
        Err(e) => {
            error!("Failed to validate token against {}: {}", client.base_url(), e);
            status.set_due_to(
                StaleReason::InternalError,
                generation,
                format!("failed to validate token: {e}"),
            );
            SyncOutcome::Failed
        }
    }
}

/// Publishes the default branch and the head revision of every branch.
pub async fn sync_revisions(
    client: &dyn GitHubClientTrait,
    github: &GitHubRepositorySpec,
    status: &mut RepositoryStatus,
    generation: Option<i64>,
) -> SyncOutcome {
    let full_name = github.full_name();
    let metadata = match client.get_repository(&github.owner, &github.name).await {
        Ok(metadata) => metadata,
        Err(e) if e.is_not_found() => {
            warn!("Repository {} not found on the forge", full_name);
            status.set_due_to(
                StaleReason::RepositoryNotFound,
                generation,
                format!("repository '{full_name}' not found"),
            );
            return SyncOutcome::Blocked;
        }
        Err(e) => {
            error!("Failed to get repository {}: {}", full_name, e);
            status.set_due_to(
                StaleReason::InternalError,
                generation,
                format!("failed to get repository '{full_name}': {e}"),
            );
            return SyncOutcome::Failed;
        }
    };
    status.default_branch = Some(metadata.default_branch);
    if metadata.clone_url.is_some() {
        status.clone_url = metadata.clone_url;
    }

    let branches = match client.list_branches(&github.owner, &github.name).await {
        Ok(branches) => branches,
        Err(e) => {
            error!("Failed to list branches of {}: {}", full_name, e);
            status.set_due_to(
                StaleReason::InternalError,
                generation,
                format!("failed to list branches of '{full_name}': {e}"),
            );
            return SyncOutcome::Failed;
        }
    };
    status.revisions = branches
        .into_iter()
        .map(|b| (b.name, b.commit.sha))
        .collect::<BTreeMap<_, _>>();
    debug!("Repository {} has {} branch(es)", full_name, status.revisions.len());

    status.clear_if_due_to_any_of(&[StaleReason::InternalError, StaleReason::RepositoryNotFound]);
    SyncOutcome::Synced
}

/// Ensures exactly one hook targets `url`, with JSON payloads and only the
/// push event, and pings it when due.
pub async fn sync_webhook(
    client: &dyn GitHubClientTrait,
    github: &GitHubRepositorySpec,
    url: &str,
    secret: &str,
    status: &mut RepositoryStatus,
    now: DateTime<Utc>,
) -> Result<(), GitHubError> {
    let (owner, name) = (github.owner.as_str(), github.name.as_str());
    let plan = plan_hook(&client.list_hooks(owner, name).await?, url);

    let hook_id = match plan.action {
        HookAction::Create => create_hook(client, github, url, secret).await?,
        HookAction::Update {
            id,
            fix_config,
            fix_events,
        } => {
            if fix_config {
                info!("Restoring configuration of webhook {} on {}", id, github.full_name());
                client
                    .update_hook_config(owner, name, id, &HookConfig::json(url, secret))
                    .await?;
            }
            if fix_events {
                info!("Restoring events of webhook {} on {}", id, github.full_name());
                client
                    .update_hook_events(owner, name, id, &[PUSH_EVENT.to_string()])
                    .await?;
            }
            id
        }
    };

    for duplicate in plan.duplicates {
        info!("Deleting duplicate webhook {} on {}", duplicate, github.full_name());
        match client.delete_hook(owner, name, duplicate).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
    }

    if ping_due(status.last_webhook_ping, now) {
        match client.ping_hook(owner, name, hook_id).await {
            Ok(()) => status.last_webhook_ping = Some(now),
            Err(e) => warn!("Failed to ping webhook {} on {}: {}", hook_id, github.full_name(), e),
        }
    }
    Ok(())
}

async fn create_hook(
    client: &dyn GitHubClientTrait,
    github: &GitHubRepositorySpec,
    url: &str,
    secret: &str,
) -> Result<u64, GitHubError> {
    let (owner, name) = (github.owner.as_str(), github.name.as_str());
    info!("Creating webhook for {} on {}", url, github.full_name());
    match client
        .create_hook(owner, name, &CreateHookRequest::push(url, secret))
        .await
    {
        Ok(hook) => Ok(hook.id),
        // A concurrent create already registered the URL.
        Err(e @ GitHubError::InvalidRequest(_)) => client
            .list_hooks(owner, name)
            .await?
            .into_iter()
            .find(|h| h.url() == Some(url))
            .map(|h| h.id)
            .ok_or(e),
        Err(e) => Err(e),
    }
}

impl Reconciler {
    /// Reconciles one Repository (finalizer included)
    pub async fn reconcile_repository(&self, repo: Arc<Repository>) -> Result<Action, ControllerError> {
        self.finalized(
            repo,
            |repo| self.apply_repository(repo),
            |repo| self.cleanup_repository(repo),
        )
        .await
    }

    async fn apply_repository(&self, repo: Arc<Repository>) -> Result<Action, ControllerError> {
        let key = object_key(repo.as_ref())?;
        let generation = repo.metadata.generation;
        let mut status = StatusHandle::new(self.api(&key.namespace), repo.as_ref(), repo.status.as_ref())?;
        status.status.clear_stale(generation);

        let interval = match parse_refresh_interval(repo.spec.refresh_interval.as_deref()) {
            Ok(interval) => {
                status
                    .status
                    .clear_if_due_to_any_of(&[InvalidReason::InvalidRefreshInterval]);
                interval
            }
            Err(e) => {
                warn!("Repository {} has an invalid refresh interval: {}", key, e);
                status
                    .status
                    .set_due_to(InvalidReason::InvalidRefreshInterval, generation, e.to_string());
                status.flush().await?;
                return Ok(Action::await_change());
            }
        };

        let Some(github) = &repo.spec.github else {
            status.status.set_due_to(
                InvalidReason::UnknownRepositoryType,
                generation,
                "no supported repository type is configured (expected 'github')",
            );
            status.flush().await?;
            return Ok(Action::await_change());
        };
        status
            .status
            .clear_if_due_to_any_of(&[InvalidReason::UnknownRepositoryType]);

        let full_name = github.full_name();
        if status.status.resolved_name.as_deref() != Some(full_name.as_str()) {
            status.status.resolved_name = Some(full_name);
            status.flush().await?;
        }

        let token = match self.load_token(github, &key.namespace).await {
            Ok(token) => token,
            Err((reason, message)) => {
                warn!("Repository {} is unauthenticated: {}", key, message);
                status.status.set_due_to(reason, generation, message);
                status.flush().await?;
                return Ok(Action::requeue(interval));
            }
        };
        status.status.clear_if_due_to_any_of(&AUTH_SECRET_REASONS);

        let client = self.github.create(&token)?;
        let mut outcome = authenticate(client.as_ref(), &mut status.status, generation).await;
        if outcome == SyncOutcome::Synced {
            outcome = sync_revisions(client.as_ref(), github, &mut status.status, generation).await;
        }
        if outcome == SyncOutcome::Synced {
            outcome = self
                .maintain_webhook(client.as_ref(), github, &key.namespace, &mut status.status, generation)
                .await;
        }
        status.flush().await?;

        Ok(match outcome {
            SyncOutcome::Failed => Action::requeue(TRANSIENT_RETRY),
            SyncOutcome::Synced | SyncOutcome::Blocked => Action::requeue(interval),
        })
    }

    async fn load_token(
        &self,
        github: &GitHubRepositorySpec,
        namespace: &str,
    ) -> Result<String, (UnauthenticatedReason, String)> {
        let Some(reference) = &github.personal_access_token else {
            return Err((
                UnauthenticatedReason::AuthConfigMissing,
                "no personal access token is configured".to_string(),
            ));
        };
        self.load_secret_value(reference, namespace)
            .await
            .map_err(|e: SecretError| (e.auth_reason(), e.to_string()))
    }

    async fn maintain_webhook(
        &self,
        client: &dyn GitHubClientTrait,
        github: &GitHubRepositorySpec,
        namespace: &str,
        status: &mut RepositoryStatus,
        generation: Option<i64>,
    ) -> SyncOutcome {
        let (Some(reference), Some(url)) = (&github.webhook_secret, &self.config.webhook_url) else {
            status.clear_if_due_to_any_of(&WEBHOOK_SECRET_REASONS);
            return SyncOutcome::Synced;
        };

        let secret = match self.load_secret_value(reference, namespace).await {
            Ok(secret) => secret,
            Err(e) => {
                warn!("Webhook secret of {} is unusable: {}", github.full_name(), e);
                status.set_due_to(e.webhook_reason(), generation, e.to_string());
                return SyncOutcome::Blocked;
            }
        };
        status.clear_if_due_to_any_of(&WEBHOOK_SECRET_REASONS);

        match sync_webhook(client, github, url, &secret, status, Utc::now()).await {
            Ok(()) => SyncOutcome::Synced,
            Err(e) => {
                error!("Failed to maintain webhook of {}: {}", github.full_name(), e);
                status.set_due_to(
                    StaleReason::InternalError,
                    generation,
                    format!("failed to maintain webhook: {e}"),
                );
                SyncOutcome::Failed
            }
        }
    }

    /// Removes the controller's hook from the forge, best-effort.
    async fn cleanup_repository(&self, repo: Arc<Repository>) -> Result<Action, ControllerError> {
        let key = object_key(repo.as_ref())?;
        let (Some(github), Some(url)) = (&repo.spec.github, &self.config.webhook_url) else {
            return Ok(Action::await_change());
        };

        let token = match self.load_token(github, &key.namespace).await {
            Ok(token) => token,
            Err((_, message)) => {
                warn!("Leaving webhook of {} in place, no usable token: {}", key, message);
                return Ok(Action::await_change());
            }
        };
        let client = self.github.create(&token)?;
        match delete_hooks_for(client.as_ref(), github, url).await {
            Ok(deleted) => info!("Deleted {} webhook(s) of {}", deleted, key),
            Err(e) if e.is_not_found() || e.is_auth() => {
                warn!("Leaving webhook of {} in place: {}", key, e);
            }
            Err(e) => return Err(e.into()),
        }
        Ok(Action::await_change())
    }
}

/// Deletes every hook targeting `url`; returns how many were deleted.
pub async fn delete_hooks_for(
    client: &dyn GitHubClientTrait,
    github: &GitHubRepositorySpec,
    url: &str,
) -> Result<usize, GitHubError> {
    let hooks = client.list_hooks(&github.owner, &github.name).await?;
    let mut deleted = 0;
    for hook in hooks.iter().filter(|h| h.url() == Some(url)) {
        match client.delete_hook(&github.owner, &github.name, hook.id).await {
            Ok(()) => deleted += 1,
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
    }
    Ok(deleted)
}
