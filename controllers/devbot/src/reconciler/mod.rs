//! Reconciliation logic for the Devbot CRDs.
//!
//! - `repository`: forge authentication, branch discovery, webhook upkeep
//! - `application`: one Environment per observed branch
//! - `environment`: one Deployment per application repository
//! - `deployment`: the clone, bake and apply job pipeline
//!
//! Every reconciler follows the same skeleton: the finalizer wrapper installs
//! or runs the finalizer, the body works on a [`StatusHandle`] and flushes it,
//! and the returned [`Action`] schedules the next pass.

pub mod application;
pub mod children;
pub mod deployment;
pub mod environment;
pub mod repository;
pub mod secrets;

#[cfg(test)]
mod application_test;

use crate::backoff::{BackoffRegistry, CONFLICT_RETRY};
use crate::config::Config;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::naming;
use crate::reconcile_helpers::{Lookup, is_controlled_by, is_conflict, is_not_found};
use crds::{Conditions, StaleReason};
use github_client::GitHubClientFactory;
use kube::api::{DeleteParams, ListParams, PostParams};
use kube::runtime::controller::Action;
use kube::runtime::finalizer::{Event, finalizer};
use kube::{Api, Client, Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Delay before retrying after a transient failure recorded as `Stale(InternalError)`
pub const TRANSIENT_RETRY: Duration = Duration::from_secs(5);

/// Delay before re-checking a missing or inaccessible dependency
pub const DEPENDENCY_RETRY: Duration = Duration::from_secs(5 * 60);

/// Shared state of all reconcilers.
pub struct Reconciler {
    pub(crate) client: Client,
    pub(crate) config: Arc<Config>,
    pub(crate) github: Arc<dyn GitHubClientFactory>,
    pub(crate) metrics: Metrics,
    backoffs: BackoffRegistry,
}

impl Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(
        client: Client,
        config: Arc<Config>,
        github: Arc<dyn GitHubClientFactory>,
        metrics: Metrics,
    ) -> Self {
        Self {
            client,
            config,
            github,
            metrics,
            backoffs: BackoffRegistry::default(),
        }
    }

    /// Namespaced API handle
    pub(crate) fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    /// Runs one pass through the finalizer wrapper and records its outcome.
    ///
    /// `apply` is the reconciler body; `cleanup` runs once when the object is
    /// being deleted, after which the finalizer is removed.
    pub(crate) async fn finalized<K, A, AF, C, CF>(
        &self,
        obj: Arc<K>,
        apply: A,
        cleanup: C,
    ) -> Result<Action, ControllerError>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Serialize
            + Debug,
        A: FnOnce(Arc<K>) -> AF,
        AF: Future<Output = Result<Action, ControllerError>>,
        C: FnOnce(Arc<K>) -> CF,
        CF: Future<Output = Result<Action, ControllerError>>,
    {
        let kind = K::kind(&()).to_string();
        let namespace = obj.namespace().unwrap_or_default();
        let key = format!("{}/{}/{}", kind, namespace, obj.name_any());
        info!("Reconciling {}", key);

        let started = Instant::now();
        let api: Api<K> = self.api(&namespace);
        let result = finalizer(&api, crds::FINALIZER, obj, |event| async move {
            match event {
                Event::Apply(obj) => apply(obj).await,
                Event::Cleanup(obj) => cleanup(obj).await,
            }
        })
        .await
        .map_err(ControllerError::from);

        self.metrics.reconciled(&kind, started, result.is_ok());
        if result.is_ok() {
            self.backoffs.reset(&key);
        }
        result
    }

    /// Lists the children labelled `label=value` that `owner_uid` controls
    pub(crate) async fn list_children<K>(
        &self,
        api: &Api<K>,
        label: &str,
        value: &str,
        owner_uid: &str,
    ) -> Result<Vec<K>, ControllerError>
    where
        K: Resource + Clone + DeserializeOwned + Debug,
    {
        let params = ListParams::default().labels(&format!("{label}={}", naming::label_value(value)));
        Ok(api
            .list(&params)
            .await?
            .items
            .into_iter()
            .filter(|child| is_controlled_by(child.meta(), owner_uid))
            .collect())
    }

    /// Error policy shared by every controller
    pub(crate) fn error_action<K: Resource<DynamicType = ()>>(
        &self,
        obj: &K,
        error: &ControllerError,
    ) -> Action {
        let key = format!(
            "{}/{}/{}",
            K::kind(&()),
            obj.meta().namespace.as_deref().unwrap_or_default(),
            obj.name_any()
        );
        if error.is_conflict() {
            warn!("Write conflict reconciling {}, retrying: {}", key, error);
            return Action::requeue(CONFLICT_RETRY);
        }
        let delay = self.backoffs.next(&key);
        error!(
            "Reconciliation error for {}: {} (retrying in {}s)",
            key,
            error,
            delay.as_secs()
        );
        Action::requeue(delay)
    }
}

/// Creates `obj`, retrying once under a randomly suffixed name if its
/// deterministic name is already taken.
pub(crate) async fn create_with_fallback_name<K>(api: &Api<K>, mut obj: K) -> Result<K, ControllerError>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Debug,
{
    match api.create(&PostParams::default(), &obj).await {
        Ok(created) => Ok(created),
        Err(e) if is_conflict(&e) => {
            let taken = obj.name_any();
            let name = naming::with_random_suffix(&taken);
            warn!("Name {} is taken, creating as {}", taken, name);
            obj.meta_mut().name = Some(name);
            Ok(api.create(&PostParams::default(), &obj).await?)
        }
        Err(e) => Err(e.into()),
    }
}

/// Deletes a child in the background; an already deleted child is fine.
pub(crate) async fn delete_child<K>(api: &Api<K>, name: &str) -> Result<(), ControllerError>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    match api.delete(name, &DeleteParams::background()).await {
        Ok(_) => Ok(()),
        Err(e) if is_not_found(&e) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Unwraps a dependency lookup, recording why it failed otherwise.
///
/// Returns the delay before the next attempt on failure. A forbidden read
/// without a dedicated reason is reported as an internal error.
pub(crate) fn require<T, S: Conditions>(
    lookup: Lookup<T>,
    status: &mut S,
    generation: Option<i64>,
    not_found: StaleReason,
    not_accessible: Option<StaleReason>,
    what: &str,
) -> Result<T, Duration> {
    match lookup {
        Lookup::Found(obj) => {
            status.clear_if_due_to_any_of(&[not_found]);
            if let Some(reason) = not_accessible {
                status.clear_if_due_to_any_of(&[reason]);
            }
            Ok(obj)
        }
        Lookup::NotFound => {
            warn!("{} not found", what);
            status.set_due_to(not_found, generation, format!("{what} not found"));
            Err(DEPENDENCY_RETRY)
        }
        Lookup::Forbidden(message) => match not_accessible {
            Some(reason) => {
                warn!("{} is not accessible: {}", what, message);
                status.set_due_to(reason, generation, format!("{what} is not accessible: {message}"));
                Err(DEPENDENCY_RETRY)
            }
            None => {
                error!("Failed to get {}: {}", what, message);
                status.set_due_to(
                    StaleReason::InternalError,
                    generation,
                    format!("failed to get {what}: {message}"),
                );
                Err(TRANSIENT_RETRY)
            }
        },
        Lookup::Failed(message) => {
            error!("Failed to get {}: {}", what, message);
            status.set_due_to(
                StaleReason::InternalError,
                generation,
                format!("failed to get {what}: {message}"),
            );
            Err(TRANSIENT_RETRY)
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use github_client::{MockGitHubClient, MockGitHubClientFactory};

    /// Reconciler wired to a client that is never contacted and a mock forge
    pub fn reconciler(mock: &MockGitHubClient) -> Reconciler {
        Reconciler::new(
            crate::test_utils::offline_client(),
            Arc::new(crate::test_utils::test_config()),
            Arc::new(MockGitHubClientFactory::new(mock.clone())),
            Metrics::new().unwrap(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_repository;
    use github_client::MockGitHubClient;

    #[tokio::test]
    async fn test_error_action_backs_off_per_object() {
        let reconciler = testing::reconciler(&MockGitHubClient::new("https://api.github.com"));
        let api = create_test_repository("api", "team-a", "main", &[]);
        let web = create_test_repository("web", "team-a", "main", &[]);
        let error = ControllerError::InvalidConfig("boom".to_string());

        let delays: Vec<Action> = (0..3).map(|_| reconciler.error_action(&api, &error)).collect();
        assert_eq!(
            delays,
            vec![
                Action::requeue(Duration::from_secs(60)),
                Action::requeue(Duration::from_secs(60)),
                Action::requeue(Duration::from_secs(120)),
            ]
        );
        assert_eq!(
            reconciler.error_action(&web, &error),
            Action::requeue(Duration::from_secs(60))
        );
    }
}
