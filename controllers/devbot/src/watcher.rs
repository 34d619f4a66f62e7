//! Kubernetes resource watchers.
//!
//! One `kube_runtime::Controller` per Devbot kind. Besides its own objects,
//! each controller watches the children it owns and the objects its inputs
//! come from, mapped back to the objects that depend on them.
//!
//! All watchers share the generic `watch_resource()` helper, which runs the
//! reconcile loop with the error policy, debounce and concurrency limits.

use crate::error::ControllerError;
use crate::naming::label_value;
use crate::reconcile_helpers::controller_of;
use crate::reconciler::Reconciler;
use crds::{APPLICATION_LABEL, Application, DEPLOYMENT_LABEL, Deployment, Environment, ObjectKey, Repository};
use futures::StreamExt;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::{Api, Resource, ResourceExt};
use kube_runtime::{
    Controller, watcher,
    controller::{Action, Config as ControllerConfig},
    reflector::ObjectRef,
};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

type ReconcileFuture = Pin<Box<dyn Future<Output = Result<Action, ControllerError>> + Send>>;

/// Runs `controller` until shutdown.
///
/// Debounce waits 5 seconds after the last event before reconciling, which
/// batches the bursts of status and child updates a pass causes. Concurrency
/// is limited to 3 reconciliations per kind.
async fn watch_resource<K, F>(
    controller: Controller<K>,
    reconciler: Arc<Reconciler>,
    reconcile_fn: F,
    resource_name: &'static str,
) -> Result<(), ControllerError>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    F: Fn(Arc<Reconciler>, Arc<K>) -> ReconcileFuture + Send + Sync + Clone + 'static,
{
    info!("Starting {} watcher", resource_name);

    let error_policy =
        |obj: Arc<K>, error: &ControllerError, ctx: Arc<Reconciler>| ctx.error_action(obj.as_ref(), error);
    let reconcile = move |obj: Arc<K>, ctx: Arc<Reconciler>| reconcile_fn(ctx, obj);

    let controller_config = ControllerConfig::default()
        .debounce(Duration::from_secs(5))
        .concurrency(3);

    controller
        .with_config(controller_config)
        .shutdown_on_signal()
        .run(reconcile, error_policy, reconciler)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!("Reconciled {} {}", resource_name, obj),
                Err(e) => error!("Controller error for {}: {}", resource_name, e),
            }
        })
        .await;

    info!("{} watcher stopped", resource_name);
    Ok(())
}

/// Label selector matching any object carrying `label`
fn labelled(label: &str) -> watcher::Config {
    watcher::Config::default().labels(label)
}

/// Key of a namespaced object, if it has both fields
fn key_of<K: Resource>(obj: &K) -> Option<ObjectKey> {
    Some(ObjectKey::new(obj.meta().namespace.as_deref()?, obj.meta().name.as_deref()?))
}

/// Watches the Devbot resources and the objects they depend on.
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    repository_api: Api<Repository>,
    application_api: Api<Application>,
    environment_api: Api<Environment>,
    deployment_api: Api<Deployment>,
    job_api: Api<Job>,
    claim_api: Api<PersistentVolumeClaim>,
}

impl Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher").finish_non_exhaustive()
    }
}

impl Watcher {
    /// Creates a new watcher instance.
    pub fn new(
        reconciler: Arc<Reconciler>,
        repository_api: Api<Repository>,
        application_api: Api<Application>,
        environment_api: Api<Environment>,
        deployment_api: Api<Deployment>,
        job_api: Api<Job>,
        claim_api: Api<PersistentVolumeClaim>,
    ) -> Self {
        Self {
            reconciler,
            repository_api,
            application_api,
            environment_api,
            deployment_api,
            job_api,
            claim_api,
        }
    }

    /// Watches Repository resources; webhook refreshes arrive as annotation updates.
    pub async fn watch_repositories(&self) -> Result<(), ControllerError> {
        let controller = Controller::new(self.repository_api.clone(), watcher::Config::default());
        watch_resource(
            controller,
            Arc::clone(&self.reconciler),
            |reconciler, resource| Box::pin(async move { reconciler.reconcile_repository(resource).await }),
            "Repository",
        )
        .await
    }

    /// Watches Applications, their Environments, and the Repositories they list.
    pub async fn watch_applications(&self) -> Result<(), ControllerError> {
        let controller = Controller::new(self.application_api.clone(), watcher::Config::default());
        let applications = controller.store();
        let controller = controller
            .owns(self.environment_api.clone(), labelled(APPLICATION_LABEL))
            .watches(
                self.repository_api.clone(),
                watcher::Config::default(),
                move |repository: Repository| {
                    let Some(repository) = key_of(&repository) else {
                        return Vec::new();
                    };
                    applications
                        .state()
                        .into_iter()
                        .filter(|app| {
                            let namespace = app.namespace().unwrap_or_default();
                            app.spec.repository_settings(&namespace, &repository).is_some()
                        })
                        .map(|app| ObjectRef::from_obj(app.as_ref()))
                        .collect::<Vec<_>>()
                },
            );
        watch_resource(
            controller,
            Arc::clone(&self.reconciler),
            |reconciler, resource| Box::pin(async move { reconciler.reconcile_application(resource).await }),
            "Application",
        )
        .await
    }

    /// Watches Environments, their Deployments, and their owning Applications.
    pub async fn watch_environments(&self) -> Result<(), ControllerError> {
        let controller = Controller::new(self.environment_api.clone(), watcher::Config::default());
        let environments = controller.store();
        let controller = controller
            .owns(self.deployment_api.clone(), watcher::Config::default())
            .watches(
                self.application_api.clone(),
                watcher::Config::default(),
                move |app: Application| {
                    let namespace = app.namespace();
                    let name = app.name_any();
                    environments
                        .state()
                        .into_iter()
                        .filter(|env| {
                            env.namespace() == namespace
                                && controller_of(env.meta(), "Application").is_some_and(|o| o.name == name)
                        })
                        .map(|env| ObjectRef::from_obj(env.as_ref()))
                        .collect::<Vec<_>>()
                },
            );
        watch_resource(
            controller,
            Arc::clone(&self.reconciler),
            |reconciler, resource| Box::pin(async move { reconciler.reconcile_environment(resource).await }),
            "Environment",
        )
        .await
    }

    /// Watches Deployments, their jobs and workspace claims, and every object
    /// a pass reads: the Environment, the Application and the Repository.
    pub async fn watch_deployments(&self) -> Result<(), ControllerError> {
        let controller = Controller::new(self.deployment_api.clone(), watcher::Config::default());
        let by_repository = controller.store();
        let by_environment = by_repository.clone();
        let by_application = by_repository.clone();
        let controller = controller
            .owns(self.job_api.clone(), labelled(DEPLOYMENT_LABEL))
            .owns(self.claim_api.clone(), labelled(DEPLOYMENT_LABEL))
            .watches(
                self.repository_api.clone(),
                watcher::Config::default(),
                move |repository: Repository| {
                    let Some(repository) = key_of(&repository) else {
                        return Vec::new();
                    };
                    by_repository
                        .state()
                        .into_iter()
                        .filter(|d| {
                            let namespace = d.namespace().unwrap_or_default();
                            d.spec.repository.to_key(&namespace) == repository
                        })
                        .map(|d| ObjectRef::from_obj(d.as_ref()))
                        .collect::<Vec<_>>()
                },
            )
            .watches(
                self.environment_api.clone(),
                watcher::Config::default(),
                move |env: Environment| {
                    let namespace = env.namespace();
                    let name = env.name_any();
                    by_environment
                        .state()
                        .into_iter()
                        .filter(|d| {
                            d.namespace() == namespace
                                && controller_of(d.meta(), "Environment").is_some_and(|o| o.name == name)
                        })
                        .map(|d| ObjectRef::from_obj(d.as_ref()))
                        .collect::<Vec<_>>()
                },
            )
            .watches(
                self.application_api.clone(),
                watcher::Config::default(),
                move |app: Application| {
                    let namespace = app.namespace();
                    let name = label_value(&app.name_any());
                    by_application
                        .state()
                        .into_iter()
                        .filter(|d| {
                            d.namespace() == namespace && d.labels().get(APPLICATION_LABEL) == Some(&name)
                        })
                        .map(|d| ObjectRef::from_obj(d.as_ref()))
                        .collect::<Vec<_>>()
                },
            );
        watch_resource(
            controller,
            Arc::clone(&self.reconciler),
            |reconciler, resource| Box::pin(async move { reconciler.reconcile_deployment(resource).await }),
            "Deployment",
        )
        .await
    }
}
