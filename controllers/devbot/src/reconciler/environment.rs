//! Environment reconciliation
//!
//! Keeps one Deployment per repository of the owning Application and reports
//! `Current` once all of them are.

use super::children::plan_children;
use super::{Reconciler, create_with_fallback_name, delete_child, require};
use crate::error::ControllerError;
use crate::naming::{deployment_name, label_value};
use crate::reconcile_helpers::{StatusHandle, controller_of, controller_reference, lookup, object_key};
use crds::{
    APPLICATION_LABEL, Application, ConditionType, Conditions, CurrentReason, Deployment,
    DeploymentSpec, ENVIRONMENT_LABEL, Environment, InvalidReason, ObjectKey, ObjectReference,
    StaleReason,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::Api;
use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Repository keys the Environment must have a Deployment for
pub fn desired_repositories(app: &Application, app_namespace: &str) -> BTreeSet<ObjectKey> {
    app.spec
        .repositories
        .iter()
        .map(|r| r.to_key(app_namespace))
        .collect()
}

/// The Deployment an Environment creates for `repository`
pub fn desired_deployment(
    env: &Environment,
    application: &str,
    repository: &ObjectKey,
) -> Result<Deployment, ControllerError> {
    let env_name = env.name_any();
    Ok(Deployment {
        metadata: ObjectMeta {
            name: Some(deployment_name(&env_name, &repository.name)),
            namespace: env.namespace(),
            labels: Some(BTreeMap::from([
                (APPLICATION_LABEL.to_string(), label_value(application)),
                (ENVIRONMENT_LABEL.to_string(), label_value(&env_name)),
            ])),
            owner_references: Some(vec![controller_reference(env)?]),
            ..Default::default()
        },
        spec: DeploymentSpec {
            repository: ObjectReference::with_namespace(&repository.namespace, &repository.name),
        },
        status: None,
    })
}

impl Reconciler {
    /// Reconciles one Environment (finalizer included)
    pub async fn reconcile_environment(&self, env: Arc<Environment>) -> Result<Action, ControllerError> {
        self.finalized(
            env,
            |env| self.apply_environment(env),
            |_| async { Ok(Action::await_change()) },
        )
        .await
    }

    async fn apply_environment(&self, env: Arc<Environment>) -> Result<Action, ControllerError> {
        let key = object_key(env.as_ref())?;
        let generation = env.metadata.generation;
        let mut status = StatusHandle::new(self.api(&key.namespace), env.as_ref(), env.status.as_ref())?;
        status.status.clear_stale(generation);

        let owner = controller_of(env.meta(), &Application::kind(&()));
        let (Some(owner), false) = (owner, env.spec.branch.trim().is_empty()) else {
            status.status.set_due_to(
                InvalidReason::InvalidEnvironment,
                generation,
                "environment must have a branch and be controlled by an Application",
            );
            status.status.clear(ConditionType::Current);
            status.flush().await?;
            return Ok(Action::await_change());
        };
        status
            .status
            .clear_if_due_to_any_of(&[InvalidReason::InvalidEnvironment]);

        let app_api: Api<Application> = self.api(&key.namespace);
        let app = match require(
            lookup(&app_api, &owner.name).await,
            &mut status.status,
            generation,
            StaleReason::ApplicationNotFound,
            Some(StaleReason::ApplicationNotAccessible),
            &format!("application '{}/{}'", key.namespace, owner.name),
        ) {
            Ok(app) => app,
            Err(retry) => {
                status.status.clear(ConditionType::Current);
                status.flush().await?;
                return Ok(Action::requeue(retry));
            }
        };

        let desired = desired_repositories(&app, &key.namespace);
        let uid = env
            .uid()
            .ok_or_else(|| ControllerError::MissingMetadata(format!("Environment {key} has no uid")))?;
        let api: Api<Deployment> = self.api(&key.namespace);
        let existing = self
            .list_children(&api, ENVIRONMENT_LABEL, &key.name, &uid)
            .await?;
        let plan = plan_children(&desired, &existing, |d| d.spec.repository.to_key(&key.namespace));

        for deployment in &plan.delete {
            info!("Deleting Deployment {}/{} of {}", key.namespace, deployment.name_any(), key);
            delete_child(&api, &deployment.name_any()).await?;
        }
        for repository in &plan.create {
            let created =
                create_with_fallback_name(&api, desired_deployment(&env, &owner.name, repository)?).await?;
            info!(
                "Created Deployment {}/{} for repository {}",
                key.namespace,
                created.name_any(),
                repository
            );
        }

        let current = plan
            .keep
            .iter()
            .filter(|d| d.status.as_ref().is_some_and(|s| s.is_true(ConditionType::Current)))
            .count();
        let pending = plan.keep.len() - current + plan.create.len();
        debug!("Environment {}: {} current, {} pending deployment(s)", key, current, pending);

        if pending == 0 {
            status.status.clear_if_due_to_any_of(&[
                StaleReason::DeploymentsPending,
                StaleReason::InternalError,
            ]);
            status.status.set_due_to(
                CurrentReason::ChildrenCurrent,
                generation,
                "all deployments are current",
            );
        } else {
            status.status.set_due_to(
                StaleReason::DeploymentsPending,
                generation,
                format!("{pending} deployment(s) are not current"),
            );
            status.status.clear(ConditionType::Current);
        }
        status.flush().await?;
        Ok(Action::await_change())
    }
}
