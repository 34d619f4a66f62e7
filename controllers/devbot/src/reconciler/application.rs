//! Application reconciliation
//!
//! Keeps one Environment per branch found in any of the application's
//! repositories.

use super::children::plan_children;
use super::{Reconciler, create_with_fallback_name, delete_child, require};
use crate::error::ControllerError;
use crate::naming::{environment_name, label_value};
use crate::reconcile_helpers::{StatusHandle, controller_reference, lookup, object_key};
use crds::{
    APPLICATION_LABEL, Application, ConditionType, Conditions, Environment, EnvironmentSpec,
    InvalidReason, Repository, RepositoryStatus, StaleReason,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::Api;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Every branch present in any of `statuses`
pub fn union_branches<'a>(statuses: impl IntoIterator<Item = &'a RepositoryStatus>) -> BTreeSet<String> {
    statuses
        .into_iter()
        .flat_map(|s| s.revisions.keys().cloned())
        .collect()
}

/// First repository reference that cannot name a Repository
pub fn invalid_reference(app: &Application) -> Option<usize> {
    app.spec
        .repositories
        .iter()
        .position(|r| r.name.trim().is_empty())
}

/// The Environment an Application creates for `branch`
pub fn desired_environment(app: &Application, branch: &str) -> Result<Environment, ControllerError> {
    let app_name = app.name_any();
    Ok(Environment {
        metadata: ObjectMeta {
            name: Some(environment_name(&app_name, branch)),
            namespace: app.namespace(),
            labels: Some(BTreeMap::from([(APPLICATION_LABEL.to_string(), label_value(&app_name))])),
            owner_references: Some(vec![controller_reference(app)?]),
            ..Default::default()
        },
        spec: EnvironmentSpec {
            branch: branch.to_string(),
        },
        status: None,
    })
}

impl Reconciler {
    /// Reconciles one Application (finalizer included)
    pub async fn reconcile_application(&self, app: Arc<Application>) -> Result<Action, ControllerError> {
        self.finalized(
            app,
            |app| self.apply_application(app),
            |_| async { Ok(Action::await_change()) },
        )
        .await
    }

    async fn apply_application(&self, app: Arc<Application>) -> Result<Action, ControllerError> {
        let key = object_key(app.as_ref())?;
        let generation = app.metadata.generation;
        let mut status = StatusHandle::new(self.api(&key.namespace), app.as_ref(), app.status.as_ref())?;
        status.status.clear_stale(generation);

        if let Some(index) = invalid_reference(&app) {
            status.status.set_due_to(
                InvalidReason::InvalidRepositoryReference,
                generation,
                format!("repository reference #{index} has no name"),
            );
            status.flush().await?;
            return Ok(Action::await_change());
        }
        status
            .status
            .clear_if_due_to_any_of(&[InvalidReason::InvalidRepositoryReference]);

        let mut repositories = Vec::with_capacity(app.spec.repositories.len());
        for reference in &app.spec.repositories {
            let repo_key = reference.to_key(&key.namespace);
            let api: Api<Repository> = self.api(&repo_key.namespace);
            let found = require(
                lookup(&api, &repo_key.name).await,
                &mut status.status,
                generation,
                StaleReason::RepositoryNotFound,
                Some(StaleReason::RepositoryNotAccessible),
                &format!("repository '{repo_key}'"),
            );
            match found {
                Ok(repo) => repositories.push(repo.status.unwrap_or_default()),
                Err(retry) => {
                    status.flush().await?;
                    return Ok(Action::requeue(retry));
                }
            }
        }
        let branches = union_branches(&repositories);
        debug!("Application {} spans branch(es) {:?}", key, branches);

        let uid = app
            .uid()
            .ok_or_else(|| ControllerError::MissingMetadata(format!("Application {key} has no uid")))?;
        let api: Api<Environment> = self.api(&key.namespace);
        let existing = self
            .list_children(&api, APPLICATION_LABEL, &key.name, &uid)
            .await?;
        let plan = plan_children(&branches, &existing, |env| env.spec.branch.clone());

        for env in &plan.delete {
            info!("Deleting Environment {}/{} of {}", key.namespace, env.name_any(), key);
            delete_child(&api, &env.name_any()).await?;
        }
        for branch in &plan.create {
            let created = create_with_fallback_name(&api, desired_environment(&app, branch)?).await?;
            info!(
                "Created Environment {}/{} for branch {}",
                key.namespace,
                created.name_any(),
                branch
            );
        }

        let pending = plan
            .keep
            .iter()
            .filter(|env| {
                !env.status
                    .as_ref()
                    .is_some_and(|s| s.is_true(ConditionType::Current))
            })
            .count()
            + plan.create.len();
        if pending > 0 {
            status.status.set_due_to(
                StaleReason::EnvironmentsPending,
                generation,
                format!("{pending} environment(s) are not current"),
            );
        } else {
            status.status.clear_if_due_to_any_of(&[
                StaleReason::EnvironmentsPending,
                StaleReason::InternalError,
            ]);
        }
        status.flush().await?;
        Ok(Action::await_change())
    }
}
