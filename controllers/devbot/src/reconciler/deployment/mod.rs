//! Deployment reconciliation
//!
//! Resolves the Environment, Application and Repository a Deployment
//! depends on, keeps its workspace claim, and drives the job pipeline one
//! step per pass.

pub mod jobs;
pub mod pipeline;
pub mod workspace;

use self::jobs::JobBuilder;
use self::pipeline::{Step, latest_job, next_step, select_target};
use super::{DEPENDENCY_RETRY, Reconciler, require};
use crate::error::ControllerError;
use crate::reconcile_helpers::{StatusHandle, controller_of, lookup, object_key};
use crds::{
    Application, ConditionType, Conditions, CurrentReason, DEPLOYMENT_LABEL, Deployment,
    DeploymentStatus, Environment, InvalidReason, ObjectKey, Repository, StaleReason,
};
use k8s_openapi::api::batch::v1::Job;
use kube::api::{Api, PostParams};
use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Reasons that only hold while the pipeline has not converged
const PIPELINE_REASONS: [StaleReason; 9] = [
    StaleReason::Cloning,
    StaleReason::Baking,
    StaleReason::Applying,
    StaleReason::CloneFailed,
    StaleReason::BakingFailed,
    StaleReason::ApplyFailed,
    StaleReason::BranchNotFound,
    StaleReason::PersistentVolumeMissing,
    StaleReason::InternalError,
];

/// Objects a Deployment is computed from
struct Inputs {
    environment: Environment,
    application: Application,
    repository: Repository,
    repository_key: ObjectKey,
}

/// Why a pass stopped before reaching the pipeline
enum Blocked {
    /// Spec problem, recorded as `Invalid`
    Invalid(String),
    /// Dependency problem already recorded; retry after the delay
    Retry(Duration),
}

impl Reconciler {
    /// Reconciles one Deployment (finalizer included)
    pub async fn reconcile_deployment(&self, deployment: Arc<Deployment>) -> Result<Action, ControllerError> {
        self.finalized(
            deployment,
            |d| self.apply_deployment(d),
            |d| async move {
                self.delete_workspace(&d).await?;
                Ok(Action::await_change())
            },
        )
        .await
    }

    async fn apply_deployment(&self, deployment: Arc<Deployment>) -> Result<Action, ControllerError> {
        let key = object_key(deployment.as_ref())?;
        let generation = deployment.metadata.generation;
        let mut status =
            StatusHandle::new(self.api(&key.namespace), deployment.as_ref(), deployment.status.as_ref())?;
        status.status.clear_stale(generation);

        let inputs = match self.deployment_inputs(&deployment, &key, &mut status.status).await {
            Ok(inputs) => inputs,
            Err(Blocked::Invalid(message)) => {
                status
                    .status
                    .set_due_to(InvalidReason::InvalidDeployment, generation, message);
                status.status.clear(ConditionType::Current);
                status.flush().await?;
                return Ok(Action::await_change());
            }
            Err(Blocked::Retry(delay)) => {
                status.status.clear(ConditionType::Current);
                status.flush().await?;
                return Ok(Action::requeue(delay));
            }
        };
        status
            .status
            .clear_if_due_to_any_of(&[InvalidReason::InvalidDeployment]);

        let app_namespace = inputs.application.namespace().unwrap_or_default();
        let Some(settings) = inputs
            .application
            .spec
            .repository_settings(&app_namespace, &inputs.repository_key)
        else {
            status.status.set_due_to(
                InvalidReason::InvalidDeployment,
                generation,
                format!(
                    "repository '{}' is not part of application '{}'",
                    inputs.repository_key,
                    inputs.application.name_any()
                ),
            );
            status.status.clear(ConditionType::Current);
            status.flush().await?;
            return Ok(Action::await_change());
        };
        let Some(git_url) = inputs.repository.clone_url() else {
            status.status.set_due_to(
                InvalidReason::InvalidDeployment,
                generation,
                format!("repository '{}' has no supported type", inputs.repository_key),
            );
            status.status.clear(ConditionType::Current);
            status.flush().await?;
            return Ok(Action::await_change());
        };

        let Some(claim_name) = self.ensure_workspace(&deployment, &mut status).await? else {
            status.status.clear(ConditionType::Current);
            status.flush().await?;
            return Ok(Action::requeue(super::TRANSIENT_RETRY));
        };

        let repository_status = inputs.repository.status.clone().unwrap_or_default();
        let Some(target) = select_target(
            &inputs.environment.spec.branch,
            settings.missing_branch_strategy,
            &repository_status,
        ) else {
            status.status.set_due_to(
                StaleReason::BranchNotFound,
                generation,
                format!(
                    "neither branch '{}' nor the default branch of '{}' has a known revision",
                    inputs.environment.spec.branch, inputs.repository_key
                ),
            );
            status.status.clear(ConditionType::Current);
            status.flush().await?;
            return Ok(Action::requeue(DEPENDENCY_RETRY));
        };
        status
            .status
            .clear_if_due_to_any_of(&[StaleReason::BranchNotFound]);

        let uid = deployment
            .uid()
            .ok_or_else(|| ControllerError::MissingMetadata(format!("Deployment {key} has no uid")))?;
        let job_api: Api<Job> = self.api(&key.namespace);
        let jobs = self
            .list_children(&job_api, DEPLOYMENT_LABEL, &key.name, &uid)
            .await?;
        let latest = latest_job(&jobs);

        let transition = next_step(&target, &status.status, latest.as_ref());
        debug!("Deployment {} targets {:?}: {:?}", key, target, transition);
        if let Some(applied) = transition.applied {
            status.status.last_applied_revision = Some(applied);
        }

        match transition.step {
            Step::Idle => {
                status.status.clear_if_due_to_any_of(&PIPELINE_REASONS);
                status.status.set_due_to(
                    CurrentReason::Applied,
                    generation,
                    format!("{} is applied at {}", target.branch, target.revision),
                );
            }
            Step::Wait {
                reason,
                status: condition_status,
                message,
            } => {
                status
                    .status
                    .set_with_status(reason, condition_status, generation, message);
                status.status.clear(ConditionType::Current);
            }
            Step::Launch {
                phase,
                restart,
                reason,
                message,
            } => {
                if restart {
                    status.status.branch = Some(target.branch.clone());
                    status.status.last_attempted_revision = Some(target.revision.clone());
                    status.flush().await?;
                }
                let app_name = inputs.application.name_any();
                let env_name = inputs.environment.name_any();
                let job = JobBuilder {
                    deployment: &deployment,
                    phase,
                    target: &target,
                    application: &app_name,
                    environment: &env_name,
                    preferred_branch: &inputs.environment.spec.branch,
                    repository_default_branch: repository_status.default_branch.as_deref().unwrap_or_default(),
                    git_url: &git_url,
                    deploy_dir: settings.path.as_deref(),
                    service_account: &inputs.application.spec.service_account_name,
                    claim_name: &claim_name,
                    config: &self.config,
                }
                .build()?;
                let created = job_api.create(&PostParams::default(), &job).await?;
                self.metrics.job_launched(phase.as_str());
                info!(
                    "Launched {} job {} for {} ({} at {})",
                    phase,
                    created.name_any(),
                    key,
                    target.branch,
                    target.revision
                );
                status.status.set_due_to(reason, generation, message);
                status.status.clear(ConditionType::Current);
            }
        }
        status.flush().await?;
        Ok(Action::await_change())
    }

    async fn deployment_inputs(
        &self,
        deployment: &Deployment,
        key: &ObjectKey,
        status: &mut DeploymentStatus,
    ) -> Result<Inputs, Blocked> {
        let generation = deployment.metadata.generation;
        let Some(env_owner) = controller_of(deployment.meta(), &Environment::kind(&())) else {
            return Err(Blocked::Invalid(
                "deployment must be controlled by an Environment".to_string(),
            ));
        };
        if deployment.spec.repository.name.trim().is_empty() {
            return Err(Blocked::Invalid("deployment must reference a repository".to_string()));
        }

        let env_api: Api<Environment> = self.api(&key.namespace);
        let environment = require(
            lookup(&env_api, &env_owner.name).await,
            status,
            generation,
            StaleReason::EnvironmentNotFound,
            None,
            &format!("environment '{}/{}'", key.namespace, env_owner.name),
        )
        .map_err(Blocked::Retry)?;

        let Some(app_owner) = controller_of(environment.meta(), &Application::kind(&())) else {
            status.set_due_to(
                StaleReason::ApplicationNotFound,
                generation,
                format!(
                    "environment '{}/{}' is not controlled by an Application",
                    key.namespace, env_owner.name
                ),
            );
            return Err(Blocked::Retry(DEPENDENCY_RETRY));
        };
        let app_api: Api<Application> = self.api(&key.namespace);
        let application = require(
            lookup(&app_api, &app_owner.name).await,
            status,
            generation,
            StaleReason::ApplicationNotFound,
            Some(StaleReason::ApplicationNotAccessible),
            &format!("application '{}/{}'", key.namespace, app_owner.name),
        )
        .map_err(Blocked::Retry)?;

        let repository_key = deployment.spec.repository.to_key(&key.namespace);
        let repo_api: Api<Repository> = self.api(&repository_key.namespace);
        let repository = require(
            lookup(&repo_api, &repository_key.name).await,
            status,
            generation,
            StaleReason::RepositoryNotFound,
            Some(StaleReason::RepositoryNotAccessible),
            &format!("repository '{repository_key}'"),
        )
        .map_err(Blocked::Retry)?;

        Ok(Inputs {
            environment,
            application,
            repository,
            repository_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciler::environment::desired_deployment;
    use crate::test_utils::*;
    use crds::MissingBranchStrategy;

    #[test]
    fn test_pipeline_reasons_keep_dependency_reasons() {
        let mut status = DeploymentStatus::default();
        status.set_due_to(StaleReason::BakingFailed, Some(1), "bake failed");
        assert!(status.clear_if_due_to_any_of(&PIPELINE_REASONS));
        assert!(!status.has_reason(StaleReason::BakingFailed));

        status.set_due_to(StaleReason::RepositoryNotFound, Some(1), "gone");
        assert!(!status.clear_if_due_to_any_of(&PIPELINE_REASONS));
        assert!(status.has_reason(StaleReason::RepositoryNotFound));
    }

    #[test]
    fn test_created_deployment_resolves_application_settings() {
        let mut app = create_test_application("shop", "team-a", &["api"]);
        app.spec.repositories[0].path = Some("k8s".to_string());
        app.spec.repositories[0].missing_branch_strategy = MissingBranchStrategy::UseDefault;
        let env = create_test_environment("shop-feature", "team-a", "feature", "shop");
        let repository = create_test_repository("api", "team-a", "main", &[("main", "s1")]);

        let deployment = desired_deployment(&env, "shop", &ObjectKey::new("team-a", "api")).unwrap();
        let key = deployment.spec.repository.to_key("team-a");
        let settings = app.spec.repository_settings("team-a", &key).unwrap();
        assert_eq!(settings.path.as_deref(), Some("k8s"));

        let target = select_target(
            &env.spec.branch,
            settings.missing_branch_strategy,
            repository.status.as_ref().unwrap(),
        )
        .unwrap();
        assert_eq!(target.branch, "main");
        assert_eq!(target.revision, "s1");
    }
}
