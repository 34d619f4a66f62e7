//! Pipeline job construction.

use super::pipeline::{Phase, Target};
use crate::config::Config;
use crate::error::ControllerError;
use crate::naming::{MAX_NAME_LENGTH, label_value};
use crate::reconcile_helpers::controller_reference;
use crds::{
    BRANCH_ANNOTATION, DEPLOYMENT_LABEL, Deployment, PHASE_LABEL, REVISION_ANNOTATION,
};
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use std::collections::BTreeMap;

/// Mount point of the workspace volume in every job
pub const WORKSPACE_PATH: &str = "/data";

/// Baked manifest, relative to the workspace
pub const MANIFEST_FILE: &str = "manifest.yaml";

/// Overlay root used when the application does not name one
pub const DEFAULT_DEPLOY_DIR: &str = "deploy";

const BACKOFF_LIMIT: i32 = 10;
const TTL_SECONDS_AFTER_FINISHED: i32 = 300;
const WORKSPACE_VOLUME: &str = "workspace";

/// Room left for the random suffix the API server appends to `generateName`
const GENERATED_SUFFIX_LENGTH: usize = 5;

/// Everything a pipeline job is built from
#[derive(Debug, Clone)]
pub struct JobBuilder<'a> {
    pub deployment: &'a Deployment,
    pub phase: Phase,
    pub target: &'a Target,
    pub application: &'a str,
    pub environment: &'a str,
    /// The environment's preferred branch
    pub preferred_branch: &'a str,
    pub repository_default_branch: &'a str,
    pub git_url: &'a str,
    pub deploy_dir: Option<&'a str>,
    pub service_account: &'a str,
    pub claim_name: &'a str,
    pub config: &'a Config,
}

/// `generateName` prefix of a phase's jobs, short enough for the suffix
pub fn job_name_prefix(deployment: &str, phase: Phase) -> String {
    let suffix = format!("-{phase}-");
    let mut base = deployment.to_string();
    base.truncate(MAX_NAME_LENGTH - GENERATED_SUFFIX_LENGTH - suffix.len());
    while base.ends_with('-') {
        base.pop();
    }
    format!("{base}{suffix}")
}

impl JobBuilder<'_> {
    pub fn build(&self) -> Result<Job, ControllerError> {
        let deployment = self.deployment.name_any();
        let labels = BTreeMap::from([
            (PHASE_LABEL.to_string(), self.phase.to_string()),
            (DEPLOYMENT_LABEL.to_string(), label_value(&deployment)),
        ]);
        let annotations = BTreeMap::from([
            (BRANCH_ANNOTATION.to_string(), self.target.branch.clone()),
            (REVISION_ANNOTATION.to_string(), self.target.revision.clone()),
        ]);
        let image = match self.phase {
            Phase::Clone => &self.config.images.clone,
            Phase::Bake => &self.config.images.bake,
            Phase::Apply => &self.config.images.apply,
        };

        Ok(Job {
            metadata: ObjectMeta {
                generate_name: Some(job_name_prefix(&deployment, self.phase)),
                namespace: self.deployment.namespace(),
                labels: Some(labels.clone()),
                annotations: Some(annotations),
                owner_references: Some(vec![controller_reference(self.deployment)?]),
                ..ObjectMeta::default()
            },
            spec: Some(JobSpec {
                backoff_limit: Some(BACKOFF_LIMIT),
                ttl_seconds_after_finished: Some(TTL_SECONDS_AFTER_FINISHED),
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(labels),
                        ..ObjectMeta::default()
                    }),
                    spec: Some(PodSpec {
                        containers: vec![Container {
                            name: self.phase.to_string(),
                            image: Some(image.clone()),
                            working_dir: Some(WORKSPACE_PATH.to_string()),
                            env: Some(env_vars(self.env())),
                            volume_mounts: Some(vec![VolumeMount {
                                name: WORKSPACE_VOLUME.to_string(),
                                mount_path: WORKSPACE_PATH.to_string(),
                                ..VolumeMount::default()
                            }]),
                            ..Container::default()
                        }],
                        restart_policy: Some(String::from("Never")),
                        service_account_name: Some(self.service_account.to_string())
                            .filter(|sa| !sa.is_empty()),
                        volumes: Some(vec![Volume {
                            name: WORKSPACE_VOLUME.to_string(),
                            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                                claim_name: self.claim_name.to_string(),
                                ..PersistentVolumeClaimVolumeSource::default()
                            }),
                            ..Volume::default()
                        }]),
                        ..PodSpec::default()
                    }),
                },
                ..JobSpec::default()
            }),
            ..Job::default()
        })
    }

    /// Environment of the job container: shared variables, then the phase's own
    fn env(&self) -> Vec<(String, String)> {
        let mut vars = vec![("LOG_LEVEL".to_string(), self.config.log_level.clone())];
        vars.extend(self.config.observability_env.iter().cloned());

        let deployment = self.deployment.name_any();
        let phase_vars: Vec<(&str, String)> = match self.phase {
            Phase::Clone => vec![
                ("BRANCH", self.target.branch.clone()),
                ("GIT_URL", self.git_url.to_string()),
                ("SHA", self.target.revision.clone()),
            ],
            Phase::Bake => vec![
                ("ACTUAL_BRANCH", self.target.branch.clone()),
                ("APPLICATION_NAME", self.application.to_string()),
                ("ENVIRONMENT_NAME", self.environment.to_string()),
                ("DEPLOYMENT_NAME", deployment),
                (
                    "BASE_DEPLOY_DIR",
                    self.deploy_dir
                        .filter(|d| !d.trim().is_empty())
                        .unwrap_or(DEFAULT_DEPLOY_DIR)
                        .to_string(),
                ),
                ("PREFERRED_BRANCH", self.preferred_branch.to_string()),
                ("REPO_DEFAULT_BRANCH", self.repository_default_branch.to_string()),
                ("SHA", self.target.revision.clone()),
                ("MANIFEST_FILE", MANIFEST_FILE.to_string()),
            ],
            Phase::Apply => vec![
                ("APPLICATION_NAME", self.application.to_string()),
                ("ENVIRONMENT_NAME", self.environment.to_string()),
                ("DEPLOYMENT_NAME", deployment),
                ("MANIFEST_FILE", MANIFEST_FILE.to_string()),
            ],
        };
        vars.extend(phase_vars.into_iter().map(|(k, v)| (k.to_string(), v)));
        vars
    }
}

fn env_vars(raw_vars: Vec<(String, String)>) -> Vec<EnvVar> {
    raw_vars
        .into_iter()
        .map(|(name, value)| EnvVar {
            name,
            value: Some(value),
            ..EnvVar::default()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_test_deployment, test_config};

    fn build(phase: Phase, deploy_dir: Option<&str>) -> Job {
        let deployment = create_test_deployment("shop-main-api", "team-a", "api", "shop-main");
        let target = Target {
            branch: "main".to_string(),
            revision: "s1".to_string(),
        };
        let mut config = test_config();
        config.observability_env = vec![("OTEL_SERVICE_NAME".to_string(), "devbot".to_string())];
        JobBuilder {
            deployment: &deployment,
            phase,
            target: &target,
            application: "shop",
            environment: "shop-main",
            preferred_branch: "feature",
            repository_default_branch: "main",
            git_url: "https://github.com/acme/api.git",
            deploy_dir,
            service_account: "shop-deployer",
            claim_name: "shop-main-api-workspace",
            config: &config,
        }
        .build()
        .unwrap()
    }

    fn env(job: &Job) -> BTreeMap<String, String> {
        job.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0]
            .env
            .clone()
            .unwrap()
            .into_iter()
            .map(|e| (e.name, e.value.unwrap_or_default()))
            .collect()
    }

    #[test]
    fn test_job_shape() {
        let job = build(Phase::Clone, None);
        assert_eq!(job.metadata.generate_name.as_deref(), Some("shop-main-api-clone-"));
        assert_eq!(job.metadata.namespace.as_deref(), Some("team-a"));

        let labels = job.metadata.labels.clone().unwrap();
        assert_eq!(labels[PHASE_LABEL], "clone");
        assert_eq!(labels[DEPLOYMENT_LABEL], "shop-main-api");
        let annotations = job.metadata.annotations.clone().unwrap();
        assert_eq!(annotations[BRANCH_ANNOTATION], "main");
        assert_eq!(annotations[REVISION_ANNOTATION], "s1");
        assert_eq!(job.metadata.owner_references.clone().unwrap()[0].kind, "Deployment");

        let spec = job.spec.unwrap();
        assert_eq!(spec.backoff_limit, Some(10));
        assert_eq!(spec.ttl_seconds_after_finished, Some(300));
        let pod = spec.template.spec.unwrap();
        assert_eq!(pod.restart_policy.as_deref(), Some("Never"));
        assert_eq!(pod.service_account_name.as_deref(), Some("shop-deployer"));
        assert_eq!(pod.containers[0].image.as_deref(), Some("ghcr.io/devbot/clone:test"));
        assert_eq!(pod.containers[0].volume_mounts.as_ref().unwrap()[0].mount_path, "/data");
        assert_eq!(
            pod.volumes.unwrap()[0]
                .persistent_volume_claim
                .as_ref()
                .map(|c| c.claim_name.as_str()),
            Some("shop-main-api-workspace")
        );
    }

    #[test]
    fn test_clone_env() {
        let vars = env(&build(Phase::Clone, None));
        assert_eq!(vars["BRANCH"], "main");
        assert_eq!(vars["GIT_URL"], "https://github.com/acme/api.git");
        assert_eq!(vars["SHA"], "s1");
        assert_eq!(vars["LOG_LEVEL"], "info");
        assert_eq!(vars["OTEL_SERVICE_NAME"], "devbot");
        assert!(!vars.contains_key("MANIFEST_FILE"));
    }

    #[test]
    fn test_bake_env() {
        let vars = env(&build(Phase::Bake, None));
        assert_eq!(vars["ACTUAL_BRANCH"], "main");
        assert_eq!(vars["PREFERRED_BRANCH"], "feature");
        assert_eq!(vars["REPO_DEFAULT_BRANCH"], "main");
        assert_eq!(vars["APPLICATION_NAME"], "shop");
        assert_eq!(vars["ENVIRONMENT_NAME"], "shop-main");
        assert_eq!(vars["DEPLOYMENT_NAME"], "shop-main-api");
        assert_eq!(vars["BASE_DEPLOY_DIR"], "deploy");
        assert_eq!(vars["MANIFEST_FILE"], "manifest.yaml");

        let vars = env(&build(Phase::Bake, Some("k8s/overlays")));
        assert_eq!(vars["BASE_DEPLOY_DIR"], "k8s/overlays");
    }

    #[test]
    fn test_apply_env() {
        let vars = env(&build(Phase::Apply, None));
        assert_eq!(vars["DEPLOYMENT_NAME"], "shop-main-api");
        assert_eq!(vars["MANIFEST_FILE"], "manifest.yaml");
        assert!(!vars.contains_key("SHA"));
    }

    #[test]
    fn test_job_name_prefix_fits() {
        let prefix = job_name_prefix(&"d".repeat(63), Phase::Apply);
        assert!(prefix.len() + 5 <= MAX_NAME_LENGTH);
        assert!(prefix.ends_with("-apply-"));
    }
}
