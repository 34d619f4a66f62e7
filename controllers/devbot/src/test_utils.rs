//! Test utilities for unit testing reconcilers
//!
//! Builders for the Devbot CRDs with the metadata the API server would have
//! set (uids, namespaces, controller references).

use crate::config::Config;
use crate::naming::label_value;
use crds::*;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::Client;
use std::collections::HashMap;

/// Configuration with fixed job images and no optional settings
pub fn test_config() -> Config {
    let vars: HashMap<String, String> = [
        ("CLONE_IMAGE", "ghcr.io/devbot/clone:test"),
        ("BAKE_IMAGE", "ghcr.io/devbot/bake:test"),
        ("APPLY_IMAGE", "ghcr.io/devbot/apply:test"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    Config::from_lookup(|k| vars.get(k).cloned(), Vec::new()).unwrap()
}

/// Client pointing at an address nothing listens on; only for code paths
/// that never reach the API server. Must be created inside a Tokio runtime.
pub fn offline_client() -> Client {
    let config = kube::Config::new("http://127.0.0.1:1".parse().unwrap());
    Client::try_from(config).unwrap()
}

fn controller_owner(api_version: &str, kind: &str, name: &str) -> OwnerReference {
    OwnerReference {
        api_version: api_version.to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
        uid: format!("uid-{name}"),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Helper to create a test Application over repositories in its own namespace
pub fn create_test_application(name: &str, namespace: &str, repositories: &[&str]) -> Application {
    Application {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(format!("uid-{name}")),
            generation: Some(1),
            ..Default::default()
        },
        spec: ApplicationSpec {
            repositories: repositories
                .iter()
                .map(|r| ApplicationRepositoryReference {
                    name: r.to_string(),
                    ..Default::default()
                })
                .collect(),
            service_account_name: format!("{name}-deployer"),
        },
        status: None,
    }
}

/// Helper to create a test Environment controlled by Application `application`
pub fn create_test_environment(name: &str, namespace: &str, branch: &str, application: &str) -> Environment {
    Environment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(format!("uid-{name}")),
            generation: Some(1),
            labels: Some([(APPLICATION_LABEL.to_string(), label_value(application))].into()),
            owner_references: Some(vec![controller_owner(
                "devbot.com/v1alpha1",
                "Application",
                application,
            )]),
            ..Default::default()
        },
        spec: EnvironmentSpec {
            branch: branch.to_string(),
        },
        status: None,
    }
}

/// Helper to create a test Deployment of `repository` controlled by Environment `environment`
pub fn create_test_deployment(name: &str, namespace: &str, repository: &str, environment: &str) -> Deployment {
    Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(format!("uid-{name}")),
            generation: Some(1),
            labels: Some([(ENVIRONMENT_LABEL.to_string(), label_value(environment))].into()),
            owner_references: Some(vec![controller_owner(
                "devbot.com/v1alpha1",
                "Environment",
                environment,
            )]),
            ..Default::default()
        },
        spec: DeploymentSpec {
            repository: ObjectReference::new(repository),
        },
        status: None,
    }
}

/// Helper to create a test GitHub Repository with the given branch revisions
pub fn create_test_repository(
    name: &str,
    namespace: &str,
    default_branch: &str,
    revisions: &[(&str, &str)],
) -> Repository {
    Repository {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(format!("uid-{name}")),
            generation: Some(1),
            ..Default::default()
        },
        spec: RepositorySpec {
            github: Some(GitHubRepositorySpec {
                owner: "acme".to_string(),
                name: name.to_string(),
                ..Default::default()
            }),
            refresh_interval: None,
        },
        status: Some(RepositoryStatus {
            resolved_name: Some(format!("acme/{name}")),
            default_branch: Some(default_branch.to_string()),
            revisions: revisions
                .iter()
                .map(|(b, s)| (b.to_string(), s.to_string()))
                .collect(),
            ..Default::default()
        }),
    }
}
