//! Application CRD
//!
//! An application is a set of repositories deployed together. Every branch
//! found in any of its repositories becomes an Environment.

use crate::conditions::{Condition, Conditions};
use crate::references::{ObjectKey, ObjectReference};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[kube(
    group = "devbot.com",
    version = "v1alpha1",
    kind = "Application",
    namespaced,
    status = "ApplicationStatus",
    shortname = "app",
    printcolumn = r#"{"name":"Service Account","type":"string","jsonPath":".spec.serviceAccountName"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSpec {
    /// Repositories that make up this application
    #[serde(default)]
    pub repositories: Vec<ApplicationRepositoryReference>,

    /// Service account used by the deployment jobs
    #[serde(default)]
    pub service_account_name: String,
}

/// A repository participating in an application, with deployment settings
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationRepositoryReference {
    /// Namespace of the Repository (defaults to the Application's namespace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Name of the Repository
    pub name: String,

    /// Directory inside the repository holding the overlay directories
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// What to do when the repository lacks an environment's branch
    #[serde(default)]
    pub missing_branch_strategy: MissingBranchStrategy,
}

impl ApplicationRepositoryReference {
    /// The Repository this entry points at, as an object reference
    pub fn as_object_reference(&self) -> ObjectReference {
        ObjectReference {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }

    /// Fully-qualified Repository key
    pub fn to_key(&self, application_namespace: &str) -> ObjectKey {
        self.as_object_reference().to_key(application_namespace)
    }
}

/// Policy for repositories lacking an environment's preferred branch
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum MissingBranchStrategy {
    /// Deploy the repository's default branch instead
    #[default]
    UseDefault,
    /// Reserved
    Ignore,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationStatus {
    /// Current conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl Conditions for ApplicationStatus {
    fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.conditions
    }
}

impl ApplicationSpec {
    /// Settings for the repository identified by `key`, if it is part of this application
    pub fn repository_settings(
        &self,
        application_namespace: &str,
        key: &ObjectKey,
    ) -> Option<&ApplicationRepositoryReference> {
        self.repositories
            .iter()
            .find(|r| &r.to_key(application_namespace) == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_branch_strategy_defaults_to_use_default() {
        let r: ApplicationRepositoryReference =
            serde_json::from_value(serde_json::json!({"name": "r1"})).unwrap_or_default();
        assert_eq!(r.name, "r1");
        assert_eq!(r.missing_branch_strategy, MissingBranchStrategy::UseDefault);
    }

    #[test]
    fn test_repository_settings_lookup_resolves_namespace() {
        let spec = ApplicationSpec {
            repositories: vec![
                ApplicationRepositoryReference {
                    name: "r1".into(),
                    path: Some("deploy".into()),
                    ..Default::default()
                },
                ApplicationRepositoryReference {
                    namespace: Some("shared".into()),
                    name: "r1".into(),
                    ..Default::default()
                },
            ],
            service_account_name: "deployer".into(),
        };

        let local = spec.repository_settings("apps", &ObjectKey::new("apps", "r1"));
        assert_eq!(local.and_then(|r| r.path.as_deref()), Some("deploy"));

        let shared = spec.repository_settings("apps", &ObjectKey::new("shared", "r1"));
        assert_eq!(shared.and_then(|r| r.namespace.as_deref()), Some("shared"));

        assert!(spec.repository_settings("apps", &ObjectKey::new("apps", "r2")).is_none());
    }
}
