//! Repository CRD
//!
//! A source repository on a forge. The controller discovers its default
//! branch and the head revision of every branch, and keeps a push webhook
//! registered so that pushes trigger an immediate refresh.

use crate::conditions::{Condition, Conditions};
use crate::references::SecretKeyReference;
use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[kube(
    group = "devbot.com",
    version = "v1alpha1",
    kind = "Repository",
    namespaced,
    status = "RepositoryStatus",
    shortname = "repo",
    printcolumn = r#"{"name":"Resolved Name","type":"string","jsonPath":".status.resolvedName"}"#,
    printcolumn = r#"{"name":"Default Branch","type":"string","jsonPath":".status.defaultBranch"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RepositorySpec {
    /// GitHub repository coordinates (the only forge kind currently supported)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github: Option<GitHubRepositorySpec>,

    /// How often to refresh branches and revisions (duration string, at least 5s, default 5m)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_interval: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct GitHubRepositorySpec {
    /// Repository owner (user or organization)
    pub owner: String,

    /// Repository name
    pub name: String,

    /// Secret key holding a personal access token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub personal_access_token: Option<SecretKeyReference>,

    /// Secret key holding the shared secret used to sign webhook deliveries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_secret: Option<SecretKeyReference>,
}

impl GitHubRepositorySpec {
    /// `owner/name` as shown by the forge
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    /// HTTPS clone URL on github.com
    pub fn git_url(&self) -> String {
        format!("https://github.com/{}/{}.git", self.owner, self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryStatus {
    /// `owner/name` of the resolved repository
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_name: Option<String>,

    /// Default branch reported by the forge
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_branch: Option<String>,

    /// Clone URL reported by the forge
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clone_url: Option<String>,

    /// Branch name to head commit SHA
    #[serde(default)]
    pub revisions: BTreeMap<String, String>,

    /// Last time the webhook was pinged
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_webhook_ping: Option<DateTime<Utc>>,

    /// Current conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl Conditions for RepositoryStatus {
    fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.conditions
    }
}

impl Repository {
    /// Clone URL for jobs: the one the forge reported, else the github.com URL
    /// derived from the coordinates. `None` when no forge is configured.
    pub fn clone_url(&self) -> Option<String> {
        let github = self.spec.github.as_ref()?;
        self.status
            .as_ref()
            .and_then(|s| s.clone_url.clone())
            .or_else(|| Some(github.git_url()))
    }
}

impl RepositoryStatus {
    /// Head revision of `branch`, if the branch is known
    pub fn revision(&self, branch: &str) -> Option<&str> {
        self.revisions.get(branch).map(String::as_str)
    }
}
