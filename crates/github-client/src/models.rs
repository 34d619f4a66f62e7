//! GitHub API models
//!
//! Only the fields Devbot reads are modelled; everything else in the API
//! responses is ignored on deserialization.

use serde::{Deserialize, Serialize};

/// Content type Devbot configures on its hooks
pub const HOOK_CONTENT_TYPE_JSON: &str = "json";

/// The only event Devbot subscribes to
pub const PUSH_EVENT: &str = "push";

/// Authenticated user, returned by `GET /user`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: u64,
    pub login: String,
}

/// Repository metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Repository {
    pub id: u64,
    pub name: String,
    pub full_name: String,
    pub default_branch: String,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub clone_url: Option<String>,
}

/// A branch and its head commit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Branch {
    pub name: String,
    pub commit: CommitRef,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommitRef {
    pub sha: String,
}

/// Repository webhook
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Hook {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default)]
    pub config: HookConfig,
}

impl Hook {
    /// Target URL of the hook, if configured
    pub fn url(&self) -> Option<&str> {
        self.config.url.as_deref()
    }

    /// Whether the hook delivers JSON payloads
    pub fn is_json(&self) -> bool {
        self.config.content_type.as_deref() == Some(HOOK_CONTENT_TYPE_JSON)
    }

    /// Whether the hook subscribes to exactly the push event
    pub fn is_push_only(&self) -> bool {
        self.events.len() == 1 && self.events[0] == PUSH_EVENT
    }
}

/// Hook delivery configuration
///
/// GitHub never returns the secret; it is write-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct HookConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insecure_ssl: Option<String>,
}

impl HookConfig {
    /// JSON delivery to `url`, signed with `secret`
    pub fn json(url: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            content_type: Some(HOOK_CONTENT_TYPE_JSON.to_string()),
            secret: Some(secret.into()),
            insecure_ssl: Some("0".to_string()),
        }
    }
}

/// Request body for `POST /repos/{owner}/{repo}/hooks`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreateHookRequest {
    pub name: String,
    pub active: bool,
    pub events: Vec<String>,
    pub config: HookConfig,
}

impl CreateHookRequest {
    /// Active `web` hook delivering push events as JSON
    pub fn push(url: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            name: "web".to_string(),
            active: true,
            events: vec![PUSH_EVENT.to_string()],
            config: HookConfig::json(url, secret),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hook_deserialization_ignores_unknown_fields() {
        let hook: Hook = serde_json::from_value(serde_json::json!({
            "type": "Repository",
            "id": 12345678,
            "name": "web",
            "active": true,
            "events": ["push"],
            "config": {
                "content_type": "json",
                "insecure_ssl": "0",
                "url": "https://example.com/webhook"
            },
            "updated_at": "2019-06-03T00:57:16Z",
            "created_at": "2019-06-03T00:57:16Z"
        }))
        .unwrap();

        assert_eq!(hook.id, 12345678);
        assert_eq!(hook.url(), Some("https://example.com/webhook"));
        assert!(hook.is_json());
        assert!(hook.is_push_only());
        assert_eq!(hook.config.secret, None);
    }

    #[test]
    fn test_push_only_rejects_extra_events() {
        let mut hook: Hook = serde_json::from_value(serde_json::json!({
            "id": 1,
            "events": ["push", "pull_request"],
            "config": {"content_type": "form"}
        }))
        .unwrap();
        assert!(!hook.is_push_only());
        assert!(!hook.is_json());

        hook.events.clear();
        assert!(!hook.is_push_only());
    }

    #[test]
    fn test_create_hook_request_body() {
        let body = serde_json::to_value(CreateHookRequest::push("https://x/hook", "s")).unwrap();
        assert_eq!(body["name"], "web");
        assert_eq!(body["events"], serde_json::json!(["push"]));
        assert_eq!(body["config"]["content_type"], "json");
        assert_eq!(body["config"]["secret"], "s");
    }
}
