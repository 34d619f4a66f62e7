//! Controller configuration, read once from environment variables.

use crate::error::ControllerError;
use std::fmt;
use std::net::SocketAddr;
use tracing::info;

/// Prefix of environment variables passed through to every job
pub const OBSERVABILITY_ENV_PREFIX: &str = "OTEL_";

const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
const DEFAULT_WORKSPACE_SIZE: &str = "1Gi";
const DEFAULT_LOG_LEVEL: &str = "info";

/// Runtime configuration of the controller process.
#[derive(Clone)]
pub struct Config {
    pub watch_namespace: Option<String>,
    /// Public URL the forge delivers push events to
    pub webhook_url: Option<String>,
    /// HMAC key for incoming webhook deliveries
    pub webhook_secret: Option<String>,
    pub webhook_addr: SocketAddr,
    pub health_addr: SocketAddr,
    pub metrics_addr: SocketAddr,
    pub github_api_url: String,
    pub images: JobImages,
    pub workspace_storage_class: Option<String>,
    pub workspace_size: String,
    pub log_level: String,
    /// `OTEL_*` variables copied into every job
    pub observability_env: Vec<(String, String)>,
}

/// Container images of the three pipeline phases
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobImages {
    pub clone: String,
    pub bake: String,
    pub apply: String,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("watch_namespace", &self.watch_namespace)
            .field("webhook_url", &self.webhook_url)
            .field("webhook_secret", &self.webhook_secret.as_ref().map(|_| "<redacted>"))
            .field("webhook_addr", &self.webhook_addr)
            .field("health_addr", &self.health_addr)
            .field("metrics_addr", &self.metrics_addr)
            .field("github_api_url", &self.github_api_url)
            .field("images", &self.images)
            .field("workspace_storage_class", &self.workspace_storage_class)
            .field("workspace_size", &self.workspace_size)
            .field("log_level", &self.log_level)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok(), std::env::vars())
    }

    /// Load configuration through `lookup`, with `all_vars` used for the
    /// observability passthrough.
    pub fn from_lookup<F, I>(lookup: F, all_vars: I) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
        I: IntoIterator<Item = (String, String)>,
    {
        let optional = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &str| {
            optional(key).ok_or_else(|| {
                ControllerError::InvalidConfig(format!("{key} environment variable is required"))
            })
        };
        let addr = |key: &str, default: &str| -> Result<SocketAddr, ControllerError> {
            let raw = optional(key).unwrap_or_else(|| default.to_string());
            raw.parse().map_err(|e| {
                ControllerError::InvalidConfig(format!("{key}: invalid address '{raw}': {e}"))
            })
        };

        let mut observability_env: Vec<(String, String)> = all_vars
            .into_iter()
            .filter(|(k, _)| k.starts_with(OBSERVABILITY_ENV_PREFIX))
            .collect();
        observability_env.sort();

        Ok(Self {
            watch_namespace: optional("WATCH_NAMESPACE"),
            webhook_url: optional("WEBHOOK_URL"),
            webhook_secret: optional("WEBHOOK_SECRET"),
            webhook_addr: addr("WEBHOOK_ADDR", "0.0.0.0:8080")?,
            health_addr: addr("HEALTH_ADDR", "0.0.0.0:9000")?,
            metrics_addr: addr("METRICS_ADDR", "0.0.0.0:8000")?,
            github_api_url: optional("GITHUB_API_URL")
                .unwrap_or_else(|| DEFAULT_GITHUB_API_URL.to_string()),
            images: JobImages {
                clone: required("CLONE_IMAGE")?,
                bake: required("BAKE_IMAGE")?,
                apply: required("APPLY_IMAGE")?,
            },
            workspace_storage_class: optional("WORKSPACE_STORAGE_CLASS"),
            workspace_size: optional("WORKSPACE_SIZE")
                .unwrap_or_else(|| DEFAULT_WORKSPACE_SIZE.to_string()),
            log_level: optional("LOG_LEVEL").unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            observability_env,
        })
    }

    /// Logs the effective configuration (secrets excluded)
    pub fn log_summary(&self) {
        info!("Configuration:");
        info!(
            "  Namespace: {}",
            self.watch_namespace.as_deref().unwrap_or("all namespaces")
        );
        info!("  GitHub API: {}", self.github_api_url);
        info!(
            "  Webhook URL: {}",
            self.webhook_url.as_deref().unwrap_or("(disabled)")
        );
        info!(
            "  Webhook secret: {}",
            if self.webhook_secret.is_some() { "set" } else { "unset" }
        );
        info!(
            "  Listen: webhook={} health={} metrics={}",
            self.webhook_addr, self.health_addr, self.metrics_addr
        );
        info!(
            "  Images: clone={} bake={} apply={}",
            self.images.clone, self.images.bake, self.images.apply
        );
        info!(
            "  Workspace: size={} storageClass={}",
            self.workspace_size,
            self.workspace_storage_class.as_deref().unwrap_or("(default)")
        );
        info!("  Passthrough env: {} variable(s)", self.observability_env.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ControllerError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let all = map.clone();
        Config::from_lookup(move |k| map.get(k).cloned(), all)
    }

    const IMAGES: [(&str, &str); 3] = [
        ("CLONE_IMAGE", "ghcr.io/devbot/clone:1"),
        ("BAKE_IMAGE", "ghcr.io/devbot/bake:1"),
        ("APPLY_IMAGE", "ghcr.io/devbot/apply:1"),
    ];

    #[test]
    fn test_defaults() {
        let config = load(&IMAGES).unwrap();
        assert_eq!(config.watch_namespace, None);
        assert_eq!(config.webhook_url, None);
        assert_eq!(config.webhook_addr.port(), 8080);
        assert_eq!(config.health_addr.port(), 9000);
        assert_eq!(config.metrics_addr.port(), 8000);
        assert_eq!(config.github_api_url, "https://api.github.com");
        assert_eq!(config.workspace_size, "1Gi");
        assert_eq!(config.log_level, "info");
        assert!(config.observability_env.is_empty());
    }

    #[test]
    fn test_missing_image_is_rejected() {
        let err = load(&IMAGES[..2]).unwrap_err();
        assert!(err.to_string().contains("APPLY_IMAGE"));
    }

    #[test]
    fn test_blank_values_are_unset() {
        let mut vars = IMAGES.to_vec();
        vars.push(("WEBHOOK_URL", "  "));
        vars.push(("WATCH_NAMESPACE", "devbot"));
        let config = load(&vars).unwrap();
        assert_eq!(config.webhook_url, None);
        assert_eq!(config.watch_namespace.as_deref(), Some("devbot"));
    }

    #[test]
    fn test_observability_passthrough_is_sorted() {
        let mut vars = IMAGES.to_vec();
        vars.push(("OTEL_SERVICE_NAME", "devbot"));
        vars.push(("OTEL_EXPORTER_OTLP_ENDPOINT", "http://collector:4317"));
        vars.push(("HOME", "/root"));
        let config = load(&vars).unwrap();
        assert_eq!(
            config.observability_env,
            vec![
                (
                    "OTEL_EXPORTER_OTLP_ENDPOINT".to_string(),
                    "http://collector:4317".to_string()
                ),
                ("OTEL_SERVICE_NAME".to_string(), "devbot".to_string()),
            ]
        );
    }

    #[test]
    fn test_invalid_address() {
        let mut vars = IMAGES.to_vec();
        vars.push(("HEALTH_ADDR", "localhost"));
        assert!(matches!(load(&vars), Err(ControllerError::InvalidConfig(_))));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let mut vars = IMAGES.to_vec();
        vars.push(("WEBHOOK_SECRET", "hunter2"));
        let config = load(&vars).unwrap();
        assert!(!format!("{config:?}").contains("hunter2"));
    }
}
