//! Reading single values out of referenced Secrets.

use super::Reconciler;
use crate::reconcile_helpers::{Lookup, lookup};
use crds::{InvalidReason, ObjectKey, SecretKeyReference, UnauthenticatedReason};
use k8s_openapi::api::core::v1::Secret;
use kube::Api;
use thiserror::Error;

/// Why a referenced secret value could not be read
#[derive(Debug, Error, PartialEq)]
pub enum SecretError {
    #[error("secret '{0}' not found")]
    NotFound(ObjectKey),

    #[error("access to secret '{secret}' is forbidden: {message}")]
    Forbidden { secret: ObjectKey, message: String },

    #[error("failed to get secret '{secret}': {message}")]
    GetFailed { secret: ObjectKey, message: String },

    #[error("key '{key}' not found in secret '{secret}'")]
    KeyNotFound { secret: ObjectKey, key: String },

    #[error("key '{key}' in secret '{secret}' is empty")]
    Empty { secret: ObjectKey, key: String },
}

impl SecretError {
    /// Reason reported when the forge token cannot be read
    pub fn auth_reason(&self) -> UnauthenticatedReason {
        match self {
            SecretError::NotFound(_) => UnauthenticatedReason::AuthSecretNotFound,
            SecretError::Forbidden { .. } => UnauthenticatedReason::AuthSecretForbidden,
            SecretError::GetFailed { .. } => UnauthenticatedReason::AuthSecretGetFailed,
            SecretError::KeyNotFound { .. } => UnauthenticatedReason::AuthSecretKeyNotFound,
            SecretError::Empty { .. } => UnauthenticatedReason::AuthTokenEmpty,
        }
    }

    /// Reason reported when the webhook secret cannot be read
    pub fn webhook_reason(&self) -> InvalidReason {
        match self {
            SecretError::NotFound(_) => InvalidReason::WebhookSecretNotFound,
            SecretError::Forbidden { .. } => InvalidReason::WebhookSecretForbidden,
            SecretError::GetFailed { .. } => InvalidReason::WebhookSecretGetFailed,
            SecretError::KeyNotFound { .. } => InvalidReason::WebhookSecretKeyNotFound,
            SecretError::Empty { .. } => InvalidReason::WebhookSecretEmpty,
        }
    }
}

/// Every reason [`SecretError::auth_reason`] can produce
pub const AUTH_SECRET_REASONS: [UnauthenticatedReason; 6] = [
    UnauthenticatedReason::AuthConfigMissing,
    UnauthenticatedReason::AuthSecretNotFound,
    UnauthenticatedReason::AuthSecretForbidden,
    UnauthenticatedReason::AuthSecretGetFailed,
    UnauthenticatedReason::AuthSecretKeyNotFound,
    UnauthenticatedReason::AuthTokenEmpty,
];

/// Every reason [`SecretError::webhook_reason`] can produce
pub const WEBHOOK_SECRET_REASONS: [InvalidReason; 5] = [
    InvalidReason::WebhookSecretNotFound,
    InvalidReason::WebhookSecretForbidden,
    InvalidReason::WebhookSecretGetFailed,
    InvalidReason::WebhookSecretKeyNotFound,
    InvalidReason::WebhookSecretEmpty,
];

/// Reads `key` from `secret`, trimming surrounding whitespace.
pub fn extract_secret_value(secret: &Secret, id: &ObjectKey, key: &str) -> Result<String, SecretError> {
    let raw = secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .map(|bytes| String::from_utf8_lossy(&bytes.0).into_owned())
        .or_else(|| secret.string_data.as_ref().and_then(|data| data.get(key)).cloned())
        .ok_or_else(|| SecretError::KeyNotFound {
            secret: id.clone(),
            key: key.to_string(),
        })?;

    let value = raw.trim();
    if value.is_empty() {
        return Err(SecretError::Empty {
            secret: id.clone(),
            key: key.to_string(),
        });
    }
    Ok(value.to_string())
}

impl Reconciler {
    /// Loads the value referenced by `reference`, resolving its namespace
    /// against `default_namespace`.
    pub(crate) async fn load_secret_value(
        &self,
        reference: &SecretKeyReference,
        default_namespace: &str,
    ) -> Result<String, SecretError> {
        let id = reference.secret.to_key(default_namespace);
        let api: Api<Secret> = self.api(&id.namespace);
        match lookup(&api, &id.name).await {
            Lookup::Found(secret) => extract_secret_value(&secret, &id, &reference.key),
            Lookup::NotFound => Err(SecretError::NotFound(id)),
            Lookup::Forbidden(message) => Err(SecretError::Forbidden { secret: id, message }),
            Lookup::Failed(message) => Err(SecretError::GetFailed { secret: id, message }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;
    use std::collections::BTreeMap;

    fn secret(entries: &[(&str, &[u8])]) -> Secret {
        Secret {
            data: Some(
                entries
                    .iter()
                    .map(|(k, v)| (k.to_string(), ByteString(v.to_vec())))
                    .collect::<BTreeMap<_, _>>(),
            ),
            ..Default::default()
        }
    }

    fn id() -> ObjectKey {
        ObjectKey::new("team-a", "github-token")
    }

    #[test]
    fn test_extract_trims_value() {
        let s = secret(&[("token", b"ghp_abc\n")]);
        assert_eq!(extract_secret_value(&s, &id(), "token").unwrap(), "ghp_abc");
    }

    #[test]
    fn test_extract_missing_key() {
        let s = secret(&[("other", b"x")]);
        let err = extract_secret_value(&s, &id(), "token").unwrap_err();
        assert_eq!(err.auth_reason(), UnauthenticatedReason::AuthSecretKeyNotFound);
        assert_eq!(err.to_string(), "key 'token' not found in secret 'team-a/github-token'");

        let err = extract_secret_value(&Secret::default(), &id(), "token").unwrap_err();
        assert!(matches!(err, SecretError::KeyNotFound { .. }));
    }

    #[test]
    fn test_extract_empty_value() {
        let s = secret(&[("token", b"  ")]);
        let err = extract_secret_value(&s, &id(), "token").unwrap_err();
        assert_eq!(err.auth_reason(), UnauthenticatedReason::AuthTokenEmpty);
        assert_eq!(err.webhook_reason(), InvalidReason::WebhookSecretEmpty);
    }

    #[test]
    fn test_string_data_fallback() {
        let s = Secret {
            string_data: Some(BTreeMap::from([("key".to_string(), "s3cr3t".to_string())])),
            ..Default::default()
        };
        assert_eq!(extract_secret_value(&s, &id(), "key").unwrap(), "s3cr3t");
    }

    #[test]
    fn test_each_failure_maps_to_distinct_reason() {
        let errors = [
            SecretError::NotFound(id()),
            SecretError::Forbidden { secret: id(), message: String::new() },
            SecretError::GetFailed { secret: id(), message: String::new() },
            SecretError::KeyNotFound { secret: id(), key: "k".into() },
            SecretError::Empty { secret: id(), key: "k".into() },
        ];
        let auth: Vec<_> = errors.iter().map(SecretError::auth_reason).collect();
        let webhook: Vec<_> = errors.iter().map(SecretError::webhook_reason).collect();
        assert_eq!(auth, AUTH_SECRET_REASONS[1..].to_vec());
        assert_eq!(webhook, WEBHOOK_SECRET_REASONS.to_vec());
    }
}
