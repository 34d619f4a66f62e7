//! Condition algebra shared by every Devbot resource.
//!
//! A condition is present on a resource only while it holds; clearing a
//! condition removes it from the list. Each condition type owns a closed set
//! of reasons, modelled as one enum per type. Some reasons also assert a
//! mirrored `Stale` condition (for example `Invalid(InvalidRefreshInterval)`
//! implies `Stale(Invalid)`), and every mutation goes through
//! [`Conditions::set_due_to`] / [`Conditions::clear_if_due_to_any_of`] so the
//! pair can never drift apart.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Condition types used across all Devbot resources.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum ConditionType {
    /// The resource spec is invalid and will not be acted on until it changes.
    Invalid,
    /// The observed status does not (yet) reflect the desired state.
    Stale,
    /// Credentials for the source forge are missing or rejected.
    Unauthenticated,
    /// The resource is fully reconciled and its workload is up to date.
    Current,
}

impl ConditionType {
    /// Wire name of the condition type.
    pub fn as_str(self) -> &'static str {
        match self {
            ConditionType::Invalid => "Invalid",
            ConditionType::Stale => "Stale",
            ConditionType::Unauthenticated => "Unauthenticated",
            ConditionType::Current => "Current",
        }
    }
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kubernetes-style tri-state condition status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum ConditionStatus {
    #[default]
    True,
    False,
    Unknown,
}

/// A single typed status signal.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type
    #[serde(rename = "type")]
    pub type_: ConditionType,

    /// True, False or Unknown
    pub status: ConditionStatus,

    /// Machine-readable reason, one of the reasons declared for the type
    pub reason: String,

    /// Human-readable explanation
    #[serde(default)]
    pub message: String,

    /// Resource generation this condition was computed from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Last time the status of this condition changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

/// A reason that can assert a condition.
///
/// Implemented by one enum per condition type; `MIRROR` names the `Stale`
/// reason that is asserted alongside it, if any.
pub trait ConditionReason: Copy + PartialEq + fmt::Debug {
    /// Condition type asserted by this reason
    const TYPE: ConditionType;
    /// `Stale` reason mirrored alongside this reason
    const MIRROR: Option<StaleReason>;

    /// Wire name of the reason.
    fn as_str(&self) -> &'static str;
}

/// Reasons for the `Invalid` condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    InvalidRefreshInterval,
    UnknownRepositoryType,
    WebhookSecretNotFound,
    WebhookSecretForbidden,
    WebhookSecretGetFailed,
    WebhookSecretKeyNotFound,
    WebhookSecretEmpty,
    InvalidRepositoryReference,
    InvalidEnvironment,
    InvalidDeployment,
}

impl ConditionReason for InvalidReason {
    const TYPE: ConditionType = ConditionType::Invalid;
    const MIRROR: Option<StaleReason> = Some(StaleReason::Invalid);

    fn as_str(&self) -> &'static str {
        match self {
            InvalidReason::InvalidRefreshInterval => "InvalidRefreshInterval",
            InvalidReason::UnknownRepositoryType => "UnknownRepositoryType",
            InvalidReason::WebhookSecretNotFound => "WebhookSecretNotFound",
            InvalidReason::WebhookSecretForbidden => "WebhookSecretForbidden",
            InvalidReason::WebhookSecretGetFailed => "WebhookSecretGetFailed",
            InvalidReason::WebhookSecretKeyNotFound => "WebhookSecretKeyNotFound",
            InvalidReason::WebhookSecretEmpty => "WebhookSecretEmpty",
            InvalidReason::InvalidRepositoryReference => "InvalidRepositoryReference",
            InvalidReason::InvalidEnvironment => "InvalidEnvironment",
            InvalidReason::InvalidDeployment => "InvalidDeployment",
        }
    }
}

/// Reasons for the `Unauthenticated` condition (Repository only).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnauthenticatedReason {
    AuthConfigMissing,
    AuthSecretNotFound,
    AuthSecretForbidden,
    AuthSecretGetFailed,
    AuthSecretKeyNotFound,
    AuthTokenEmpty,
    AuthenticationFailed,
}

impl ConditionReason for UnauthenticatedReason {
    const TYPE: ConditionType = ConditionType::Unauthenticated;
    const MIRROR: Option<StaleReason> = Some(StaleReason::Unauthenticated);

    fn as_str(&self) -> &'static str {
        match self {
            UnauthenticatedReason::AuthConfigMissing => "AuthConfigMissing",
            UnauthenticatedReason::AuthSecretNotFound => "AuthSecretNotFound",
            UnauthenticatedReason::AuthSecretForbidden => "AuthSecretForbidden",
            UnauthenticatedReason::AuthSecretGetFailed => "AuthSecretGetFailed",
            UnauthenticatedReason::AuthSecretKeyNotFound => "AuthSecretKeyNotFound",
            UnauthenticatedReason::AuthTokenEmpty => "AuthTokenEmpty",
            UnauthenticatedReason::AuthenticationFailed => "AuthenticationFailed",
        }
    }
}

/// Reasons for the `Stale` condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    /// Mirror of `Invalid`
    Invalid,
    /// Mirror of `Unauthenticated`
    Unauthenticated,
    InternalError,
    RepositoryNotFound,
    RepositoryNotAccessible,
    ApplicationNotFound,
    ApplicationNotAccessible,
    EnvironmentNotFound,
    BranchNotFound,
    DeploymentsPending,
    EnvironmentsPending,
    PersistentVolumeMissing,
    Cloning,
    Baking,
    Applying,
    CloneFailed,
    BakingFailed,
    ApplyFailed,
}

impl ConditionReason for StaleReason {
    const TYPE: ConditionType = ConditionType::Stale;
    const MIRROR: Option<StaleReason> = None;

    fn as_str(&self) -> &'static str {
        match self {
            StaleReason::Invalid => "Invalid",
            StaleReason::Unauthenticated => "Unauthenticated",
            StaleReason::InternalError => "InternalError",
            StaleReason::RepositoryNotFound => "RepositoryNotFound",
            StaleReason::RepositoryNotAccessible => "RepositoryNotAccessible",
            StaleReason::ApplicationNotFound => "ApplicationNotFound",
            StaleReason::ApplicationNotAccessible => "ApplicationNotAccessible",
            StaleReason::EnvironmentNotFound => "EnvironmentNotFound",
            StaleReason::BranchNotFound => "BranchNotFound",
            StaleReason::DeploymentsPending => "DeploymentsPending",
            StaleReason::EnvironmentsPending => "EnvironmentsPending",
            StaleReason::PersistentVolumeMissing => "PersistentVolumeMissing",
            StaleReason::Cloning => "Cloning",
            StaleReason::Baking => "Baking",
            StaleReason::Applying => "Applying",
            StaleReason::CloneFailed => "CloneFailed",
            StaleReason::BakingFailed => "BakingFailed",
            StaleReason::ApplyFailed => "ApplyFailed",
        }
    }
}

/// Reasons for the `Current` condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurrentReason {
    /// The last applied revision matches the target revision
    Applied,
    /// All children are current
    ChildrenCurrent,
}

impl ConditionReason for CurrentReason {
    const TYPE: ConditionType = ConditionType::Current;
    const MIRROR: Option<StaleReason> = None;

    fn as_str(&self) -> &'static str {
        match self {
            CurrentReason::Applied => "Applied",
            CurrentReason::ChildrenCurrent => "ChildrenCurrent",
        }
    }
}

/// Condition list operations, implemented for every status that carries one.
pub trait Conditions {
    /// Read access to the condition list.
    fn conditions(&self) -> &[Condition];

    /// Write access to the condition list.
    fn conditions_mut(&mut self) -> &mut Vec<Condition>;

    /// Looks up the condition of the given type, if present.
    fn condition(&self, type_: ConditionType) -> Option<&Condition> {
        self.conditions().iter().find(|c| c.type_ == type_)
    }

    /// Whether the condition of the given type is present with status `True`.
    fn is_true(&self, type_: ConditionType) -> bool {
        self.condition(type_)
            .is_some_and(|c| c.status == ConditionStatus::True)
    }

    /// Whether the condition of `R::TYPE` is present with exactly `reason`.
    fn has_reason<R: ConditionReason>(&self, reason: R) -> bool {
        self.condition(R::TYPE)
            .is_some_and(|c| c.reason == reason.as_str())
    }

    /// Asserts `R::TYPE` as `True` due to `reason`, plus its mirror if any.
    ///
    /// Returns `true` when anything changed.
    fn set_due_to<R: ConditionReason>(
        &mut self,
        reason: R,
        generation: Option<i64>,
        message: impl Into<String>,
    ) -> bool {
        self.set_with_status(reason, ConditionStatus::True, generation, message)
    }

    /// Like [`Conditions::set_due_to`] but with an explicit status, used for
    /// `Unknown` observations (for example a job in an indeterminate state).
    fn set_with_status<R: ConditionReason>(
        &mut self,
        reason: R,
        status: ConditionStatus,
        generation: Option<i64>,
        message: impl Into<String>,
    ) -> bool {
        let message = message.into();
        let mut changed = upsert(
            self.conditions_mut(),
            R::TYPE,
            status,
            reason.as_str(),
            &message,
            generation,
        );
        if let Some(mirror) = R::MIRROR {
            changed |= upsert(
                self.conditions_mut(),
                ConditionType::Stale,
                status,
                mirror.as_str(),
                &message,
                generation,
            );
        }
        changed
    }

    /// Clears `R::TYPE` iff its current reason is one of `reasons`, and
    /// clears the mirrored `Stale` condition along with it.
    ///
    /// Returns `true` when anything changed.
    fn clear_if_due_to_any_of<R: ConditionReason>(&mut self, reasons: &[R]) -> bool {
        let names: Vec<&str> = reasons.iter().map(|r| r.as_str()).collect();
        let conditions = self.conditions_mut();
        let before = conditions.len();
        conditions.retain(|c| !(c.type_ == R::TYPE && names.contains(&c.reason.as_str())));
        let cleared = conditions.len() != before;
        if cleared {
            if let Some(mirror) = R::MIRROR {
                conditions.retain(|c| {
                    !(c.type_ == ConditionType::Stale && c.reason == mirror.as_str())
                });
            }
        }
        cleared
    }

    /// Removes the condition of the given type regardless of its reason.
    fn clear(&mut self, type_: ConditionType) -> bool {
        let conditions = self.conditions_mut();
        let before = conditions.len();
        conditions.retain(|c| c.type_ != type_);
        conditions.len() != before
    }

    /// Removes conditions computed for a generation older than `generation`.
    fn clear_stale(&mut self, generation: Option<i64>) -> bool {
        let Some(generation) = generation else {
            return false;
        };
        let conditions = self.conditions_mut();
        let before = conditions.len();
        conditions.retain(|c| c.observed_generation.is_none_or(|g| g >= generation));
        conditions.len() != before
    }
}

fn upsert(
    conditions: &mut Vec<Condition>,
    type_: ConditionType,
    status: ConditionStatus,
    reason: &str,
    message: &str,
    generation: Option<i64>,
) -> bool {
    match conditions.iter_mut().find(|c| c.type_ == type_) {
        Some(existing) => {
            if existing.status == status
                && existing.reason == reason
                && existing.message == message
                && existing.observed_generation == generation
            {
                return false;
            }
            if existing.status != status {
                existing.last_transition_time = Some(Utc::now());
            }
            existing.status = status;
            existing.reason = reason.to_string();
            existing.message = message.to_string();
            existing.observed_generation = generation;
            true
        }
        None => {
            conditions.push(Condition {
                type_,
                status,
                reason: reason.to_string(),
                message: message.to_string(),
                observed_generation: generation,
                last_transition_time: Some(Utc::now()),
            });
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Subject(Vec<Condition>);

    impl Conditions for Subject {
        fn conditions(&self) -> &[Condition] {
            &self.0
        }
        fn conditions_mut(&mut self) -> &mut Vec<Condition> {
            &mut self.0
        }
    }

    #[test]
    fn test_invalid_reason_mirrors_stale() {
        let mut s = Subject::default();
        assert!(s.set_due_to(InvalidReason::InvalidRefreshInterval, Some(1), "bad"));

        assert!(s.has_reason(InvalidReason::InvalidRefreshInterval));
        assert!(s.has_reason(StaleReason::Invalid));
        assert_eq!(s.conditions().len(), 2);
    }

    #[test]
    fn test_set_is_idempotent() {
        let mut s = Subject::default();
        s.set_due_to(StaleReason::Cloning, Some(3), "cloning");
        let first = s.condition(ConditionType::Stale).cloned();

        assert!(!s.set_due_to(StaleReason::Cloning, Some(3), "cloning"));
        assert_eq!(s.condition(ConditionType::Stale).cloned(), first);
    }

    #[test]
    fn test_reason_change_keeps_transition_time() {
        let mut s = Subject::default();
        s.set_due_to(StaleReason::Cloning, Some(1), "cloning");
        let t0 = s.condition(ConditionType::Stale).and_then(|c| c.last_transition_time);

        assert!(s.set_due_to(StaleReason::Baking, Some(1), "baking"));
        let c = s.condition(ConditionType::Stale).cloned();
        assert_eq!(c.as_ref().map(|c| c.reason.as_str()), Some("Baking"));
        assert_eq!(c.and_then(|c| c.last_transition_time), t0);
    }

    #[test]
    fn test_clear_only_matching_reason() {
        let mut s = Subject::default();
        s.set_due_to(UnauthenticatedReason::AuthTokenEmpty, Some(1), "empty");

        assert!(!s.clear_if_due_to_any_of(&[UnauthenticatedReason::AuthSecretNotFound]));
        assert!(s.is_true(ConditionType::Unauthenticated));
        assert!(s.has_reason(StaleReason::Unauthenticated));

        assert!(s.clear_if_due_to_any_of(&[
            UnauthenticatedReason::AuthSecretNotFound,
            UnauthenticatedReason::AuthTokenEmpty,
        ]));
        assert!(s.conditions().is_empty());
    }

    #[test]
    fn test_clear_keeps_unrelated_stale() {
        let mut s = Subject::default();
        s.set_due_to(StaleReason::InternalError, Some(1), "boom");
        s.set_due_to(InvalidReason::InvalidRefreshInterval, Some(1), "bad");
        // Only one condition per type: the mirror replaces InternalError.
        assert!(s.has_reason(StaleReason::Invalid));

        s.clear_if_due_to_any_of(&[InvalidReason::InvalidRefreshInterval]);
        assert!(s.condition(ConditionType::Invalid).is_none());
        assert!(s.condition(ConditionType::Stale).is_none());

        s.set_due_to(StaleReason::InternalError, Some(1), "boom");
        s.clear_if_due_to_any_of(&[InvalidReason::InvalidRefreshInterval]);
        assert!(s.has_reason(StaleReason::InternalError));
    }

    #[test]
    fn test_unknown_status() {
        let mut s = Subject::default();
        s.set_with_status(StaleReason::Applying, ConditionStatus::Unknown, Some(2), "waiting");
        assert!(!s.is_true(ConditionType::Stale));
        assert_eq!(
            s.condition(ConditionType::Stale).map(|c| c.status),
            Some(ConditionStatus::Unknown)
        );
    }

    #[test]
    fn test_clear_stale_generation() {
        let mut s = Subject::default();
        s.set_due_to(StaleReason::Cloning, Some(1), "old");
        s.set_due_to(CurrentReason::Applied, Some(2), "new");

        assert!(s.clear_stale(Some(2)));
        assert!(s.condition(ConditionType::Stale).is_none());
        assert!(s.is_true(ConditionType::Current));
        assert!(!s.clear_stale(None));
    }

    #[test]
    fn test_condition_serialization() {
        let mut s = Subject::default();
        s.set_due_to(CurrentReason::Applied, Some(4), "up to date");
        let json = serde_json::to_value(&s.0).unwrap_or_default();
        assert_eq!(json[0]["type"], "Current");
        assert_eq!(json[0]["status"], "True");
        assert_eq!(json[0]["reason"], "Applied");
        assert_eq!(json[0]["observedGeneration"], 4);
    }
}
