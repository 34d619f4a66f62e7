//! Helper functions for common reconciliation patterns
//!
//! Error classification for Kubernetes API calls, ownership checks, and the
//! status writer every reconciler flushes its status through.

use crate::error::ControllerError;
use crds::ObjectKey;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::api::{Patch, PatchParams};
use kube::{Api, Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::fmt::Debug;
use tracing::debug;

/// HTTP status code carried by a Kubernetes API error
pub fn kube_error_code(err: &kube::Error) -> Option<u16> {
    match err {
        kube::Error::Api(resp) => Some(resp.code),
        _ => None,
    }
}

pub fn is_not_found(err: &kube::Error) -> bool {
    kube_error_code(err) == Some(404)
}

pub fn is_conflict(err: &kube::Error) -> bool {
    kube_error_code(err) == Some(409)
}

/// Outcome of reading a referenced object
#[derive(Debug)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
    Forbidden(String),
    Failed(String),
}

impl<T> Lookup<T> {
    /// Classifies the result of a `get`
    pub fn from_result(result: Result<T, kube::Error>) -> Self {
        match result {
            Ok(obj) => Lookup::Found(obj),
            Err(e) => Self::from_failure(kube_error_code(&e), e.to_string()),
        }
    }

    /// Classifies a failed read by its HTTP status code
    pub fn from_failure(code: Option<u16>, message: String) -> Self {
        match code {
            Some(404) => Lookup::NotFound,
            Some(403) => Lookup::Forbidden(message),
            _ => Lookup::Failed(message),
        }
    }
}

/// Reads `name` through `api`, classifying the failure modes reconcilers care about
pub async fn lookup<K>(api: &Api<K>, name: &str) -> Lookup<K>
where
    K: Clone + DeserializeOwned + Debug,
{
    Lookup::from_result(api.get(name).await)
}

/// `(namespace, name)` of an object; namespaced objects always carry both
pub fn object_key<K>(obj: &K) -> Result<ObjectKey, ControllerError>
where
    K: Resource,
    K::DynamicType: Default,
{
    let meta = obj.meta();
    match (&meta.namespace, &meta.name) {
        (Some(ns), Some(name)) => Ok(ObjectKey::new(ns, name)),
        _ => Err(ControllerError::MissingMetadata(format!(
            "{} without namespace/name",
            K::kind(&K::DynamicType::default())
        ))),
    }
}

/// The controlling owner reference of `meta`, if it is of `kind`
pub fn controller_of<'a>(meta: &'a ObjectMeta, kind: &str) -> Option<&'a OwnerReference> {
    meta.owner_references
        .as_deref()
        .unwrap_or_default()
        .iter()
        .find(|r| r.controller == Some(true) && r.kind == kind)
}

/// Whether `meta` is controlled by the object with `uid`
pub fn is_controlled_by(meta: &ObjectMeta, uid: &str) -> bool {
    meta.owner_references
        .as_deref()
        .unwrap_or_default()
        .iter()
        .any(|r| r.controller == Some(true) && r.uid == uid)
}

/// Owner reference marking `owner` as controller of a child
pub fn controller_reference<K>(owner: &K) -> Result<OwnerReference, ControllerError>
where
    K: Resource<DynamicType = ()>,
{
    owner.controller_owner_ref(&()).ok_or_else(|| {
        ControllerError::MissingMetadata(format!("{} {} has no uid", K::kind(&()), owner.name_any()))
    })
}

/// Computes a JSON merge patch (RFC 7386) turning `old` into `new`.
///
/// Returns `None` when the documents are equal. Keys absent from `new` are
/// patched to `null`, so removed map entries and cleared fields are deleted
/// on the server.
pub fn merge_patch(old: &Value, new: &Value) -> Option<Value> {
    if old == new {
        return None;
    }
    match (old, new) {
        (Value::Object(old), Value::Object(new)) => {
            let mut patch = Map::new();
            for (key, new_value) in new {
                match old.get(key) {
                    Some(old_value) => {
                        if let Some(diff) = merge_patch(old_value, new_value) {
                            patch.insert(key.clone(), diff);
                        }
                    }
                    None => {
                        patch.insert(key.clone(), new_value.clone());
                    }
                }
            }
            for key in old.keys() {
                if !new.contains_key(key) {
                    patch.insert(key.clone(), Value::Null);
                }
            }
            Some(Value::Object(patch))
        }
        _ => Some(new.clone()),
    }
}

/// Status writer for one reconciliation pass.
///
/// Holds the working copy of a status and the last version written. `flush`
/// sends only the difference, guarded by the object's `resourceVersion`, and
/// is a no-op when nothing changed. A concurrent writer makes the flush fail
/// with 409 and the pass is retried.
pub struct StatusHandle<K, S> {
    api: Api<K>,
    name: String,
    resource_version: Option<String>,
    written: Value,
    pub status: S,
}

impl<K, S> StatusHandle<K, S>
where
    K: Resource + Clone + DeserializeOwned + Debug,
    S: Serialize + Clone + Default,
{
    pub fn new(api: Api<K>, obj: &K, status: Option<&S>) -> Result<Self, ControllerError> {
        let written = match status {
            Some(s) => serde_json::to_value(s)?,
            None => Value::Null,
        };
        Ok(Self {
            api,
            name: obj.name_any(),
            resource_version: obj.resource_version(),
            written,
            status: status.cloned().unwrap_or_default(),
        })
    }

    /// Writes pending changes; returns whether a write happened
    pub async fn flush(&mut self) -> Result<bool, ControllerError> {
        let desired = serde_json::to_value(&self.status)?;
        let Some(diff) = merge_patch(&self.written, &desired) else {
            return Ok(false);
        };

        let mut patch = serde_json::json!({ "status": diff });
        if let Some(rv) = &self.resource_version {
            patch["metadata"] = serde_json::json!({ "resourceVersion": rv });
        }
        debug!("Patching status of {}", self.name);
        let updated = self
            .api
            .patch_status(&self.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;

        self.resource_version = updated.resource_version();
        self.written = desired;
        Ok(true)
    }
}
