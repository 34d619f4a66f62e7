//! Persistent workspace shared by a Deployment's jobs.
//!
//! The claim name is recorded in status before the claim is created, so a
//! crash between the two steps is repaired by the next pass instead of
//! leaving an orphaned claim under another name.

use crate::config::Config;
use crate::error::ControllerError;
use crate::naming::{label_value, workspace_claim_name};
use crate::reconcile_helpers::{Lookup, StatusHandle, controller_reference, is_conflict, lookup};
use crate::reconciler::{Reconciler, delete_child};
use crds::{Conditions, DEPLOYMENT_LABEL, Deployment, DeploymentStatus, StaleReason};
use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, PostParams};
use kube::ResourceExt;
use std::collections::BTreeMap;
use tracing::{error, info};

/// The claim backing a Deployment's workspace
pub fn desired_claim(
    deployment: &Deployment,
    name: &str,
    config: &Config,
) -> Result<PersistentVolumeClaim, ControllerError> {
    let size = BTreeMap::from([("storage".to_string(), Quantity(config.workspace_size.clone()))]);
    Ok(PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: deployment.namespace(),
            labels: Some(BTreeMap::from([(
                DEPLOYMENT_LABEL.to_string(),
                label_value(&deployment.name_any()),
            )])),
            owner_references: Some(vec![controller_reference(deployment)?]),
            ..ObjectMeta::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            storage_class_name: config.workspace_storage_class.clone(),
            resources: Some(VolumeResourceRequirements {
                requests: Some(size.clone()),
                limits: Some(size),
                ..VolumeResourceRequirements::default()
            }),
            ..PersistentVolumeClaimSpec::default()
        }),
        ..PersistentVolumeClaim::default()
    })
}

impl Reconciler {
    /// Makes sure the workspace claim exists; returns its name, or `None`
    /// after recording why it is unavailable.
    pub(crate) async fn ensure_workspace(
        &self,
        deployment: &Deployment,
        status: &mut StatusHandle<Deployment, DeploymentStatus>,
    ) -> Result<Option<String>, ControllerError> {
        let generation = deployment.metadata.generation;
        let name = match &status.status.persistent_volume_claim_name {
            Some(name) => name.clone(),
            None => {
                let name = workspace_claim_name(&deployment.name_any());
                status.status.persistent_volume_claim_name = Some(name.clone());
                status.flush().await?;
                name
            }
        };

        let namespace = deployment.namespace().unwrap_or_default();
        let api: Api<PersistentVolumeClaim> = self.api(&namespace);
        match lookup(&api, &name).await {
            Lookup::Found(_) => {}
            Lookup::NotFound => {
                let claim = desired_claim(deployment, &name, &self.config)?;
                match api.create(&PostParams::default(), &claim).await {
                    Ok(_) => info!("Created workspace claim {}/{}", namespace, name),
                    Err(e) if is_conflict(&e) => {}
                    Err(e) => {
                        error!("Failed to create workspace claim {}/{}: {}", namespace, name, e);
                        status.status.set_due_to(
                            StaleReason::PersistentVolumeMissing,
                            generation,
                            format!("failed to create workspace claim '{name}': {e}"),
                        );
                        return Ok(None);
                    }
                }
            }
            Lookup::Forbidden(message) | Lookup::Failed(message) => {
                error!("Failed to get workspace claim {}/{}: {}", namespace, name, message);
                status.status.set_due_to(
                    StaleReason::InternalError,
                    generation,
                    format!("failed to get workspace claim '{name}': {message}"),
                );
                return Ok(None);
            }
        }
        status
            .status
            .clear_if_due_to_any_of(&[StaleReason::PersistentVolumeMissing]);
        Ok(Some(name))
    }

    /// Deletes the workspace claim of a Deployment being removed
    pub(crate) async fn delete_workspace(&self, deployment: &Deployment) -> Result<(), ControllerError> {
        let name = deployment
            .status
            .as_ref()
            .and_then(|s| s.persistent_volume_claim_name.clone())
            .unwrap_or_else(|| workspace_claim_name(&deployment.name_any()));
        let namespace = deployment.namespace().unwrap_or_default();
        info!("Deleting workspace claim {}/{}", namespace, name);
        delete_child::<PersistentVolumeClaim>(&self.api(&namespace), &name).await
    }
}
