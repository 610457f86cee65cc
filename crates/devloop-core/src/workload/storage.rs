//! Claim attachment, annotation and env updates, and volume queries
//!
//! Every mutation here is a read-modify-write under conflict retry. None of
//! them change the source-type annotation, so there is no propagation wait.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{EnvVar, PersistentVolumeClaimVolumeSource, Volume, VolumeMount};
use openshift_types::DeploymentConfig;
use tracing::info;

use super::env::merge_env;
use super::{WorkloadPatcher, primary_container, primary_container_mut};
use crate::error::DevError;
use crate::retry::retry_on_conflict;

/// Claim bound to `volume`, if it is a claim-backed volume
pub fn claim_for_volume<'a>(dc: &'a DeploymentConfig, volume: &str) -> Option<&'a str> {
    dc.pod_spec()?
        .volumes
        .as_ref()?
        .iter()
        .find(|v| v.name == volume)?
        .persistent_volume_claim
        .as_ref()
        .map(|pvc| pvc.claim_name.as_str())
}

/// Whether `volume` exists and is backed by `emptyDir`
pub fn is_empty_dir_volume(dc: &DeploymentConfig, volume: &str) -> bool {
    dc.pod_spec()
        .and_then(|s| s.volumes.as_ref())
        .and_then(|v| v.iter().find(|v| v.name == volume))
        .is_some_and(|v| v.empty_dir.is_some())
}

/// Mounts of the named container
pub fn volume_mounts<'a>(dc: &'a DeploymentConfig, container: &str) -> Result<&'a [VolumeMount], DevError> {
    Ok(primary_container(dc, container)?
        .volume_mounts
        .as_deref()
        .unwrap_or_default())
}

/// Names of every volume bound to `claim`
pub fn volume_names_for_claim(dc: &DeploymentConfig, claim: &str) -> Vec<String> {
    dc.pod_spec()
        .and_then(|s| s.volumes.as_ref())
        .map(|volumes| {
            volumes
                .iter()
                .filter(|v| v.persistent_volume_claim.as_ref().is_some_and(|p| p.claim_name == claim))
                .map(|v| v.name.clone())
                .collect()
        })
        .unwrap_or_default()
}

/// Volume name for a newly attached claim: `<claim>-<5 random chars>-volume`
pub fn generate_volume_name(claim: &str) -> String {
    let suffix: String = uuid::Uuid::new_v4().simple().to_string().chars().take(5).collect();
    format!("{}-{}-volume", claim, suffix)
}

fn attach_claim(dc: &mut DeploymentConfig, name: &str, claim: &str, volume: &str, mount_path: &str) -> Result<(), DevError> {
    if !volume_names_for_claim(dc, claim).is_empty() {
        return Err(DevError::Invalid(format!(
            "PersistentVolumeClaim {} is already mounted on DeploymentConfig {}",
            claim, name
        )));
    }
    primary_container_mut(dc, name)?
        .volume_mounts
        .get_or_insert_with(Vec::new)
        .push(VolumeMount {
            name: volume.to_string(),
            mount_path: mount_path.to_string(),
            ..Default::default()
        });
    dc.pod_spec_mut().volumes.get_or_insert_with(Vec::new).push(Volume {
        name: volume.to_string(),
        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
            claim_name: claim.to_string(),
            read_only: None,
        }),
        ..Default::default()
    });
    Ok(())
}

fn detach_claim(dc: &mut DeploymentConfig, name: &str, claim: &str) -> Result<String, DevError> {
    let bound = volume_names_for_claim(dc, claim);
    let volume = match bound.as_slice() {
        [] => {
            return Err(DevError::NotFound {
                kind: "volume for PersistentVolumeClaim",
                name: format!("{} on DeploymentConfig {}", claim, name),
            });
        }
        [volume] => volume.clone(),
        _ => {
            return Err(DevError::corruption(
                "DeploymentConfig",
                name,
                format!("{} volumes bound to claim {}: {}", bound.len(), claim, bound.join(", ")),
            ));
        }
    };

    let primary = primary_container_mut(dc, name)?;
    let mounts = primary.volume_mounts.get_or_insert_with(Vec::new);
    let before = mounts.len();
    mounts.retain(|m| m.name != volume);
    if mounts.len() == before {
        return Err(DevError::corruption(
            "DeploymentConfig",
            name,
            format!("volume mount {} not found on container {}", volume, name),
        ));
    }
    if mounts.is_empty() {
        primary.volume_mounts = None;
    }

    if let Some(volumes) = dc.pod_spec_mut().volumes.as_mut() {
        volumes.retain(|v| v.name != volume);
    }
    Ok(volume)
}

impl WorkloadPatcher {
    async fn read_modify_write<T, F>(&self, name: &str, operation: &str, mutate: F) -> Result<T, DevError>
    where
        F: Fn(&mut DeploymentConfig) -> Result<T, DevError> + Sync,
    {
        let client = &self.client;
        let mutate = &mutate;
        retry_on_conflict(self.settings.backoff.clone(), "DeploymentConfig", name, move || async move {
            let mut dc = client.get_deployment_config(name).await?;
            let out = mutate(&mut dc)?;
            client.update_deployment_config(&dc).await?;
            Ok(out)
        })
        .await
        .map_err(|e| e.context(format!("{} on DeploymentConfig {}", operation, name)))
    }

    /// Mount `claim` at `mount_path` on the primary container.
    ///
    /// Returns the generated volume name.
    pub async fn add_claim_to_workload(&self, name: &str, claim: &str, mount_path: &str) -> Result<String, DevError> {
        let volume = generate_volume_name(claim);
        self.read_modify_write(name, "attach claim", |dc| attach_claim(dc, name, claim, &volume, mount_path))
            .await?;
        info!("Mounted PersistentVolumeClaim {} on {} at {}", claim, name, mount_path);
        Ok(volume)
    }

    /// Detach the single volume bound to `claim` and its mount.
    ///
    /// No binding is `NotFound`; more than one is a corruption.
    pub async fn remove_claim_from_workload(&self, claim: &str, name: &str) -> Result<String, DevError> {
        let volume = self
            .read_modify_write(name, "detach claim", |dc| detach_claim(dc, name, claim))
            .await?;
        info!("Removed volume {} (claim {}) from {}", volume, claim, name);
        Ok(volume)
    }

    /// Merge `annotations` into the workload's annotations
    pub async fn update_annotations(&self, name: &str, annotations: &BTreeMap<String, String>) -> Result<(), DevError> {
        self.read_modify_write(name, "update annotations", |dc| {
            dc.metadata
                .annotations
                .get_or_insert_with(BTreeMap::new)
                .extend(annotations.clone());
            Ok(())
        })
        .await
    }

    /// Add or overwrite env vars on the primary container
    pub async fn add_env_vars(&self, name: &str, envs: &[EnvVar]) -> Result<(), DevError> {
        self.read_modify_write(name, "update env", |dc| {
            let primary = primary_container_mut(dc, name)?;
            let merged = merge_env(primary.env.as_deref().unwrap_or_default(), envs);
            primary.env = Some(merged);
            Ok(())
        })
        .await
    }
}
