//! Fetch, merge, write and confirm one workload patch

use openshift_types::DeploymentConfig;
use tracing::{debug, info};

use super::{SOURCE_TYPE_ANNOTATION, WorkloadPatcher, dev_mode_volumes, primary_container, primary_container_mut};
use crate::condition::Condition;
use crate::error::DevError;
use crate::retry::retry_on_conflict;

/// Last transformation applied to the desired descriptor before writing.
///
/// Receives the freshly fetched current descriptor alongside the desired one.
pub type PrePatchHook<'a> = &'a (dyn Fn(&DeploymentConfig, &mut DeploymentConfig) -> Result<(), DevError> + Send + Sync);

/// Copy volumes and primary-container mounts from `current` into `desired`.
///
/// The dev-mode scratch and app-data volumes and their mounts are
/// mode-specific and never carried. Names already present on `desired` are
/// not duplicated.
fn copy_forward(name: &str, current: &DeploymentConfig, desired: &mut DeploymentConfig) -> Result<(), DevError> {
    let reserved = dev_mode_volumes(name);

    let current_volumes = current
        .pod_spec()
        .and_then(|s| s.volumes.clone())
        .unwrap_or_default();
    let current_mounts = primary_container(current, name)?
        .volume_mounts
        .clone()
        .unwrap_or_default();

    let volumes = desired.pod_spec_mut().volumes.get_or_insert_with(Vec::new);
    for volume in current_volumes {
        if !reserved.contains(&volume.name) && !volumes.iter().any(|v| v.name == volume.name) {
            volumes.push(volume);
        }
    }
    if volumes.is_empty() {
        desired.pod_spec_mut().volumes = None;
    }

    let primary = primary_container_mut(desired, name)
        .map_err(|_| DevError::Invalid(format!("desired descriptor has no container named {}", name)))?;
    let mounts = primary.volume_mounts.get_or_insert_with(Vec::new);
    for mount in current_mounts {
        if !reserved.contains(&mount.name) && !mounts.iter().any(|m| m.name == mount.name) {
            mounts.push(mount);
        }
    }
    if mounts.is_empty() {
        primary.volume_mounts = None;
    }
    Ok(())
}

/// Compute the object to write from a freshly fetched `current`.
///
/// Locates the primary container, copies live volumes and mounts forward,
/// runs `hook`, then puts the desired spec, labels and annotations onto the
/// current object so identity and resourceVersion are kept.
pub fn prepare_update(
    name: &str,
    current: &DeploymentConfig,
    desired: &DeploymentConfig,
    hook: Option<PrePatchHook<'_>>,
) -> Result<DeploymentConfig, DevError> {
    primary_container(current, name)?;

    let mut desired = desired.clone();
    copy_forward(name, current, &mut desired)?;
    if let Some(hook) = hook {
        hook(current, &mut desired)?;
    }

    let mut next = current.clone();
    next.spec = desired.spec;
    next.metadata.labels = desired.metadata.labels;
    next.metadata.annotations = desired.metadata.annotations;
    Ok(next)
}

/// Desired descriptor computed from a freshly fetched current one
pub(crate) type DesiredFn<'a> = &'a (dyn Fn(&DeploymentConfig) -> Result<DeploymentConfig, DevError> + Send + Sync);

fn expected_source_type(desired: &DeploymentConfig) -> Result<String, DevError> {
    desired
        .annotation(SOURCE_TYPE_ANNOTATION)
        .map(str::to_string)
        .ok_or_else(|| DevError::Invalid(format!("desired descriptor lacks the {} annotation", SOURCE_TYPE_ANNOTATION)))
}

impl WorkloadPatcher {
    /// Patch the named workload to `desired` and wait until it is observed.
    ///
    /// `desired` must carry the source-type annotation; its value is what
    /// the propagation wait looks for. A missing workload is an error, never
    /// a create.
    pub async fn patch_workload(
        &self,
        name: &str,
        desired: &DeploymentConfig,
        hook: Option<PrePatchHook<'_>>,
    ) -> Result<DeploymentConfig, DevError> {
        expected_source_type(desired)?;
        self.patch_workload_with(name, &|_| Ok(desired.clone()), hook).await
    }

    /// Like [`Self::patch_workload`], but `desired` is recomputed from each
    /// fetch, so a conflict retry never writes values read on an earlier attempt.
    pub(crate) async fn patch_workload_with(
        &self,
        name: &str,
        desired: DesiredFn<'_>,
        hook: Option<PrePatchHook<'_>>,
    ) -> Result<DeploymentConfig, DevError> {
        let client = &self.client;
        let (updated, expected) = retry_on_conflict(self.settings.backoff.clone(), "DeploymentConfig", name, move || async move {
            let current = client.get_deployment_config(name).await?;
            let wanted = desired(&current)?;
            let expected = expected_source_type(&wanted)?;
            let next = prepare_update(name, &current, &wanted, hook)?;
            debug!("Submitting DeploymentConfig {} at resourceVersion {:?}", name, next.metadata.resource_version);
            Ok((client.update_deployment_config(&next).await?, expected))
        })
        .await
        .map_err(|e| e.context(format!("patch DeploymentConfig {}", name)))?;

        info!("Patched DeploymentConfig {}, waiting for {}={}", name, SOURCE_TYPE_ANNOTATION, expected);
        let condition = Condition::annotation_equals(SOURCE_TYPE_ANNOTATION, expected, self.settings.update_timeout);
        self.watcher
            .wait_for_workload(name, &condition)
            .await
            .map_err(|e| e.context(format!("confirm update of DeploymentConfig {}", name)))?;

        Ok(updated)
    }
}
