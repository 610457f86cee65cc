//! Build mode / dev mode switches

use std::collections::BTreeMap;

use openshift_types::DeploymentConfig;
use tracing::{info, warn};

use super::storage::{claim_for_volume, is_empty_dir_volume};
use super::template::{build_mode_descriptor, dev_mode_descriptor};
use super::{
    BOOTSTRAP_INIT_CONTAINERS, ComponentMeta, SCRATCH_VOLUME, WorkloadPatcher, app_data_claim_name, app_data_volume_name,
    dev_mode_volumes, primary_container, primary_container_mut,
};
use crate::error::DevError;
use crate::image::{BuilderImage, ImageReference};

fn corruption(name: &str, detail: String) -> DevError {
    DevError::corruption("DeploymentConfig", name, detail)
}

/// Pre-patch hook for reverting to build mode.
///
/// The live workload must carry the `emptyDir` scratch volume, the
/// claim-backed app-data volume and both their mounts on the primary
/// container; anything missing is a corruption. Strips all of them, plus the
/// bootstrap init containers, from the desired descriptor.
pub fn strip_dev_mode(current: &DeploymentConfig, desired: &mut DeploymentConfig) -> Result<(), DevError> {
    let name = current.name().to_string();
    let app_data = app_data_volume_name(&name);
    let claim = app_data_claim_name(&name);

    if !is_empty_dir_volume(current, SCRATCH_VOLUME) {
        return Err(corruption(&name, format!("emptyDir volume {} not found", SCRATCH_VOLUME)));
    }
    if claim_for_volume(current, &app_data) != Some(claim.as_str()) {
        return Err(corruption(&name, format!("volume {} bound to claim {} not found", app_data, claim)));
    }
    let reserved = dev_mode_volumes(&name);
    let mounts = primary_container(current, &name)?
        .volume_mounts
        .as_deref()
        .unwrap_or_default();
    if let Some(missing) = reserved.iter().find(|v| !mounts.iter().any(|m| &m.name == *v)) {
        return Err(corruption(
            &name,
            format!("volume mount {} not found on container {}", missing, name),
        ));
    }

    let spec = desired.pod_spec_mut();
    if let Some(volumes) = spec.volumes.as_mut() {
        volumes.retain(|v| !reserved.contains(&v.name));
    }
    if spec.volumes.as_ref().is_some_and(Vec::is_empty) {
        spec.volumes = None;
    }
    if let Some(init) = spec.init_containers.as_mut() {
        init.retain(|c| !BOOTSTRAP_INIT_CONTAINERS.contains(&c.name.as_str()));
    }
    if spec.init_containers.as_ref().is_some_and(Vec::is_empty) {
        spec.init_containers = None;
    }

    let primary = primary_container_mut(desired, &name)?;
    if let Some(mounts) = primary.volume_mounts.as_mut() {
        mounts.retain(|m| !reserved.contains(&m.name));
    }
    if primary.volume_mounts.as_ref().is_some_and(Vec::is_empty) {
        primary.volume_mounts = None;
    }
    Ok(())
}

impl WorkloadPatcher {
    /// Switch a component to dev mode on `builder`.
    ///
    /// The descriptor is recomputed from every fetch, so a conflict retry
    /// merges the env that is live at that attempt. The claim backing the
    /// app-data volume is created only after the patch has propagated; a
    /// failure there is reported as partial completion.
    pub async fn switch_to_dev_mode(&self, meta: &ComponentMeta, builder: &BuilderImage) -> Result<DeploymentConfig, DevError> {
        let name = meta.name.as_str();
        info!("Switching {} to dev mode on {}", name, builder.reference);

        let supervisor_image = self.settings.supervisor_image.as_str();
        let desired = |current: &DeploymentConfig| -> Result<DeploymentConfig, DevError> {
            let live_primary = primary_container(current, name)?;
            dev_mode_descriptor(meta, current, live_primary, builder, supervisor_image)
                .map_err(|e| e.context(format!("compute dev mode for {}", name)))
        };
        let dc = self.patch_workload_with(name, &desired, None).await?;

        let claim = app_data_claim_name(name);
        let labels = BTreeMap::from([("app.kubernetes.io/instance".to_string(), name.to_string())]);
        match self.client.create_pvc(&claim, &self.settings.claim_size, labels).await {
            Ok(_) => info!("Created PersistentVolumeClaim {} ({})", claim, self.settings.claim_size),
            Err(err) if err.is_conflict() => info!("PersistentVolumeClaim {} already exists", claim),
            Err(err) => {
                warn!("Dev mode patch for {} applied but claim {} failed: {}", name, claim, err);
                return Err(DevError::PartialCompletion {
                    completed: format!("switch DeploymentConfig {} to dev mode", name),
                    stage: format!("create PersistentVolumeClaim {}", claim),
                    source: Box::new(err.into()),
                });
            }
        }
        Ok(dc)
    }

    /// Switch a component back to build mode running `image`.
    ///
    /// Ports and env come from the live container at each attempt. After the
    /// patch the app-data claim is deleted and its deletion awaited; a
    /// failure there is reported as partial completion.
    pub async fn switch_to_build_mode(&self, meta: &ComponentMeta, image: &ImageReference) -> Result<DeploymentConfig, DevError> {
        let name = meta.name.as_str();
        info!("Switching {} to build mode on {}", name, image);

        let desired = |current: &DeploymentConfig| -> Result<DeploymentConfig, DevError> {
            let live_primary = primary_container(current, name)?;
            Ok(build_mode_descriptor(meta, current, live_primary, image))
        };
        let dc = self
            .patch_workload_with(name, &desired, Some(&strip_dev_mode))
            .await?;

        let claim = app_data_claim_name(name);
        let deleted = match self.client.delete_pvc(&claim).await {
            Ok(()) => self.watcher.wait_for_claim_deletion(&claim).await,
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err.into()),
        };
        if let Err(err) = deleted {
            warn!("Build mode patch for {} applied but claim {} was not removed: {}", name, claim, err);
            return Err(DevError::PartialCompletion {
                completed: format!("switch DeploymentConfig {} to build mode", name),
                stage: format!("delete PersistentVolumeClaim {}", claim),
                source: Box::new(err),
            });
        }
        info!("Deleted PersistentVolumeClaim {}", claim);
        Ok(dc)
    }
}
