//! Workload Patch Engine
//!
//! Reshapes a live DeploymentConfig in place: copy-forward of user volumes,
//! env merge, dev-mode bootstrap containers, with conflict retry and a
//! propagation wait after every patch.
//!
//! - `patch.rs` - the fetch/merge/write/confirm cycle
//! - `template.rs` - desired descriptors for build and dev mode
//! - `transition.rs` - mode switches built on the patch cycle
//! - `storage.rs` - claim attach/detach, annotation and env updates, queries
//! - `ports.rs`, `env.rs` - input parsing and env merge

pub mod env;
mod patch;
pub mod ports;
pub mod storage;
pub mod template;
mod transition;

use std::collections::BTreeMap;
use std::sync::Arc;

use cluster_client::ClusterClient;
use k8s_openapi::api::core::v1::Container;
use openshift_types::DeploymentConfig;

use crate::condition::ConditionWatcher;
use crate::error::DevError;
use crate::settings::Settings;

pub use patch::{PrePatchHook, prepare_update};
pub use transition::strip_dev_mode;

/// Annotation whose value confirms a patch has propagated
pub const SOURCE_TYPE_ANNOTATION: &str = "app.kubernetes.io/component-source-type";

/// Init container that stages the supervisor into the scratch volume
pub const COPY_SUPERVISORD: &str = "copy-supervisord";
/// Init container that seeds the app-data volume from the image
pub const COPY_FILES_TO_VOLUME: &str = "copy-files-to-volume";
/// Init containers owned by dev mode
pub const BOOTSTRAP_INIT_CONTAINERS: [&str; 2] = [COPY_SUPERVISORD, COPY_FILES_TO_VOLUME];

/// Ephemeral (`emptyDir`) volume holding the supervisor while in dev mode
pub const SCRATCH_VOLUME: &str = "devloop-supervisord-shared-data";
/// Mount path of the scratch volume in every container that uses it
pub const SUPERVISOR_DIR: &str = "/var/run/devloop";
/// Where the builder image keeps the application; the app-data volume is mounted here
pub const APP_ROOT: &str = "/opt/app-root";

/// App-data volume name for a component; also the name of its backing claim
pub fn app_data_volume_name(component: &str) -> String {
    format!("{}-s2idata", component)
}

/// Claim backing the app-data volume
pub fn app_data_claim_name(component: &str) -> String {
    app_data_volume_name(component)
}

/// Volumes (and primary-container mounts) that exist only in dev mode
pub fn dev_mode_volumes(component: &str) -> [String; 2] {
    [SCRATCH_VOLUME.to_string(), app_data_volume_name(component)]
}

/// Identity and metadata for a desired descriptor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComponentMeta {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

impl ComponentMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Labels and annotations of a live workload
    pub fn from_workload(dc: &DeploymentConfig) -> Self {
        Self {
            name: dc.name().to_string(),
            labels: dc.metadata.labels.clone().unwrap_or_default(),
            annotations: dc.metadata.annotations.clone().unwrap_or_default(),
        }
    }

    /// Set the value the patch waits to observe
    #[must_use]
    pub fn with_source_type(mut self, source_type: impl Into<String>) -> Self {
        self.annotations
            .insert(SOURCE_TYPE_ANNOTATION.to_string(), source_type.into());
        self
    }
}

/// The single container named after the workload.
///
/// Zero or several matches is a corruption of the descriptor.
pub fn primary_container<'a>(dc: &'a DeploymentConfig, name: &str) -> Result<&'a Container, DevError> {
    let containers = dc.pod_spec().map(|s| s.containers.as_slice()).unwrap_or_default();
    let mut matches = containers.iter().filter(|c| c.name == name);
    match (matches.next(), matches.next()) {
        (Some(primary), None) => Ok(primary),
        (None, _) => Err(DevError::corruption(
            "DeploymentConfig",
            dc.name(),
            format!("no container named {}", name),
        )),
        (Some(_), Some(_)) => Err(DevError::corruption(
            "DeploymentConfig",
            dc.name(),
            format!("more than one container named {}", name),
        )),
    }
}

/// Mutable access to the primary container
pub fn primary_container_mut<'a>(dc: &'a mut DeploymentConfig, name: &str) -> Result<&'a mut Container, DevError> {
    primary_container(dc, name)?;
    let dc_name = dc.name().to_string();
    dc.pod_spec_mut()
        .containers
        .iter_mut()
        .find(|c| c.name == name)
        .ok_or_else(|| DevError::corruption("DeploymentConfig", &dc_name, format!("no container named {}", name)))
}

/// Mutates workloads through a shared client handle
#[derive(Clone)]
pub struct WorkloadPatcher {
    client: Arc<dyn ClusterClient>,
    watcher: ConditionWatcher,
    settings: Settings,
}

impl std::fmt::Debug for WorkloadPatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkloadPatcher")
            .field("namespace", &self.client.namespace())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl WorkloadPatcher {
    pub fn new(client: Arc<dyn ClusterClient>, settings: Settings) -> Self {
        let watcher = ConditionWatcher::new(Arc::clone(&client), settings.clone());
        Self {
            client,
            watcher,
            settings,
        }
    }

    pub fn watcher(&self) -> &ConditionWatcher {
        &self.watcher
    }
}

#[cfg(test)]
#[path = "workload_test.rs"]
mod tests;
