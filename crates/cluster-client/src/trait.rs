//! ClusterClient trait for mocking
//!
//! The concrete [`KubeClusterClient`](crate::KubeClusterClient) implements
//! this trait; tests use [`MockClusterClient`](crate::MockClusterClient).

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod, Secret};
use openshift_types::{Build, DeploymentConfig};

use crate::error::ClusterError;
use crate::models::*;

/// Cluster operations used by devloop, scoped to one namespace
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait ClusterClient: Send + Sync {
    /// Namespace every call is scoped to
    fn namespace(&self) -> &str;

    // Deployment configs
    async fn get_deployment_config(&self, name: &str) -> Result<DeploymentConfig, ClusterError>;
    /// Replace a deployment config. The object's resourceVersion is sent
    /// along, so a stale write fails with [`ClusterError::Conflict`].
    async fn update_deployment_config(&self, dc: &DeploymentConfig) -> Result<DeploymentConfig, ClusterError>;
    async fn watch_deployment_configs(&self, selector: &Selector) -> Result<WatchStream<DeploymentConfig>, ClusterError>;

    // Pods
    async fn list_pods(&self, selector: &Selector) -> Result<Vec<Pod>, ClusterError>;
    async fn watch_pods(&self, selector: &Selector) -> Result<WatchStream<Pod>, ClusterError>;

    // Secrets
    async fn get_secret(&self, name: &str) -> Result<Secret, ClusterError>;
    async fn watch_secrets(&self, selector: &Selector) -> Result<WatchStream<Secret>, ClusterError>;

    // Builds
    /// Start a new build from the named build config
    async fn instantiate_build(&self, build_config: &str) -> Result<Build, ClusterError>;
    async fn watch_builds(&self, selector: &Selector) -> Result<WatchStream<Build>, ClusterError>;

    // Persistent volume claims
    async fn create_pvc(&self, name: &str, size: &str, labels: BTreeMap<String, String>) -> Result<PersistentVolumeClaim, ClusterError>;
    async fn get_pvc(&self, name: &str) -> Result<PersistentVolumeClaim, ClusterError>;
    async fn delete_pvc(&self, name: &str) -> Result<(), ClusterError>;
    async fn watch_pvcs(&self, selector: &Selector) -> Result<WatchStream<PersistentVolumeClaim>, ClusterError>;

    // Images
    /// Resolve builder image metadata from `<stream>:<tag>` in `namespace`
    async fn get_image_metadata(&self, namespace: &str, image_stream_tag: &str) -> Result<ImageMetadata, ClusterError>;

    // Exec
    /// Run `command` in a pod, streaming `stdin` into it until EOF.
    ///
    /// Returns once the remote process exits; a non-success exit status is
    /// [`ClusterError::Exec`].
    async fn exec(
        &self,
        pod: &str,
        container: Option<&str>,
        command: &[String],
        stdin: Option<BoxedAsyncRead>,
        tty: bool,
    ) -> Result<ExecOutput, ClusterError>;
}
