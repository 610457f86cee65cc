//! Component operations: rebuild, push and mode switches
//!
//! Each composes the watcher, the patch engine and the transport. Nothing
//! here talks to the cluster except through the shared client handle.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use cluster_client::ClusterClient;
use kube::ResourceExt;
use openshift_types::{Build, DeploymentConfig};
use tracing::info;

use crate::condition::ConditionWatcher;
use crate::error::{DevError, ResultExt};
use crate::image::{BuilderImage, DEFAULT_S2I_SRC_OR_BIN_PATH, ImageReference};
use crate::settings::Settings;
use crate::sync::{SyncTransport, TransferManifest};
use crate::workload::template::ENV_S2I_SRC_BIN_PATH;
use crate::workload::{ComponentMeta, SUPERVISOR_DIR, WorkloadPatcher, primary_container};

/// Source type recorded while a component runs from pushed local sources
pub const SOURCE_TYPE_LOCAL: &str = "local";
/// Source type recorded while a component runs a built image
pub const SOURCE_TYPE_GIT: &str = "git";

/// Label every component pod carries
pub const COMPONENT_POD_LABEL: &str = "deploymentconfig";

/// Helper the supervisor image ships to rerun assemble and restart the app
pub fn assemble_and_restart_command() -> Vec<String> {
    vec![format!("{}/bin/assemble-and-restart", SUPERVISOR_DIR)]
}

/// Where pushed sources land in the container of `name`
pub fn source_target(dc: &DeploymentConfig, name: &str) -> Result<String, DevError> {
    let base = primary_container(dc, name)?
        .env
        .as_ref()
        .and_then(|env| env.iter().find(|e| e.name == ENV_S2I_SRC_BIN_PATH))
        .and_then(|e| e.value.clone())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_S2I_SRC_OR_BIN_PATH.to_string());
    Ok(format!("{}/src", base.trim_end_matches('/')))
}

/// Entry point for everything a developer does to one component
#[derive(Clone)]
pub struct Components {
    client: Arc<dyn ClusterClient>,
    patcher: WorkloadPatcher,
    transport: SyncTransport,
}

impl std::fmt::Debug for Components {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Components")
            .field("namespace", &self.client.namespace())
            .field("patcher", &self.patcher)
            .finish_non_exhaustive()
    }
}

impl Components {
    pub fn new(client: Arc<dyn ClusterClient>, settings: Settings) -> Self {
        Self {
            patcher: WorkloadPatcher::new(Arc::clone(&client), settings),
            transport: SyncTransport::new(Arc::clone(&client)),
            client,
        }
    }

    pub fn patcher(&self) -> &WorkloadPatcher {
        &self.patcher
    }

    pub fn watcher(&self) -> &ConditionWatcher {
        self.patcher.watcher()
    }

    pub fn transport(&self) -> &SyncTransport {
        &self.transport
    }

    async fn workload(&self, name: &str) -> Result<DeploymentConfig, DevError> {
        self.client
            .get_deployment_config(name)
            .await
            .context(|| format!("get DeploymentConfig {}", name))
    }

    /// Resolve a builder image reference and its S2I metadata.
    ///
    /// An unqualified reference is looked up in the client namespace.
    pub async fn builder_image(&self, image: &str) -> Result<BuilderImage, DevError> {
        let reference = ImageReference::parse(image)?;
        let namespace = reference
            .namespace
            .clone()
            .unwrap_or_else(|| self.client.namespace().to_string());
        let metadata = self
            .client
            .get_image_metadata(&namespace, &reference.stream_tag())
            .await
            .context(|| format!("resolve builder image {}", image))?;
        Ok(BuilderImage { reference, metadata })
    }

    /// Start a new build of `name` and wait for it to complete
    pub async fn rebuild(&self, name: &str) -> Result<Build, DevError> {
        let build = self
            .client
            .instantiate_build(name)
            .await
            .context(|| format!("instantiate BuildConfig {}", name))?;
        let build_name = build.name_any();
        info!("Started build {} for {}", build_name, name);
        self.watcher()
            .wait_for_build(&build_name)
            .await
            .map_err(|e| e.context(format!("rebuild {}", name)))
    }

    /// Switch `name` to dev mode on `builder_image`
    pub async fn to_dev_mode(&self, name: &str, builder_image: &str) -> Result<DeploymentConfig, DevError> {
        let builder = self.builder_image(builder_image).await?;
        let current = self.workload(name).await?;
        let meta = ComponentMeta::from_workload(&current).with_source_type(SOURCE_TYPE_LOCAL);
        self.patcher.switch_to_dev_mode(&meta, &builder).await
    }

    /// Switch `name` back to build mode running `image`
    pub async fn to_build_mode(&self, name: &str, image: &str) -> Result<DeploymentConfig, DevError> {
        let image = ImageReference::parse(image)?;
        let current = self.workload(name).await?;
        let meta = ComponentMeta::from_workload(&current).with_source_type(SOURCE_TYPE_GIT);
        self.patcher.switch_to_build_mode(&meta, &image).await
    }

    /// Push local changes into the running pod of `name` and restart the app.
    ///
    /// An empty `changed` pushes the whole of `local_root`.
    pub async fn push(&self, name: &str, local_root: &Path, changed: &[PathBuf]) -> Result<TransferManifest, DevError> {
        let selector = format!("{}={}", COMPONENT_POD_LABEL, name);
        let pod = self
            .watcher()
            .wait_for_running_pod(&selector)
            .await
            .map_err(|e| e.context(format!("push {}", name)))?;
        let pod_name = pod.name_any();

        let target = source_target(&self.workload(name).await?, name)?;
        let mkdir = vec!["mkdir".to_string(), "-p".to_string(), target.clone()];
        self.client
            .exec(&pod_name, None, &mkdir, None, false)
            .await
            .context(|| format!("create {} in pod {}", target, pod_name))?;

        let manifest = self.transport.push_files(local_root, &pod_name, &target, changed).await?;

        info!("Running assemble-and-restart in {}", pod_name);
        self.client
            .exec(&pod_name, None, &assemble_and_restart_command(), None, false)
            .await
            .context(|| format!("assemble and restart in pod {}", pod_name))?;
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::test_utils::{NAMESPACE, build_mode_dc, mock_client, nodejs_image, pod, test_settings};
    use crate::workload::SOURCE_TYPE_ANNOTATION;
    use openshift_types::BuildPhase;
    use std::fs;

    #[tokio::test]
    async fn test_push_into_dev_mode_pod() {
        let (mock, client) = mock_client();
        mock.add_deployment_config(build_mode_dc("web"));
        mock.set_image_metadata("openshift", "nodejs:14", nodejs_image());
        mock.add_pod(pod("web-1-abcde", "web", Some("Running")));
        let components = Components::new(client, test_settings());

        let dev = components.to_dev_mode("web", "openshift/nodejs:14").await.unwrap();
        assert_eq!(dev.annotation(SOURCE_TYPE_ANNOTATION), Some(SOURCE_TYPE_LOCAL));

        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("server.js"), "ok").unwrap();
        components
            .push("web", dir.path(), &[PathBuf::from("server.js")])
            .await
            .unwrap();

        let commands: Vec<_> = mock.exec_calls().into_iter().map(|c| c.command).collect();
        assert_eq!(commands.len(), 3);
        assert_eq!(commands[0], vec!["mkdir", "-p", "/opt/app-root/src"]);
        assert_eq!(commands[1], vec!["tar", "xf", "-", "-C", "/opt/app-root/src"]);
        assert_eq!(commands[2], vec!["/var/run/devloop/bin/assemble-and-restart"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_without_running_pod_times_out() {
        let (mock, client) = mock_client();
        mock.add_deployment_config(build_mode_dc("web"));
        mock.add_pod(pod("web-1-abcde", "web", Some("Pending")));
        let components = Components::new(client, test_settings());

        let dir = tempfile::tempdir().unwrap();
        let err = components.push("web", dir.path(), &[]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(mock.exec_calls().is_empty());
    }

    #[test]
    fn test_source_target_defaults_to_tmp() {
        let dc = build_mode_dc("web");
        assert_eq!(source_target(&dc, "web").unwrap(), "/tmp/src");
    }

    #[tokio::test]
    async fn test_to_dev_mode_with_unknown_image_is_not_found() {
        let (mock, client) = mock_client();
        mock.add_deployment_config(build_mode_dc("web"));
        let components = Components::new(client, test_settings());

        let err = components.to_dev_mode("web", "nodejs").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.to_string().contains(&format!("{}/nodejs:latest", NAMESPACE)));
        assert_eq!(mock.update_attempts(), 0);
    }

    #[tokio::test]
    async fn test_mode_round_trip_through_components() {
        let (mock, client) = mock_client();
        mock.add_deployment_config(build_mode_dc("web"));
        mock.set_image_metadata(NAMESPACE, "nodejs:latest", nodejs_image());
        let components = Components::new(client, test_settings());

        components.to_dev_mode("web", "nodejs").await.unwrap();
        let build = components.to_build_mode("web", "web:latest").await.unwrap();
        assert_eq!(build.annotation(SOURCE_TYPE_ANNOTATION), Some(SOURCE_TYPE_GIT));
        assert!(build.pod_spec().unwrap().volumes.is_none());
    }

    async fn complete_first_build(mock: &cluster_client::MockClusterClient, phase: BuildPhase) {
        while mock.build_names().is_empty() {
            tokio::task::yield_now().await;
        }
        tokio::task::yield_now().await;
        mock.set_build_phase("web-1", phase).unwrap();
    }

    #[tokio::test]
    async fn test_rebuild_waits_for_completion() {
        let (mock, client) = mock_client();
        mock.add_build_config("web");
        let components = Components::new(client, test_settings());

        let (result, ()) = tokio::join!(components.rebuild("web"), complete_first_build(&mock, BuildPhase::Complete));
        let build = result.unwrap();
        assert_eq!(build.name_any(), "web-1");
        assert_eq!(build.phase(), BuildPhase::Complete);
    }

    #[tokio::test]
    async fn test_failed_rebuild_is_condition_failed() {
        let (mock, client) = mock_client();
        mock.add_build_config("web");
        let components = Components::new(client, test_settings());

        let (result, ()) = tokio::join!(components.rebuild("web"), complete_first_build(&mock, BuildPhase::Failed));
        assert_eq!(result.unwrap_err().kind(), ErrorKind::ConditionFailed);
    }

    #[tokio::test]
    async fn test_rebuild_of_unknown_build_config_is_not_found() {
        let (_mock, client) = mock_client();
        let components = Components::new(client, test_settings());
        assert_eq!(components.rebuild("ghost").await.unwrap_err().kind(), ErrorKind::NotFound);
    }
}
