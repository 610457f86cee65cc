//! Mock ClusterClient for unit testing
//!
//! Keeps every resource in memory and replays watch events the way the API
//! server does. The mock is organized into:
//! - `store.rs` - generic resource store with watch fan-out
//! - `exec.rs` - recorded exec calls and scripted failures

mod exec;
mod store;

pub use exec::ExecCall;

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, Pod, PodStatus, Secret,
    VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use openshift_types::{Build, BuildConfig, BuildPhase, BuildStatus, DeploymentConfig};

use crate::cluster_trait::ClusterClient;
use crate::error::ClusterError;
use crate::models::*;
use store::ResourceStore;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mock ClusterClient for testing
#[derive(Clone)]
pub struct MockClusterClient {
    pub(crate) namespace: String,
    pub(crate) deployment_configs: Arc<Mutex<ResourceStore<DeploymentConfig>>>,
    pub(crate) pods: Arc<Mutex<ResourceStore<Pod>>>,
    pub(crate) secrets: Arc<Mutex<ResourceStore<Secret>>>,
    pub(crate) builds: Arc<Mutex<ResourceStore<Build>>>,
    pub(crate) build_configs: Arc<Mutex<ResourceStore<BuildConfig>>>,
    pub(crate) pvcs: Arc<Mutex<ResourceStore<PersistentVolumeClaim>>>,
    pub(crate) images: Arc<Mutex<HashMap<(String, String), ImageMetadata>>>,
    // Scripted behaviour
    pub(crate) update_conflicts: Arc<Mutex<usize>>,
    pub(crate) update_attempts: Arc<Mutex<usize>>,
    pub(crate) fail_pvc_create: Arc<Mutex<bool>>,
    pub(crate) hold_pvc_deletion: Arc<Mutex<bool>>,
    pub(crate) exec_calls: Arc<Mutex<Vec<ExecCall>>>,
    pub(crate) exec_failures: Arc<Mutex<VecDeque<exec::ExecFailure>>>,
}

impl std::fmt::Debug for MockClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockClusterClient")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl MockClusterClient {
    /// Create a new, empty mock client for `namespace`
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            deployment_configs: Arc::new(Mutex::new(ResourceStore::new("DeploymentConfig"))),
            pods: Arc::new(Mutex::new(ResourceStore::new("Pod"))),
            secrets: Arc::new(Mutex::new(ResourceStore::new("Secret"))),
            builds: Arc::new(Mutex::new(ResourceStore::new("Build"))),
            build_configs: Arc::new(Mutex::new(ResourceStore::new("BuildConfig"))),
            pvcs: Arc::new(Mutex::new(ResourceStore::new("PersistentVolumeClaim"))),
            images: Arc::new(Mutex::new(HashMap::new())),
            update_conflicts: Arc::new(Mutex::new(0)),
            update_attempts: Arc::new(Mutex::new(0)),
            fail_pvc_create: Arc::new(Mutex::new(false)),
            hold_pvc_deletion: Arc::new(Mutex::new(false)),
            exec_calls: Arc::new(Mutex::new(Vec::new())),
            exec_failures: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Add or overwrite a deployment config (for test setup)
    pub fn add_deployment_config(&self, dc: DeploymentConfig) -> DeploymentConfig {
        lock(&self.deployment_configs).upsert(dc)
    }

    /// Mutate a stored deployment config as another writer would
    pub fn modify_deployment_config(&self, name: &str, f: impl FnOnce(&mut DeploymentConfig)) -> Result<DeploymentConfig, ClusterError> {
        lock(&self.deployment_configs).modify(name, f)
    }

    /// Current stored deployment config, if any
    pub fn deployment_config(&self, name: &str) -> Option<DeploymentConfig> {
        lock(&self.deployment_configs).get(name).ok()
    }

    /// Make the next `n` deployment config updates fail with a conflict
    pub fn inject_update_conflicts(&self, n: usize) {
        *lock(&self.update_conflicts) = n;
    }

    /// Number of deployment config updates attempted so far
    pub fn update_attempts(&self) -> usize {
        *lock(&self.update_attempts)
    }

    /// Add or overwrite a pod (for test setup)
    pub fn add_pod(&self, pod: Pod) -> Pod {
        lock(&self.pods).upsert(pod)
    }

    /// Set a pod's phase, publishing a `Modified` event
    pub fn set_pod_phase(&self, name: &str, phase: &str) -> Result<Pod, ClusterError> {
        lock(&self.pods).modify(name, |pod| {
            pod.status.get_or_insert_with(PodStatus::default).phase = Some(phase.to_string());
        })
    }

    /// Add a secret (for test setup); publishes `Added`
    pub fn add_secret(&self, secret: Secret) -> Secret {
        lock(&self.secrets).upsert(secret)
    }

    /// Register a build config that can be instantiated
    pub fn add_build_config(&self, name: &str) -> BuildConfig {
        let bc = BuildConfig::new(name, Default::default());
        lock(&self.build_configs).upsert(bc)
    }

    /// Move a build to `phase`, publishing a `Modified` event
    pub fn set_build_phase(&self, name: &str, phase: BuildPhase) -> Result<Build, ClusterError> {
        lock(&self.builds).modify(name, |build| {
            build.status = Some(BuildStatus { phase, message: None });
        })
    }

    /// Names of all builds, in name order
    pub fn build_names(&self) -> Vec<String> {
        lock(&self.builds)
            .list(&Selector::labels(""))
            .into_iter()
            .filter_map(|b| b.metadata.name)
            .collect()
    }

    /// Whether a claim currently exists
    pub fn has_pvc(&self, name: &str) -> bool {
        lock(&self.pvcs).contains(name)
    }

    /// Make `create_pvc` fail with an API-style error
    pub fn fail_pvc_creation(&self, fail: bool) {
        *lock(&self.fail_pvc_create) = fail;
    }

    /// Accept PVC deletes without ever removing the object
    pub fn hold_pvc_deletion(&self, hold: bool) {
        *lock(&self.hold_pvc_deletion) = hold;
    }

    /// Register builder image metadata for `<namespace>/<stream:tag>`
    pub fn set_image_metadata(&self, namespace: &str, image_stream_tag: &str, metadata: ImageMetadata) {
        lock(&self.images).insert((namespace.to_string(), image_stream_tag.to_string()), metadata);
    }

    /// Deliver a raw event to pod watchers
    pub fn inject_pod_event(&self, event: WatchEvent<Pod>) {
        lock(&self.pods).inject(event);
    }

    /// Deliver a raw event to deployment config watchers
    pub fn inject_deployment_config_event(&self, event: WatchEvent<DeploymentConfig>) {
        lock(&self.deployment_configs).inject(event);
    }

    /// End every open watch as if the server closed the connections
    pub fn close_watches(&self) {
        lock(&self.deployment_configs).close_watches();
        lock(&self.pods).close_watches();
        lock(&self.secrets).close_watches();
        lock(&self.builds).close_watches();
        lock(&self.pvcs).close_watches();
    }

    /// Number of watch subscriptions whose stream has not been dropped
    pub fn active_watches(&self) -> usize {
        lock(&self.deployment_configs).active_watches()
            + lock(&self.pods).active_watches()
            + lock(&self.secrets).active_watches()
            + lock(&self.builds).active_watches()
            + lock(&self.pvcs).active_watches()
    }
}

#[async_trait::async_trait]
impl ClusterClient for MockClusterClient {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn get_deployment_config(&self, name: &str) -> Result<DeploymentConfig, ClusterError> {
        lock(&self.deployment_configs).get(name)
    }

    async fn update_deployment_config(&self, dc: &DeploymentConfig) -> Result<DeploymentConfig, ClusterError> {
        *lock(&self.update_attempts) += 1;
        {
            let mut pending = lock(&self.update_conflicts);
            if *pending > 0 {
                *pending -= 1;
                return Err(ClusterError::Conflict {
                    kind: "DeploymentConfig",
                    name: dc.name().to_string(),
                });
            }
        }
        lock(&self.deployment_configs).replace(dc.clone())
    }

    async fn watch_deployment_configs(&self, selector: &Selector) -> Result<WatchStream<DeploymentConfig>, ClusterError> {
        Ok(lock(&self.deployment_configs).watch(selector))
    }

    async fn list_pods(&self, selector: &Selector) -> Result<Vec<Pod>, ClusterError> {
        Ok(lock(&self.pods).list(selector))
    }

    async fn watch_pods(&self, selector: &Selector) -> Result<WatchStream<Pod>, ClusterError> {
        Ok(lock(&self.pods).watch(selector))
    }

    async fn get_secret(&self, name: &str) -> Result<Secret, ClusterError> {
        lock(&self.secrets).get(name)
    }

    async fn watch_secrets(&self, selector: &Selector) -> Result<WatchStream<Secret>, ClusterError> {
        Ok(lock(&self.secrets).watch(selector))
    }

    async fn instantiate_build(&self, build_config: &str) -> Result<Build, ClusterError> {
        let version = {
            let mut configs = lock(&self.build_configs);
            let bc = configs.modify(build_config, |bc| {
                let status = bc.status.get_or_insert_with(Default::default);
                status.last_version += 1;
            })?;
            bc.status.map(|s| s.last_version).unwrap_or_default()
        };

        let mut build = Build::new(&format!("{}-{}", build_config, version), Default::default());
        build.metadata.labels = Some(BTreeMap::from([
            ("buildconfig".to_string(), build_config.to_string()),
            ("openshift.io/build-config.name".to_string(), build_config.to_string()),
        ]));
        build.status = Some(BuildStatus::default());
        lock(&self.builds).create(build)
    }

    async fn watch_builds(&self, selector: &Selector) -> Result<WatchStream<Build>, ClusterError> {
        Ok(lock(&self.builds).watch(selector))
    }

    async fn create_pvc(&self, name: &str, size: &str, labels: BTreeMap<String, String>) -> Result<PersistentVolumeClaim, ClusterError> {
        if *lock(&self.fail_pvc_create) {
            return Err(ClusterError::Exec(format!("quota exceeded creating claim {}", name)));
        }
        let pvc = PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(self.namespace.clone()),
                labels: Some(labels),
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                resources: Some(VolumeResourceRequirements {
                    requests: Some(BTreeMap::from([("storage".to_string(), Quantity(size.to_string()))])),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        };
        lock(&self.pvcs).create(pvc)
    }

    async fn get_pvc(&self, name: &str) -> Result<PersistentVolumeClaim, ClusterError> {
        lock(&self.pvcs).get(name)
    }

    async fn delete_pvc(&self, name: &str) -> Result<(), ClusterError> {
        let mut pvcs = lock(&self.pvcs);
        if *lock(&self.hold_pvc_deletion) {
            pvcs.get(name)?;
            return Ok(());
        }
        pvcs.remove(name)?;
        Ok(())
    }

    async fn watch_pvcs(&self, selector: &Selector) -> Result<WatchStream<PersistentVolumeClaim>, ClusterError> {
        Ok(lock(&self.pvcs).watch(selector))
    }

    async fn get_image_metadata(&self, namespace: &str, image_stream_tag: &str) -> Result<ImageMetadata, ClusterError> {
        lock(&self.images)
            .get(&(namespace.to_string(), image_stream_tag.to_string()))
            .cloned()
            .ok_or_else(|| ClusterError::NotFound {
                kind: "ImageStreamTag",
                name: format!("{}/{}", namespace, image_stream_tag),
            })
    }

    async fn exec(
        &self,
        pod: &str,
        container: Option<&str>,
        command: &[String],
        stdin: Option<BoxedAsyncRead>,
        tty: bool,
    ) -> Result<ExecOutput, ClusterError> {
        exec::exec(self, pod, container, command, stdin, tty).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn pod(name: &str, labels: &[(&str, &str)]) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_watch_replays_existing_then_streams_changes() {
        let client = MockClusterClient::new("dev");
        client.add_pod(pod("web-1", &[("deploymentconfig", "web")]));
        client.add_pod(pod("db-1", &[("deploymentconfig", "db")]));

        let mut stream = client
            .watch_pods(&Selector::labels("deploymentconfig=web"))
            .await
            .unwrap();

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.change_type(), ChangeType::Added);
        assert_eq!(first.object().unwrap().metadata.name.as_deref(), Some("web-1"));

        client.set_pod_phase("db-1", "Running").unwrap();
        client.set_pod_phase("web-1", "Running").unwrap();

        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second.change_type(), ChangeType::Modified);
        assert_eq!(second.object().unwrap().metadata.name.as_deref(), Some("web-1"));
    }

    #[tokio::test]
    async fn test_dropping_stream_releases_watch() {
        let client = MockClusterClient::new("dev");
        let stream = client.watch_secrets(&Selector::name("token")).await.unwrap();
        assert_eq!(client.active_watches(), 1);
        drop(stream);
        assert_eq!(client.active_watches(), 0);
    }

    #[tokio::test]
    async fn test_stale_update_is_a_conflict() {
        let client = MockClusterClient::new("dev");
        let stored = client.add_deployment_config(DeploymentConfig::new("web", Default::default()));

        client
            .modify_deployment_config("web", |dc| dc.spec.replicas = Some(2))
            .unwrap();

        let err = client.update_deployment_config(&stored).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_injected_conflicts_are_consumed() {
        let client = MockClusterClient::new("dev");
        let stored = client.add_deployment_config(DeploymentConfig::new("web", Default::default()));
        client.inject_update_conflicts(1);

        assert!(client.update_deployment_config(&stored).await.unwrap_err().is_conflict());
        assert!(client.update_deployment_config(&stored).await.is_ok());
        assert_eq!(client.update_attempts(), 2);
    }

    #[tokio::test]
    async fn test_instantiate_build_increments_version() {
        let client = MockClusterClient::new("dev");
        client.add_build_config("web");

        let first = client.instantiate_build("web").await.unwrap();
        let second = client.instantiate_build("web").await.unwrap();
        assert_eq!(first.metadata.name.as_deref(), Some("web-1"));
        assert_eq!(second.metadata.name.as_deref(), Some("web-2"));
        assert!(client.instantiate_build("missing").await.unwrap_err().is_not_found());
    }
}
