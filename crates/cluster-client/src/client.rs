//! Kubernetes-backed cluster client
//!
//! Implements [`ClusterClient`] over `kube::Api`. Watches are built on
//! `kube::runtime::watcher` so each stream owns its `Api` handle and is
//! `'static`; dropping the stream closes the HTTP watch.

use std::collections::BTreeMap;
use std::fmt::Debug;

use futures::StreamExt;
use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, Pod, Secret, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{
    Api, ApiResource, AttachParams, DeleteParams, DynamicObject, GroupVersionKind, ListParams,
    PostParams,
};
use kube::runtime::watcher;
use kube::{Client, Resource};
use openshift_types::{Build, BuildConfig, DeploymentConfig};
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use crate::cluster_trait::ClusterClient;
use crate::error::ClusterError;
use crate::models::*;

/// Cluster client backed by a live API server
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
    namespace: String,
}

impl std::fmt::Debug for KubeClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClusterClient")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl KubeClusterClient {
    /// Create a client from an existing kube client
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    /// Create a client from the standard kubeconfig / in-cluster resolution.
    ///
    /// # Arguments
    /// * `namespace` - Namespace to operate in; defaults to the kubeconfig context's namespace
    pub async fn try_default(namespace: Option<String>) -> Result<Self, ClusterError> {
        let client = Client::try_default().await?;
        let namespace = namespace.unwrap_or_else(|| client.default_namespace().to_string());
        debug!("Using namespace {}", namespace);
        Ok(Self::new(client, namespace))
    }

    fn api<K>(&self) -> Api<K>
    where
        K: Resource<Scope = kube::core::NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

fn watcher_config(selector: &Selector) -> watcher::Config {
    match selector {
        Selector::Name(name) => watcher::Config::default().fields(&format!("metadata.name={}", name)),
        Selector::Labels(labels) => watcher::Config::default().labels(labels),
    }
}

fn list_params(selector: &Selector) -> ListParams {
    match selector {
        Selector::Name(name) => ListParams::default().fields(&format!("metadata.name={}", name)),
        Selector::Labels(labels) => ListParams::default().labels(labels),
    }
}

/// Open a watch and translate runtime watcher events into [`WatchEvent`]s.
///
/// Objects present when the watch starts are reported as `Added`, later
/// changes as `Modified`. A watcher error is reported once and ends the
/// stream; callers treat it as a dead subscription.
fn open_watch<K>(api: Api<K>, selector: &Selector) -> WatchStream<K>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
{
    debug!("Opening watch ({})", selector);
    watcher(api, watcher_config(selector))
        .filter_map(|event| async move {
            match event {
                Ok(watcher::Event::InitApply(obj)) => Some(Ok(WatchEvent::Added(obj))),
                Ok(watcher::Event::Apply(obj)) => Some(Ok(WatchEvent::Modified(obj))),
                Ok(watcher::Event::Delete(obj)) => Some(Ok(WatchEvent::Deleted(obj))),
                Ok(watcher::Event::Init | watcher::Event::InitDone) => None,
                Err(e) => Some(Ok(WatchEvent::Error(e.to_string()))),
            }
        })
        .scan(false, |errored, item| {
            // Stop after the first error event
            let done = *errored;
            *errored = matches!(item, Ok(WatchEvent::Error(_)));
            futures::future::ready(if done { None } else { Some(item) })
        })
        .boxed()
}

async fn read_all<R>(reader: Option<R>) -> std::io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        reader.read_to_end(&mut buf).await?;
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[async_trait::async_trait]
impl ClusterClient for KubeClusterClient {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn get_deployment_config(&self, name: &str) -> Result<DeploymentConfig, ClusterError> {
        self.api::<DeploymentConfig>()
            .get(name)
            .await
            .map_err(|e| ClusterError::from_kube(e, "DeploymentConfig", name))
    }

    async fn update_deployment_config(&self, dc: &DeploymentConfig) -> Result<DeploymentConfig, ClusterError> {
        let name = dc.name();
        debug!("Replacing DeploymentConfig {}", name);
        self.api::<DeploymentConfig>()
            .replace(name, &PostParams::default(), dc)
            .await
            .map_err(|e| ClusterError::from_kube(e, "DeploymentConfig", name))
    }

    async fn watch_deployment_configs(&self, selector: &Selector) -> Result<WatchStream<DeploymentConfig>, ClusterError> {
        Ok(open_watch(self.api::<DeploymentConfig>(), selector))
    }

    async fn list_pods(&self, selector: &Selector) -> Result<Vec<Pod>, ClusterError> {
        let pods = self.api::<Pod>().list(&list_params(selector)).await?;
        Ok(pods.items)
    }

    async fn watch_pods(&self, selector: &Selector) -> Result<WatchStream<Pod>, ClusterError> {
        Ok(open_watch(self.api::<Pod>(), selector))
    }

    async fn get_secret(&self, name: &str) -> Result<Secret, ClusterError> {
        self.api::<Secret>()
            .get(name)
            .await
            .map_err(|e| ClusterError::from_kube(e, "Secret", name))
    }

    async fn watch_secrets(&self, selector: &Selector) -> Result<WatchStream<Secret>, ClusterError> {
        Ok(open_watch(self.api::<Secret>(), selector))
    }

    async fn instantiate_build(&self, build_config: &str) -> Result<Build, ClusterError> {
        let request = serde_json::json!({
            "kind": "BuildRequest",
            "apiVersion": "build.openshift.io/v1",
            "metadata": { "name": build_config },
        });
        debug!("Instantiating BuildConfig {}", build_config);
        self.api::<BuildConfig>()
            .create_subresource::<Build>(
                "instantiate",
                build_config,
                &PostParams::default(),
                serde_json::to_vec(&request)?,
            )
            .await
            .map_err(|e| ClusterError::from_kube(e, "BuildConfig", build_config))
    }

    async fn watch_builds(&self, selector: &Selector) -> Result<WatchStream<Build>, ClusterError> {
        Ok(open_watch(self.api::<Build>(), selector))
    }

    async fn create_pvc(&self, name: &str, size: &str, labels: BTreeMap<String, String>) -> Result<PersistentVolumeClaim, ClusterError> {
        let pvc = PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
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
        debug!("Creating PersistentVolumeClaim {} ({})", name, size);
        self.api::<PersistentVolumeClaim>()
            .create(&PostParams::default(), &pvc)
            .await
            .map_err(|e| ClusterError::from_kube(e, "PersistentVolumeClaim", name))
    }

    async fn get_pvc(&self, name: &str) -> Result<PersistentVolumeClaim, ClusterError> {
        self.api::<PersistentVolumeClaim>()
            .get(name)
            .await
            .map_err(|e| ClusterError::from_kube(e, "PersistentVolumeClaim", name))
    }

    async fn delete_pvc(&self, name: &str) -> Result<(), ClusterError> {
        debug!("Deleting PersistentVolumeClaim {}", name);
        self.api::<PersistentVolumeClaim>()
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| ClusterError::from_kube(e, "PersistentVolumeClaim", name))?;
        Ok(())
    }

    async fn watch_pvcs(&self, selector: &Selector) -> Result<WatchStream<PersistentVolumeClaim>, ClusterError> {
        Ok(open_watch(self.api::<PersistentVolumeClaim>(), selector))
    }

    async fn get_image_metadata(&self, namespace: &str, image_stream_tag: &str) -> Result<ImageMetadata, ClusterError> {
        let gvk = GroupVersionKind::gvk("image.openshift.io", "v1", "ImageStreamTag");
        let resource = ApiResource::from_gvk_with_plural(&gvk, "imagestreamtags");
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, &resource);
        let tag = api
            .get(image_stream_tag)
            .await
            .map_err(|e| ClusterError::from_kube(e, "ImageStreamTag", image_stream_tag))?;
        Ok(ImageMetadata::from_image_stream_tag(&serde_json::to_value(&tag)?))
    }

    async fn exec(
        &self,
        pod: &str,
        container: Option<&str>,
        command: &[String],
        stdin: Option<BoxedAsyncRead>,
        tty: bool,
    ) -> Result<ExecOutput, ClusterError> {
        let params = AttachParams {
            container: container.map(str::to_string),
            stdin: stdin.is_some(),
            stdout: true,
            // A TTY merges stderr into stdout
            stderr: !tty,
            tty,
            ..Default::default()
        };
        debug!("Executing {:?} in pod {}", command, pod);

        let mut attached = self
            .api::<Pod>()
            .exec(pod, command.to_vec(), &params)
            .await
            .map_err(|e| ClusterError::from_kube(e, "Pod", pod))?;

        let remote_stdin = attached.stdin();
        let remote_stdout = attached.stdout();
        let remote_stderr = attached.stderr();
        let status = attached.take_status();

        let feed = async move {
            if let (Some(mut source), Some(mut sink)) = (stdin, remote_stdin) {
                tokio::io::copy(&mut source, &mut sink).await?;
                sink.shutdown().await?;
            }
            Ok::<(), std::io::Error>(())
        };

        let ((), stdout, stderr) =
            tokio::try_join!(feed, read_all(remote_stdout), read_all(remote_stderr))?;

        if let Some(status) = status {
            if let Some(status) = status.await {
                if status.status.as_deref() == Some("Failure") {
                    let message = status.message.unwrap_or_default();
                    return Err(ClusterError::Exec(if stderr.is_empty() {
                        message
                    } else {
                        format!("{}: {}", message, stderr.trim_end())
                    }));
                }
            }
        }

        Ok(ExecOutput { stdout, stderr })
    }
}
