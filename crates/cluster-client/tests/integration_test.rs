//! Integration tests for the cluster client
//!
//! These tests require a reachable OpenShift cluster in the current
//! kubeconfig context. Set DEVLOOP_IT_NAMESPACE to choose the namespace and
//! DEVLOOP_IT_COMPONENT to a deployed component name.

use cluster_client::{ClusterClient, KubeClusterClient, Selector};
use futures::StreamExt;

async fn client() -> KubeClusterClient {
    let namespace = std::env::var("DEVLOOP_IT_NAMESPACE").ok();
    KubeClusterClient::try_default(namespace)
        .await
        .expect("Failed to create cluster client")
}

#[tokio::test]
#[ignore] // Requires a live cluster
async fn test_get_deployment_config() {
    let component = std::env::var("DEVLOOP_IT_COMPONENT")
        .expect("DEVLOOP_IT_COMPONENT environment variable must be set");
    let client = client().await;

    let dc = client
        .get_deployment_config(&component)
        .await
        .expect("Failed to get deployment config");
    assert_eq!(dc.metadata.name.as_deref(), Some(component.as_str()));
}

#[tokio::test]
#[ignore]
async fn test_watch_replays_existing_pods() {
    let component = std::env::var("DEVLOOP_IT_COMPONENT")
        .expect("DEVLOOP_IT_COMPONENT environment variable must be set");
    let client = client().await;

    let selector = Selector::labels(format!("deploymentconfig={}", component));
    let pods = client.list_pods(&selector).await.expect("Failed to list pods");
    let mut stream = client.watch_pods(&selector).await.expect("Failed to watch pods");

    if !pods.is_empty() {
        let first = stream.next().await.expect("Stream ended").expect("Watch error");
        assert!(first.object().is_some());
    }
}

#[tokio::test]
#[ignore]
async fn test_exec_echo() {
    let component = std::env::var("DEVLOOP_IT_COMPONENT")
        .expect("DEVLOOP_IT_COMPONENT environment variable must be set");
    let client = client().await;

    let pods = client
        .list_pods(&Selector::labels(format!("deploymentconfig={}", component)))
        .await
        .expect("Failed to list pods");
    let pod = pods
        .first()
        .and_then(|p| p.metadata.name.clone())
        .expect("No pod for component");

    let output = client
        .exec(&pod, None, &["echo".to_string(), "devloop".to_string()], None, false)
        .await
        .expect("Exec failed");
    assert_eq!(output.stdout.trim(), "devloop");
}
