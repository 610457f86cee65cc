//! Test utilities for unit testing core operations
//!
//! Fixture builders for workloads, pods and secrets, plus mock client setup.

#![cfg(test)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use cluster_client::{ClusterClient, ImageMetadata, MockClusterClient};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, Pod, PodSpec, PodStatus, PodTemplateSpec, Secret,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use openshift_types::{DeploymentConfig, DeploymentConfigSpec};

use crate::backoff::ConflictBackoff;
use crate::settings::Settings;

pub const NAMESPACE: &str = "devloop-test";

/// Settings with short timeouts so timeout paths finish quickly
pub fn test_settings() -> Settings {
    Settings {
        update_timeout: Duration::from_secs(5),
        pod_timeout: Duration::from_secs(5),
        build_timeout: Duration::from_secs(5),
        secret_timeout: Duration::from_secs(5),
        delete_timeout: Duration::from_secs(5),
        backoff: ConflictBackoff::new(1, 10, 4),
        ..Settings::default()
    }
}

/// Mock client plus the same object as a trait handle
pub fn mock_client() -> (MockClusterClient, Arc<dyn ClusterClient>) {
    let mock = MockClusterClient::new(NAMESPACE);
    let handle: Arc<dyn ClusterClient> = Arc::new(mock.clone());
    (mock, handle)
}

pub fn env(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}

pub fn port(number: i32, protocol: &str) -> ContainerPort {
    ContainerPort {
        name: Some(format!("{}-{}", number, protocol.to_lowercase())),
        container_port: number,
        protocol: Some(protocol.to_string()),
        ..Default::default()
    }
}

/// Build-mode workload: ports `[8080/TCP]`, env `[A=1]`, no volumes
pub fn build_mode_dc(name: &str) -> DeploymentConfig {
    let labels = BTreeMap::from([
        ("app".to_string(), "shop".to_string()),
        ("deploymentconfig".to_string(), name.to_string()),
    ]);
    DeploymentConfig {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            labels: Some(labels.clone()),
            annotations: Some(BTreeMap::from([(
                "app.kubernetes.io/component-source-type".to_string(),
                "git".to_string(),
            )])),
            ..Default::default()
        },
        spec: DeploymentConfigSpec {
            replicas: Some(1),
            selector: Some(labels.clone()),
            template: Some(PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: name.to_string(),
                        image: Some(format!("{}:latest", name)),
                        ports: Some(vec![port(8080, "TCP")]),
                        env: Some(vec![env("A", "1")]),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            }),
            ..Default::default()
        },
        status: None,
    }
}

pub fn pod(name: &str, component: &str, phase: Option<&str>) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            labels: Some(BTreeMap::from([(
                "deploymentconfig".to_string(),
                component.to_string(),
            )])),
            ..Default::default()
        },
        status: Some(PodStatus {
            phase: phase.map(str::to_string),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn secret(name: &str) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Builder image exposing 8080/tcp with S2I labels
pub fn nodejs_image() -> ImageMetadata {
    ImageMetadata {
        docker_image_reference: Some("registry.local/openshift/nodejs@sha256:0123".to_string()),
        exposed_ports: vec!["8080/tcp".to_string()],
        labels: BTreeMap::from([
            ("io.openshift.s2i.scripts-url".to_string(), "image:///usr/libexec/s2i".to_string()),
            ("io.openshift.s2i.destination".to_string(), "/opt/app-root".to_string()),
        ]),
    }
}
