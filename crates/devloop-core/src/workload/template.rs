//! Desired descriptors for build and dev mode
//!
//! Both builders start from the live workload so selector, sidecars and
//! user init containers survive a mode switch. Volumes are left to the
//! patch cycle's copy-forward, apart from the two dev-mode volumes.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Container, EmptyDirVolumeSource, EnvVar, ObjectReference, PersistentVolumeClaimVolumeSource, PodSpec,
    PodTemplateSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use openshift_types::{
    DeploymentConfig, DeploymentConfigSpec, DeploymentStrategy, DeploymentTriggerImageChangeParams,
    DeploymentTriggerPolicy,
};

use super::env::{env_var, merge_env};
use super::{
    APP_ROOT, BOOTSTRAP_INIT_CONTAINERS, COPY_FILES_TO_VOLUME, COPY_SUPERVISORD, ComponentMeta, SCRATCH_VOLUME,
    SUPERVISOR_DIR, app_data_claim_name, app_data_volume_name,
};
use crate::error::DevError;
use crate::image::{BuilderImage, ImageReference};

/// Scripts location handed to the supervisor
pub const ENV_S2I_SCRIPTS_URL: &str = "DEVLOOP_S2I_SCRIPTS_URL";
/// Protocol of the scripts location
pub const ENV_S2I_SCRIPTS_PROTOCOL: &str = "DEVLOOP_S2I_SCRIPTS_PROTOCOL";
/// Where pushed sources land before assemble runs
pub const ENV_S2I_SRC_BIN_PATH: &str = "DEVLOOP_S2I_SRC_BIN_PATH";
/// Deployment directory for binary components
pub const ENV_S2I_DEPLOYMENT_DIR: &str = "DEVLOOP_S2I_DEPLOYMENT_DIR";
/// Every env key the dev-mode bootstrap sets
pub const BOOTSTRAP_ENV_KEYS: [&str; 4] = [
    ENV_S2I_SCRIPTS_URL,
    ENV_S2I_SCRIPTS_PROTOCOL,
    ENV_S2I_SRC_BIN_PATH,
    ENV_S2I_DEPLOYMENT_DIR,
];

/// Where `copy-files-to-volume` sees the app-data volume
const APP_DATA_STAGING: &str = "/mnt/app-root";
/// Where the supervisor image keeps its payload
const SUPERVISOR_PAYLOAD: &str = "/opt/devloop-supervisord";

fn selector_labels(name: &str, current: &DeploymentConfig) -> BTreeMap<String, String> {
    current
        .spec
        .selector
        .clone()
        .unwrap_or_else(|| BTreeMap::from([("deploymentconfig".to_string(), name.to_string())]))
}

fn template_labels(meta: &ComponentMeta, selector: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut labels = meta.labels.clone();
    labels.extend(selector.clone());
    labels
}

fn image_change_trigger(container: &str, namespace: Option<String>, stream_tag: String) -> DeploymentTriggerPolicy {
    DeploymentTriggerPolicy {
        type_: "ImageChange".to_string(),
        image_change_params: Some(DeploymentTriggerImageChangeParams {
            automatic: true,
            container_names: vec![container.to_string()],
            from: ObjectReference {
                kind: Some("ImageStreamTag".to_string()),
                name: Some(stream_tag),
                namespace,
                ..Default::default()
            },
        }),
    }
}

fn config_change_trigger() -> DeploymentTriggerPolicy {
    DeploymentTriggerPolicy {
        type_: "ConfigChange".to_string(),
        image_change_params: None,
    }
}

/// Containers other than the primary, unchanged
fn sidecars(current: &DeploymentConfig, name: &str) -> Vec<Container> {
    current
        .pod_spec()
        .map(|s| s.containers.iter().filter(|c| c.name != name).cloned().collect())
        .unwrap_or_default()
}

fn init_containers(current: &DeploymentConfig) -> Vec<Container> {
    current
        .pod_spec()
        .and_then(|s| s.init_containers.clone())
        .unwrap_or_default()
}

fn descriptor(
    meta: &ComponentMeta,
    current: &DeploymentConfig,
    containers: Vec<Container>,
    init_containers: Vec<Container>,
    volumes: Vec<Volume>,
    strategy: Option<DeploymentStrategy>,
    triggers: Vec<DeploymentTriggerPolicy>,
) -> DeploymentConfig {
    let selector = selector_labels(&meta.name, current);
    let current_pod = current.pod_spec().cloned().unwrap_or_default();
    DeploymentConfig {
        metadata: ObjectMeta {
            name: Some(meta.name.clone()),
            namespace: current.metadata.namespace.clone(),
            labels: Some(meta.labels.clone()),
            annotations: Some(meta.annotations.clone()),
            ..Default::default()
        },
        spec: DeploymentConfigSpec {
            replicas: current.spec.replicas.or(Some(1)),
            selector: Some(selector.clone()),
            template: Some(PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(template_labels(meta, &selector)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers,
                    init_containers: (!init_containers.is_empty()).then_some(init_containers),
                    volumes: (!volumes.is_empty()).then_some(volumes),
                    ..current_pod
                }),
            }),
            triggers: Some(triggers),
            strategy,
        },
        status: None,
    }
}

/// Build-mode descriptor.
///
/// Ports, env and resources come from the live primary container so ad-hoc
/// edits survive; the image comes from `image`. Init containers are carried
/// over for the pre-patch hook to clean up.
pub fn build_mode_descriptor(
    meta: &ComponentMeta,
    current: &DeploymentConfig,
    live_primary: &Container,
    image: &ImageReference,
) -> DeploymentConfig {
    let primary = Container {
        name: meta.name.clone(),
        image: Some(image.to_string()),
        ports: live_primary.ports.clone(),
        env: live_primary.env.clone(),
        resources: live_primary.resources.clone(),
        ..Default::default()
    };
    let mut containers = vec![primary];
    containers.extend(sidecars(current, &meta.name));

    let triggers = vec![
        config_change_trigger(),
        image_change_trigger(&meta.name, image.namespace.clone(), image.stream_tag()),
    ];
    descriptor(
        meta,
        current,
        containers,
        init_containers(current),
        Vec::new(),
        current.spec.strategy.clone(),
        triggers,
    )
}

/// Env values the supervisor reads to locate scripts and sources
pub fn bootstrap_env(builder: &BuilderImage) -> Result<Vec<EnvVar>, DevError> {
    let paths = builder.s2i_paths()?;
    Ok(vec![
        env_var(ENV_S2I_SCRIPTS_URL, paths.scripts_url),
        env_var(ENV_S2I_SCRIPTS_PROTOCOL, paths.scripts_protocol),
        env_var(ENV_S2I_SRC_BIN_PATH, paths.src_or_bin_path),
        env_var(ENV_S2I_DEPLOYMENT_DIR, paths.deployment_dir),
    ])
}

/// Dev-mode descriptor.
///
/// Ports come from the builder image; env is the live env with the
/// bootstrap keys added or overwritten. Adds the ephemeral scratch volume
/// for the supervisor, the app-data volume bound to the component claim,
/// their mounts on the primary container and the two bootstrap init
/// containers.
pub fn dev_mode_descriptor(
    meta: &ComponentMeta,
    current: &DeploymentConfig,
    live_primary: &Container,
    builder: &BuilderImage,
    supervisor_image: &str,
) -> Result<DeploymentConfig, DevError> {
    let app_data = app_data_volume_name(&meta.name);
    let scratch_mount = VolumeMount {
        name: SCRATCH_VOLUME.to_string(),
        mount_path: SUPERVISOR_DIR.to_string(),
        ..Default::default()
    };
    let app_data_mount = VolumeMount {
        name: app_data.clone(),
        mount_path: APP_ROOT.to_string(),
        ..Default::default()
    };
    let builder_image = builder
        .metadata
        .docker_image_reference
        .clone()
        .unwrap_or_else(|| builder.reference.to_string());

    let env = merge_env(
        live_primary.env.as_deref().unwrap_or_default(),
        &bootstrap_env(builder)?,
    );
    let ports = builder.exposed_ports()?;

    let primary = Container {
        name: meta.name.clone(),
        image: Some(builder_image.clone()),
        command: Some(vec![format!("{}/bin/supervisord", SUPERVISOR_DIR)]),
        args: Some(vec!["-c".to_string(), format!("{}/conf/supervisor.conf", SUPERVISOR_DIR)]),
        ports: (!ports.is_empty()).then_some(ports),
        env: Some(env),
        resources: live_primary.resources.clone(),
        volume_mounts: Some(vec![scratch_mount.clone(), app_data_mount]),
        ..Default::default()
    };
    let mut containers = vec![primary];
    containers.extend(sidecars(current, &meta.name));

    let mut init = init_containers(current);
    init.retain(|c| !BOOTSTRAP_INIT_CONTAINERS.contains(&c.name.as_str()));
    init.push(Container {
        name: COPY_SUPERVISORD.to_string(),
        image: Some(supervisor_image.to_string()),
        command: Some(vec!["/bin/cp".to_string()]),
        args: Some(vec![
            "-r".to_string(),
            format!("{}/.", SUPERVISOR_PAYLOAD),
            SUPERVISOR_DIR.to_string(),
        ]),
        volume_mounts: Some(vec![scratch_mount]),
        ..Default::default()
    });
    init.push(Container {
        name: COPY_FILES_TO_VOLUME.to_string(),
        image: Some(builder_image),
        command: Some(vec!["sh".to_string(), "-c".to_string()]),
        args: Some(vec![format!(
            "cp -rp {root}/. {staging}",
            root = APP_ROOT,
            staging = APP_DATA_STAGING
        )]),
        volume_mounts: Some(vec![VolumeMount {
            name: app_data.clone(),
            mount_path: APP_DATA_STAGING.to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    });

    let volumes = vec![
        Volume {
            name: SCRATCH_VOLUME.to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        },
        Volume {
            name: app_data,
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: app_data_claim_name(&meta.name),
                read_only: None,
            }),
            ..Default::default()
        },
    ];

    let strategy = Some(DeploymentStrategy {
        type_: Some("Recreate".to_string()),
    });
    let triggers = vec![
        config_change_trigger(),
        image_change_trigger(&meta.name, builder.reference.namespace.clone(), builder.reference.stream_tag()),
    ];
    Ok(descriptor(meta, current, containers, init, volumes, strategy, triggers))
}
