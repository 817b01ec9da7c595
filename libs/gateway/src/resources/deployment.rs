//! Child Deployment (spec §4.3 step 8): a two-stage pod template. An init container
//! substitutes `${ENV}` placeholders in the rendered TOML template using the
//! credentials Secret as its environment, then the main gateway container mounts the
//! rendered file read-only.

use crate::crd::{DBHubInstance, Transport};
use crate::resources::configmap::{CONFIG_KEY, COMPONENT};
use crate::resources::{configmap, secret};

use dbhub_operator::labels::{CONFIG_HASH_LABEL, canonical_labels};

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource, EnvFromSource, HTTPGetAction,
    PodSpec, PodTemplateSpec, Probe, SecretEnvSource, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};

pub const DEFAULT_IMAGE: &str = "ghcr.io/tas-io/dbhub-gateway:latest";
const INIT_IMAGE: &str = "busybox:1.36";
const TEMPLATE_VOLUME: &str = "config-template";
const RENDERED_VOLUME: &str = "config-rendered";
const TEMPLATE_PATH: &str = "/etc/dbhub/template";
const RENDERED_PATH: &str = "/etc/dbhub/config";
const RENDERED_FILE: &str = "dbhub.toml";
const MAIN_CONTAINER_NAME: &str = "gateway";

/// Substitutes every `${VAR}` occurrence in the mounted template using the process
/// environment, and fails hard (non-zero exit) if any placeholder has no matching
/// variable. Kept dependency-free (no `envsubst` binary assumed in the init image).
const RENDER_SCRIPT: &str = r#"set -eu
awk '
{
  line = $0
  out = ""
  while (match(line, /\$\{[A-Za-z_][A-Za-z0-9_]*\}/)) {
    name = substr(line, RSTART + 2, RLENGTH - 3)
    if (!(name in ENVIRON)) {
      print "missing environment variable for placeholder " name > "/dev/stderr"
      exit 1
    }
    out = out substr(line, 1, RSTART - 1) ENVIRON[name]
    line = substr(line, RSTART + RLENGTH)
  }
  print out line
}' "$TEMPLATE_PATH/$TEMPLATE_FILE" > "$RENDERED_PATH/$RENDERED_FILE"
"#;

pub fn name(instance_name: &str) -> String {
    instance_name.to_string()
}

/// Build the desired `Deployment` for `instance`, whose pod template is labeled with
/// `config_hash` so that any rendered-config change forces a rolling replacement.
pub fn build(instance: &DBHubInstance, config_hash: &str) -> Deployment {
    let instance_name = instance.name_any();
    let selector_labels = canonical_labels(&instance_name, COMPONENT);
    let pod_labels: std::collections::BTreeMap<String, String> = selector_labels
        .clone()
        .into_iter()
        .chain([(CONFIG_HASH_LABEL.to_string(), config_hash.to_string())])
        .collect();

    let port = instance.spec.port.unwrap_or(8080);
    let transport = instance.spec.transport;

    Deployment {
        metadata: ObjectMeta {
            name: Some(name(&instance_name)),
            namespace: instance.namespace(),
            labels: Some(selector_labels.clone()),
            owner_references: instance.controller_owner_ref(&()).map(|oref| vec![oref]),
            ..ObjectMeta::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(instance.spec.replicas.unwrap_or(1)),
            selector: LabelSelector {
                match_expressions: None,
                match_labels: Some(selector_labels),
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(pod_labels),
                    annotations: Some(scrape_annotations(port)),
                    ..ObjectMeta::default()
                }),
                spec: Some(PodSpec {
                    init_containers: Some(vec![render_init_container(&instance_name)]),
                    containers: vec![main_container(instance, port, transport)],
                    volumes: Some(vec![template_volume(&instance_name), rendered_volume()]),
                    node_selector: instance.spec.node_selector.clone(),
                    tolerations: instance.spec.tolerations.clone(),
                    affinity: instance.spec.affinity.clone(),
                    service_account_name: instance.spec.service_account_name.clone(),
                    ..PodSpec::default()
                }),
            },
            ..DeploymentSpec::default()
        }),
        ..Deployment::default()
    }
}

fn scrape_annotations(port: i32) -> std::collections::BTreeMap<String, String> {
    std::collections::BTreeMap::from([
        ("prometheus.io/scrape".to_string(), "true".to_string()),
        ("prometheus.io/port".to_string(), port.to_string()),
    ])
}

fn render_init_container(instance_name: &str) -> Container {
    Container {
        name: "render-config".to_string(),
        image: Some(INIT_IMAGE.to_string()),
        command: Some(vec!["sh".to_string(), "-c".to_string(), RENDER_SCRIPT.to_string()]),
        env_from: Some(vec![EnvFromSource {
            secret_ref: Some(SecretEnvSource {
                name: secret::name(instance_name),
                optional: Some(false),
            }),
            ..EnvFromSource::default()
        }]),
        env: Some(vec![
            k8s_openapi::api::core::v1::EnvVar {
                name: "TEMPLATE_PATH".to_string(),
                value: Some(TEMPLATE_PATH.to_string()),
                ..Default::default()
            },
            k8s_openapi::api::core::v1::EnvVar {
                name: "TEMPLATE_FILE".to_string(),
                value: Some(CONFIG_KEY.to_string()),
                ..Default::default()
            },
            k8s_openapi::api::core::v1::EnvVar {
                name: "RENDERED_PATH".to_string(),
                value: Some(RENDERED_PATH.to_string()),
                ..Default::default()
            },
            k8s_openapi::api::core::v1::EnvVar {
                name: "RENDERED_FILE".to_string(),
                value: Some(RENDERED_FILE.to_string()),
                ..Default::default()
            },
        ]),
        volume_mounts: Some(vec![
            VolumeMount {
                name: TEMPLATE_VOLUME.to_string(),
                mount_path: TEMPLATE_PATH.to_string(),
                read_only: Some(true),
                ..VolumeMount::default()
            },
            VolumeMount {
                name: RENDERED_VOLUME.to_string(),
                mount_path: RENDERED_PATH.to_string(),
                ..VolumeMount::default()
            },
        ]),
        ..Container::default()
    }
}

fn main_container(instance: &DBHubInstance, port: i32, transport: Transport) -> Container {
    let config_path = format!("{RENDERED_PATH}/{RENDERED_FILE}");
    let probe = |initial_delay, period, timeout| Probe {
        http_get: Some(HTTPGetAction {
            path: Some("/health".to_string()),
            port: IntOrString::Int(port),
            ..HTTPGetAction::default()
        }),
        initial_delay_seconds: Some(initial_delay),
        period_seconds: Some(period),
        timeout_seconds: Some(timeout),
        failure_threshold: Some(3),
        ..Probe::default()
    };

    Container {
        name: MAIN_CONTAINER_NAME.to_string(),
        image: Some(instance.spec.image.clone().unwrap_or_else(|| DEFAULT_IMAGE.to_string())),
        image_pull_policy: instance.spec.image_pull_policy.clone(),
        args: Some(vec![
            "--transport".to_string(),
            transport.as_str().to_string(),
            "--port".to_string(),
            port.to_string(),
            "--config".to_string(),
            config_path,
        ]),
        ports: Some(vec![ContainerPort {
            container_port: port,
            ..ContainerPort::default()
        }]),
        volume_mounts: Some(vec![VolumeMount {
            name: RENDERED_VOLUME.to_string(),
            mount_path: RENDERED_PATH.to_string(),
            read_only: Some(true),
            ..VolumeMount::default()
        }]),
        resources: instance.spec.resources.clone(),
        liveness_probe: Some(probe(10, 30, 5)),
        readiness_probe: Some(probe(5, 10, 3)),
        ..Container::default()
    }
}

fn template_volume(instance_name: &str) -> Volume {
    Volume {
        name: TEMPLATE_VOLUME.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: configmap::name(instance_name),
            ..ConfigMapVolumeSource::default()
        }),
        ..Volume::default()
    }
}

fn rendered_volume() -> Volume {
    Volume {
        name: RENDERED_VOLUME.to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Volume::default()
    }
}
