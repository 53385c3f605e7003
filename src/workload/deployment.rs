//! Envoy Deployment for a proxy

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, HTTPGetAction, PodSpec, PodTemplateSpec,
    Probe, ResourceRequirements, SecurityContext, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::{owned_metadata, proxy_selector};
use crate::crd::Proxy;
use crate::envoy::BOOTSTRAP_KEY;
use crate::{proxy_resource_name, Result, DEFAULT_ENVOY_IMAGE, ENVOY_ADMIN_PORT, ENVOY_CONFIG_DIR};

const CONTAINER_NAME: &str = "envoy";
const CONFIG_VOLUME: &str = "envoy-config";
const ADMIN_PORT_NAME: &str = "admin";

/// Operator-wide defaults, overridden per Proxy
#[derive(Clone, Debug, PartialEq)]
pub struct DeploymentDefaults {
    /// Envoy image used when the Proxy does not set one
    pub image: String,
}

impl Default for DeploymentDefaults {
    fn default() -> Self {
        Self {
            image: DEFAULT_ENVOY_IMAGE.to_string(),
        }
    }
}

/// Build the Deployment running Envoy for `proxy`
pub fn compile_deployment(proxy: &Proxy, defaults: &DeploymentDefaults) -> Result<Deployment> {
    let proxy_name = proxy.metadata.name.clone().unwrap_or_default();
    let name = proxy_resource_name(&proxy_name);
    let labels = proxy_selector(&proxy_name);
    let envoy = &proxy.spec.template.envoy;

    let container = Container {
        name: CONTAINER_NAME.to_string(),
        image: Some(envoy.image.clone().unwrap_or_else(|| defaults.image.clone())),
        args: Some(vec![
            "-c".to_string(),
            format!("{ENVOY_CONFIG_DIR}/{BOOTSTRAP_KEY}"),
        ]),
        ports: Some(vec![ContainerPort {
            name: Some(ADMIN_PORT_NAME.to_string()),
            container_port: i32::from(ENVOY_ADMIN_PORT),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        resources: Some(
            envoy
                .resources
                .clone()
                .unwrap_or_else(default_resources),
        ),
        readiness_probe: Some(readiness_probe()),
        security_context: Some(SecurityContext {
            allow_privilege_escalation: Some(false),
            ..Default::default()
        }),
        volume_mounts: Some(vec![VolumeMount {
            name: CONFIG_VOLUME.to_string(),
            mount_path: ENVOY_CONFIG_DIR.to_string(),
            read_only: Some(true),
            ..Default::default()
        }]),
        ..Default::default()
    };

    let pull_secrets = &proxy.spec.template.image_pull_secrets;

    Ok(Deployment {
        metadata: owned_metadata(proxy, &name, "proxy")?,
        spec: Some(DeploymentSpec {
            replicas: Some(proxy.spec.desired_replicas()),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    volumes: Some(vec![Volume {
                        name: CONFIG_VOLUME.to_string(),
                        config_map: Some(ConfigMapVolumeSource {
                            name: name.clone(),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }]),
                    image_pull_secrets: (!pull_secrets.is_empty()).then(|| pull_secrets.clone()),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

fn default_resources() -> ResourceRequirements {
    ResourceRequirements {
        requests: Some(BTreeMap::from([
            ("cpu".to_string(), Quantity("10m".to_string())),
            ("memory".to_string(), Quantity("64Mi".to_string())),
        ])),
        limits: Some(BTreeMap::from([(
            "memory".to_string(),
            Quantity("64Mi".to_string()),
        )])),
        ..Default::default()
    }
}

fn readiness_probe() -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some("/ready".to_string()),
            port: IntOrString::String(ADMIN_PORT_NAME.to_string()),
            scheme: Some("HTTP".to_string()),
            ..Default::default()
        }),
        initial_delay_seconds: Some(1),
        timeout_seconds: Some(1),
        period_seconds: Some(5),
        success_threshold: Some(1),
        failure_threshold: Some(3),
        ..Default::default()
    }
}

/// Observed `(replicas, readyReplicas)` of a Deployment
pub(crate) fn observed_replicas(deployment: &Deployment) -> (i32, i32) {
    deployment
        .status
        .as_ref()
        .map(|s| (s.replicas.unwrap_or(0), s.ready_replicas.unwrap_or(0)))
        .unwrap_or((0, 0))
}
