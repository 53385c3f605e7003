//! Kubernetes resources generated for proxies and tunnels
//!
//! - ConfigMap: the rendered Envoy configuration, one per Proxy
//! - Deployment: the Envoy workload, one per Proxy
//! - Service: the forwarding endpoint, one per routable Tunnel
//!
//! Builders are pure. Each resource carries a controller owner reference to
//! the object it was generated for, so deleting a Proxy or Tunnel garbage
//! collects what was built for it.

mod configmap;
mod deployment;
mod service;

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::Resource;

pub use configmap::compile_config_map;
pub use deployment::{compile_deployment, DeploymentDefaults};
pub(crate) use deployment::observed_replicas;
pub use service::{compile_service, SERVICE_PORT_NAME};

use crate::{Error, Result, PROXY_LABEL};

/// Labels selecting a proxy's pods
pub fn proxy_selector(proxy: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(PROXY_LABEL.to_string(), proxy.to_string())])
}

/// Metadata for a resource owned by `owner`, with standard labels
pub(crate) fn owned_metadata<K>(owner: &K, name: &str, component: &str) -> Result<ObjectMeta>
where
    K: Resource<DynamicType = ()>,
{
    let namespace = owner
        .meta()
        .namespace
        .clone()
        .ok_or_else(|| Error::missing_field("metadata.namespace"))?;
    let owner_ref: OwnerReference = owner
        .controller_owner_ref(&())
        .ok_or_else(|| Error::missing_field("metadata.uid"))?;

    Ok(ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace),
        labels: Some(BTreeMap::from([
            ("app.kubernetes.io/name".to_string(), name.to_string()),
            ("app.kubernetes.io/component".to_string(), component.to_string()),
            (
                "app.kubernetes.io/managed-by".to_string(),
                crate::FIELD_MANAGER.to_string(),
            ),
        ])),
        owner_references: Some(vec![owner_ref]),
        ..Default::default()
    })
}
