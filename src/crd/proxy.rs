//! Proxy Custom Resource Definition
//!
//! A Proxy is a shared Envoy workload that fronts every Tunnel naming it.
//! The template fields are passed straight through to the generated Deployment.

use k8s_openapi::api::core::v1::{LocalObjectReference, ResourceRequirements};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::Condition;

/// Specification for a Proxy
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "tunnels.dev",
    version = "v1",
    kind = "Proxy",
    plural = "proxies",
    shortname = "px",
    status = "ProxyStatus",
    namespaced,
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Tunnels","type":"integer","jsonPath":".status.tunnels"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ProxySpec {
    /// Desired number of proxy replicas (defaults to 1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Pod overrides for the proxy workload
    #[serde(default)]
    pub template: ProxyTemplate,
}

/// Pod overrides for the proxy workload
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProxyTemplate {
    /// Envoy container overrides
    #[serde(default)]
    pub envoy: EnvoyOverrides,

    /// Pull secrets for the Envoy image
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<LocalObjectReference>,
}

/// Envoy container overrides
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnvoyOverrides {
    /// Envoy image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Compute resources for the Envoy container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
}

impl ProxySpec {
    /// Desired replica count with the default applied
    pub fn desired_replicas(&self) -> i32 {
        self.replicas.unwrap_or(1)
    }
}

impl Proxy {
    /// Whether the last pass found no free transit port for `tunnel`
    pub fn reports_exhausted(&self, tunnel: &str) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| s.exhausted.iter().any(|t| t == tunnel))
    }

    /// Whether this proxy has been marked for deletion
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}

/// Status for a Proxy
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProxyStatus {
    /// Whether every desired replica is ready
    #[serde(default)]
    pub ready: bool,

    /// Replicas reported by the proxy workload
    #[serde(default)]
    pub replicas: i32,

    /// Ready replicas reported by the proxy workload
    #[serde(default)]
    pub ready_replicas: i32,

    /// Number of tunnels present in the generated configuration
    #[serde(default)]
    pub tunnels: u32,

    /// Tunnels left without a transit port because the range is full
    ///
    /// Always serialized, so a merge patch clears entries once allocated.
    #[serde(default)]
    pub exhausted: Vec<String>,

    /// Generation of the Proxy last reconciled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Conditions representing the proxy state
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl ProxyStatus {
    /// Project readiness from observed and desired replica counts
    pub fn from_replicas(desired: i32, replicas: i32, ready_replicas: i32) -> Self {
        Self {
            ready: ready_replicas >= desired,
            replicas,
            ready_replicas,
            ..Default::default()
        }
    }

    /// Set the routable tunnel count and return self for chaining
    pub fn tunnels(mut self, count: u32) -> Self {
        self.tunnels = count;
        self
    }

    /// Set the tunnels awaiting a free port and return self for chaining
    pub fn exhausted(mut self, mut tunnels: Vec<String>) -> Self {
        tunnels.sort();
        self.exhausted = tunnels;
        self
    }

    /// Set the observed generation and return self for chaining
    pub fn observed_generation(mut self, generation: Option<i64>) -> Self {
        self.observed_generation = generation;
        self
    }

    /// Add a condition and return self for chaining
    pub fn condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }
}
