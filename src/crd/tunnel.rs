//! Tunnel Custom Resource Definition
//!
//! A Tunnel routes traffic arriving at its own Service to a destination
//! `host:port` through a shared Proxy in the same namespace.

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, TunnelReason};

/// Specification for a Tunnel
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "tunnels.dev",
    version = "v1",
    kind = "Tunnel",
    plural = "tunnels",
    shortname = "tun",
    status = "TunnelStatus",
    namespaced,
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Reason","type":"string","jsonPath":".status.reason"}"#,
    printcolumn = r#"{"name":"Host","type":"string","jsonPath":".spec.host"}"#,
    printcolumn = r#"{"name":"Port","type":"integer","jsonPath":".spec.port"}"#,
    printcolumn = r#"{"name":"Proxy","type":"string","jsonPath":".spec.proxy.name"}"#,
    printcolumn = r#"{"name":"TransitPort","type":"integer","jsonPath":".status.transitPort"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TunnelSpec {
    /// Destination host name or address
    #[schemars(length(min = 1))]
    pub host: String,

    /// Destination port, also the port the tunnel's Service listens on
    #[schemars(range(min = 1))]
    pub port: u16,

    /// Proxy that forwards this tunnel's traffic
    pub proxy: ProxyReference,
}

/// Reference to a Proxy in the tunnel's namespace
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct ProxyReference {
    /// Name of the Proxy
    pub name: String,
}

impl TunnelSpec {
    /// Validate the tunnel specification
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.host.trim().is_empty() {
            return Err(crate::Error::validation("host must not be empty"));
        }
        if self.port == 0 {
            return Err(crate::Error::validation("port must be between 1 and 65535"));
        }
        if self.proxy.name.is_empty() {
            return Err(crate::Error::validation("proxy.name must not be empty"));
        }
        Ok(())
    }
}

/// Status for a Tunnel
///
/// `transitPort` is owned by the proxy controller. The remaining fields are
/// owned by the tunnel controller.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TunnelStatus {
    /// Port the proxy listens on for this tunnel, unique within the proxy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transit_port: Option<u16>,

    /// Whether traffic to the tunnel's Service reaches the destination
    #[serde(default)]
    pub ready: bool,

    /// Why the tunnel is or is not ready
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<TunnelReason>,

    /// Human-readable detail for the reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Conditions representing the tunnel state
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl Tunnel {
    /// Transit port currently recorded in status
    pub fn transit_port(&self) -> Option<u16> {
        self.status.as_ref().and_then(|s| s.transit_port)
    }

    /// Set or clear the transit port, leaving the other status fields intact
    pub fn set_transit_port(&mut self, port: Option<u16>) {
        self.status.get_or_insert_with(Default::default).transit_port = port;
    }

    /// Name of the referenced Proxy
    pub fn proxy_name(&self) -> &str {
        &self.spec.proxy.name
    }

    /// Whether this tunnel has been marked for deletion
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Stable identity used for ordering: `(namespace, name)`
    pub fn identity(&self) -> (String, String) {
        (self.namespace().unwrap_or_default(), self.name_any())
    }
}
