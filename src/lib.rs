//! Tunnel operator - routes in-cluster traffic to private destinations through shared proxies
//!
//! A `Tunnel` declares a destination `host:port` and names a shared `Proxy`.
//! The operator gives every tunnel a transit port that is unique within its
//! proxy, renders the proxy's Envoy configuration from the current tunnel set,
//! and exposes each routable tunnel through its own Service.
//!
//! # Modules
//!
//! - [`crd`] - Custom Resource Definitions (Tunnel, Proxy)
//! - [`transit`] - Transit port allocation within a proxy's port space
//! - [`envoy`] - Deterministic Envoy bootstrap/cluster/listener generation
//! - [`workload`] - ConfigMap, Deployment and Service builders for a proxy
//! - [`store`] - Conditional write outcomes against the API server
//! - [`controller`] - Proxy and Tunnel reconciliation
//! - [`controller_runner`] - Controller wiring and watch mappers
//! - [`events`] - Kubernetes Event publishing
//! - [`config`] - Operator configuration
//! - [`retry`] - Backoff for startup plumbing
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod config;
pub mod controller;
pub mod controller_runner;
pub mod crd;
pub mod envoy;
pub mod error;
pub mod events;
pub mod retry;
pub mod store;
pub mod transit;
pub mod workload;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Default Configuration Constants
// =============================================================================

/// API group shared by the Tunnel and Proxy CRDs
pub const API_GROUP: &str = "tunnels.dev";

/// Field manager used for server-side apply and status writes
pub const FIELD_MANAGER: &str = "tunnel-operator";

/// Pod label selecting a proxy's workload, value is the Proxy name
pub const PROXY_LABEL: &str = "tunnels.dev/proxy";

/// Prefix for every resource generated for a Proxy
pub const PROXY_RESOURCE_PREFIX: &str = "tunnel-proxy-";

/// Default Envoy image when neither the Proxy nor the operator override it
pub const DEFAULT_ENVOY_IMAGE: &str = "envoyproxy/envoy:v1.26.2";

/// Envoy admin port, also serves the readiness endpoint
pub const ENVOY_ADMIN_PORT: u16 = 9901;

/// Directory the generated configuration is mounted at inside the proxy
pub const ENVOY_CONFIG_DIR: &str = "/etc/envoy";

/// Name of the generated ConfigMap and Deployment for a proxy
pub fn proxy_resource_name(proxy: &str) -> String {
    format!("{PROXY_RESOURCE_PREFIX}{proxy}")
}
