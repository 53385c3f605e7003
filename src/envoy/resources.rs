//! Envoy v3 configuration shapes
//!
//! Only the fields the proxy uses are modelled. Field names follow Envoy's
//! JSON mapping so the documents load directly as file-based xDS sources.

use serde::{Deserialize, Serialize};

/// Type URL of a cluster resource
pub const CLUSTER_TYPE: &str = "type.googleapis.com/envoy.config.cluster.v3.Cluster";

/// Type URL of a listener resource
pub const LISTENER_TYPE: &str = "type.googleapis.com/envoy.config.listener.v3.Listener";

/// Type URL of the TCP proxy network filter config
pub const TCP_PROXY_TYPE: &str =
    "type.googleapis.com/envoy.extensions.filters.network.tcp_proxy.v3.TcpProxy";

/// Name of the TCP proxy network filter
pub const TCP_PROXY_FILTER: &str = "envoy.filters.network.tcp_proxy";

/// Bootstrap document pointing Envoy at the cluster and listener files
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Bootstrap {
    pub node: Node,
    pub admin: Admin,
    pub dynamic_resources: DynamicResources,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub cluster: String,
    pub id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Admin {
    pub address: Address,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DynamicResources {
    pub cds_config: ConfigSource,
    pub lds_config: ConfigSource,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ConfigSource {
    pub resource_api_version: String,
    pub path_config_source: PathConfigSource,
}

impl ConfigSource {
    /// File source watched for changes in `dir`
    pub fn watched_file(path: String, dir: &str) -> Self {
        Self {
            resource_api_version: "V3".to_string(),
            path_config_source: PathConfigSource {
                path,
                watched_directory: WatchedDirectory {
                    path: dir.to_string(),
                },
            },
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PathConfigSource {
    pub path: String,
    pub watched_directory: WatchedDirectory,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WatchedDirectory {
    pub path: String,
}

/// File-based discovery response: `{"resources": [...]}`
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DiscoveryDocument<T> {
    pub resources: Vec<T>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Address {
    pub socket_address: SocketAddress,
}

impl Address {
    /// TCP socket address
    pub fn tcp(address: impl Into<String>, port: u16) -> Self {
        Self {
            socket_address: SocketAddress {
                address: address.into(),
                port_value: u32::from(port),
            },
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SocketAddress {
    pub address: String,
    pub port_value: u32,
}

/// Upstream cluster resolving one destination through DNS
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Cluster {
    #[serde(rename = "@type")]
    pub type_url: String,
    pub name: String,
    pub connect_timeout: String,
    #[serde(rename = "type")]
    pub discovery_type: String,
    pub dns_lookup_family: String,
    pub load_assignment: LoadAssignment,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LoadAssignment {
    pub cluster_name: String,
    pub endpoints: Vec<LocalityLbEndpoints>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LocalityLbEndpoints {
    pub lb_endpoints: Vec<LbEndpoint>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LbEndpoint {
    pub endpoint: Endpoint,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Endpoint {
    pub address: Address,
}

/// Listener forwarding a port to a cluster over TCP
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Listener {
    #[serde(rename = "@type")]
    pub type_url: String,
    pub name: String,
    pub address: Address,
    pub filter_chains: Vec<FilterChain>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FilterChain {
    pub filters: Vec<Filter>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Filter {
    pub name: String,
    pub typed_config: TcpProxy,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TcpProxy {
    #[serde(rename = "@type")]
    pub type_url: String,
    pub stat_prefix: String,
    pub cluster: String,
}
