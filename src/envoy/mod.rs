//! Envoy configuration generation
//!
//! Renders the three files a proxy loads from its ConfigMap:
//!
//! - `bootstrap.json` - node identity, admin listener, and the paths of the two
//!   dynamic documents below
//! - `cds.json` - one LOGICAL_DNS cluster per routable tunnel
//! - `lds.json` - one TCP proxy listener per routable tunnel, bound to the
//!   tunnel's transit port
//!
//! Output is a pure function of the proxy name and the tunnel set. Tunnels are
//! sorted by identity and every entry is named after its tunnel, so the same
//! set always renders byte-identical documents and one tunnel changing never
//! touches another tunnel's entries.

mod resources;

use std::collections::BTreeMap;

use kube::ResourceExt;
use serde::Serialize;

use crate::crd::Tunnel;
use crate::{proxy_resource_name, Result, ENVOY_ADMIN_PORT, ENVOY_CONFIG_DIR};
use resources::{
    Address, Admin, Bootstrap, Cluster, ConfigSource, DiscoveryDocument, DynamicResources,
    Endpoint, Filter, FilterChain, LbEndpoint, Listener, LoadAssignment, LocalityLbEndpoints,
    Node, TcpProxy, CLUSTER_TYPE, LISTENER_TYPE, TCP_PROXY_FILTER, TCP_PROXY_TYPE,
};

/// ConfigMap key of the bootstrap document
pub const BOOTSTRAP_KEY: &str = "bootstrap.json";

/// ConfigMap key of the cluster document
pub const CLUSTERS_KEY: &str = "cds.json";

/// ConfigMap key of the listener document
pub const LISTENERS_KEY: &str = "lds.json";

const CONNECT_TIMEOUT: &str = "30s";
const STAT_PREFIX: &str = "destination";
const BIND_ADDRESS: &str = "0.0.0.0";

/// Rendered configuration documents for one proxy
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnvoyConfig {
    /// Bootstrap document
    pub bootstrap: String,
    /// Cluster discovery document
    pub clusters: String,
    /// Listener discovery document
    pub listeners: String,
    /// Number of tunnels rendered
    pub routes: usize,
}

impl EnvoyConfig {
    /// ConfigMap data keyed by file name
    pub fn into_data(self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (BOOTSTRAP_KEY.to_string(), self.bootstrap),
            (CLUSTERS_KEY.to_string(), self.clusters),
            (LISTENERS_KEY.to_string(), self.listeners),
        ])
    }
}

/// Render the configuration for `proxy` from its tunnels
///
/// Tunnels without a transit port are not routable yet and are left out.
/// Input order does not matter. Fails only if encoding fails.
pub fn generate(proxy: &str, tunnels: &[Tunnel]) -> Result<EnvoyConfig> {
    let mut routable: Vec<(&Tunnel, u16)> = tunnels
        .iter()
        .filter_map(|t| t.transit_port().map(|port| (t, port)))
        .collect();
    routable.sort_by_key(|(t, _)| t.identity());

    let clusters = DiscoveryDocument {
        resources: routable.iter().map(|(t, _)| cluster(t)).collect(),
    };
    let listeners = DiscoveryDocument {
        resources: routable
            .iter()
            .map(|(t, port)| listener(t, *port))
            .collect(),
    };

    Ok(EnvoyConfig {
        bootstrap: render(&bootstrap(proxy))?,
        clusters: render(&clusters)?,
        listeners: render(&listeners)?,
        routes: routable.len(),
    })
}

fn render<T: Serialize>(document: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(document)?)
}

fn bootstrap(proxy: &str) -> Bootstrap {
    let node = proxy_resource_name(proxy);
    Bootstrap {
        node: Node {
            cluster: node.clone(),
            id: node,
        },
        admin: Admin {
            address: Address::tcp(BIND_ADDRESS, ENVOY_ADMIN_PORT),
        },
        dynamic_resources: DynamicResources {
            cds_config: ConfigSource::watched_file(
                format!("{ENVOY_CONFIG_DIR}/{CLUSTERS_KEY}"),
                ENVOY_CONFIG_DIR,
            ),
            lds_config: ConfigSource::watched_file(
                format!("{ENVOY_CONFIG_DIR}/{LISTENERS_KEY}"),
                ENVOY_CONFIG_DIR,
            ),
        },
    }
}

fn cluster(tunnel: &Tunnel) -> Cluster {
    let name = tunnel.name_any();
    Cluster {
        type_url: CLUSTER_TYPE.to_string(),
        name: name.clone(),
        connect_timeout: CONNECT_TIMEOUT.to_string(),
        discovery_type: "LOGICAL_DNS".to_string(),
        dns_lookup_family: "V4_ONLY".to_string(),
        load_assignment: LoadAssignment {
            cluster_name: name,
            endpoints: vec![LocalityLbEndpoints {
                lb_endpoints: vec![LbEndpoint {
                    endpoint: Endpoint {
                        address: Address::tcp(tunnel.spec.host.clone(), tunnel.spec.port),
                    },
                }],
            }],
        },
    }
}

fn listener(tunnel: &Tunnel, transit_port: u16) -> Listener {
    let name = tunnel.name_any();
    Listener {
        type_url: LISTENER_TYPE.to_string(),
        name: name.clone(),
        address: Address::tcp(BIND_ADDRESS, transit_port),
        filter_chains: vec![FilterChain {
            filters: vec![Filter {
                name: TCP_PROXY_FILTER.to_string(),
                typed_config: TcpProxy {
                    type_url: TCP_PROXY_TYPE.to_string(),
                    stat_prefix: STAT_PREFIX.to_string(),
                    cluster: name,
                },
            }],
        }],
    }
}
