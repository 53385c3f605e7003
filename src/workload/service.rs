//! Per-tunnel Service forwarding to the proxy's transit port

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;

use super::{owned_metadata, proxy_selector};
use crate::crd::Tunnel;
use crate::Result;

/// Name of the single port on a tunnel Service
pub const SERVICE_PORT_NAME: &str = "proxy";

/// Build the Service exposing `tunnel` on its declared port
///
/// Traffic is sent to the proxy pods on `transit_port`.
pub fn compile_service(tunnel: &Tunnel, transit_port: u16) -> Result<Service> {
    Ok(Service {
        metadata: owned_metadata(tunnel, &tunnel.name_any(), "tunnel")?,
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(proxy_selector(tunnel.proxy_name())),
            ports: Some(vec![ServicePort {
                name: Some(SERVICE_PORT_NAME.to_string()),
                protocol: Some("TCP".to_string()),
                port: i32::from(tunnel.spec.port),
                target_port: Some(IntOrString::Int(i32::from(transit_port))),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    })
}
