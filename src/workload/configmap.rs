//! ConfigMap carrying a proxy's Envoy configuration

use k8s_openapi::api::core::v1::ConfigMap;

use super::owned_metadata;
use crate::crd::Proxy;
use crate::envoy::EnvoyConfig;
use crate::{proxy_resource_name, Result};

/// Build the ConfigMap mounted into the proxy at `/etc/envoy`
pub fn compile_config_map(proxy: &Proxy, config: EnvoyConfig) -> Result<ConfigMap> {
    let name = proxy_resource_name(&proxy_name(proxy));
    Ok(ConfigMap {
        metadata: owned_metadata(proxy, &name, "proxy-config")?,
        data: Some(config.into_data()),
        ..Default::default()
    })
}

fn proxy_name(proxy: &Proxy) -> String {
    proxy.metadata.name.clone().unwrap_or_default()
}
