//! Controller runner - builds the controller futures
//!
//! Each `build_*` function returns a future that runs one controller until
//! shutdown. The watch mappers are plain functions so they can be tested
//! without an API server.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Client, ResourceExt};

use crate::config::OperatorConfig;
use crate::controller::{proxy, tunnel, ProxyContext, TunnelContext};
use crate::crd::{Proxy, Tunnel};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
///
/// The API server closes idle watches before the client times out.
const WATCH_TIMEOUT_SECS: u32 = 25;

/// A controller future, run until the process receives a shutdown signal
pub type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

fn watcher_config() -> WatcherConfig {
    WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS)
}

/// Build the Proxy controller
///
/// Runs for Proxy changes, for changes to the ConfigMap and Deployment it
/// owns, and for any Tunnel that names it.
pub fn build_proxy_controller(client: Client, config: &OperatorConfig) -> ControllerFuture {
    let ctx = Arc::new(ProxyContext::new(client.clone(), config.clone()));

    tracing::info!("- Proxy controller");

    Box::pin(
        Controller::new(config.api::<Proxy>(client.clone()), watcher_config())
            .owns(config.api::<ConfigMap>(client.clone()), watcher_config())
            .owns(config.api::<Deployment>(client.clone()), watcher_config())
            .watches(config.api::<Tunnel>(client), watcher_config(), |t| {
                tunnel_to_proxy(&t)
            })
            .shutdown_on_signal()
            .run(proxy::reconcile, proxy::error_policy, ctx)
            .for_each(log_reconcile_result("Proxy")),
    )
}

/// Build the Tunnel controller
///
/// Runs for Tunnel changes (including transit port assignment), for changes
/// to the Service it owns, and for every tunnel naming a Proxy that changed.
pub fn build_tunnel_controller(client: Client, config: &OperatorConfig) -> ControllerFuture {
    let ctx = Arc::new(TunnelContext::new(client.clone(), config.clone()));

    tracing::info!("- Tunnel controller");

    let controller = Controller::new(config.api::<Tunnel>(client.clone()), watcher_config());
    let tunnels = controller.store();

    Box::pin(
        controller
            .owns(config.api::<Service>(client.clone()), watcher_config())
            .watches(config.api::<Proxy>(client), watcher_config(), move |p| {
                tunnels_for_proxy(&tunnels.state(), &p)
            })
            .shutdown_on_signal()
            .run(tunnel::reconcile, tunnel::error_policy, ctx)
            .for_each(log_reconcile_result("Tunnel")),
    )
}

/// The Proxy a Tunnel names, in the tunnel's namespace
pub fn tunnel_to_proxy(tunnel: &Tunnel) -> Option<ObjectRef<Proxy>> {
    let namespace = tunnel.namespace()?;
    let proxy = tunnel.proxy_name();
    if proxy.is_empty() {
        return None;
    }
    Some(ObjectRef::new(proxy).within(&namespace))
}

/// Cached tunnels that name `proxy`
pub fn tunnels_for_proxy(tunnels: &[Arc<Tunnel>], proxy: &Proxy) -> Vec<ObjectRef<Tunnel>> {
    let Some(namespace) = proxy.namespace() else {
        return Vec::new();
    };
    let name = proxy.name_any();
    tunnels
        .iter()
        .filter(|t| t.namespace().as_deref() == Some(namespace.as_str()))
        .filter(|t| t.proxy_name() == name)
        .map(|t| ObjectRef::from_obj(t.as_ref()))
        .collect()
}

/// Log reconciliation results, used with `for_each` on controller streams
fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
