//! Proxy controller
//!
//! One pass per Proxy change, or per change to a Tunnel naming it:
//!
//! 1. Load the tunnels that reference the proxy.
//! 2. Allocate transit ports and persist each change conditionally. Losing a
//!    write race ends the pass; the winning write's watch event starts the next.
//! 3. Render the Envoy configuration and write it to the proxy's ConfigMap.
//! 4. Apply the proxy Deployment and project its replica counts into status.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use crate::config::OperatorConfig;
use crate::crd::{Condition, ConditionStatus, Proxy, ProxyStatus, Tunnel};
use crate::events::{actions, reasons, EventPublisher, KubeEventPublisher};
use crate::store::{self, WriteOutcome};
use crate::transit::{PortAllocator, PortRange};
use crate::workload::{compile_config_map, compile_deployment, observed_replicas};
use crate::{envoy, Error};

/// Kubernetes operations needed by the proxy controller
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ProxyKube: Send + Sync {
    /// List the tunnels in `namespace` that reference `proxy`
    async fn list_tunnels(&self, namespace: &str, proxy: &str) -> Result<Vec<Tunnel>, Error>;

    /// Persist a tunnel's transit port, conditional on its resourceVersion
    async fn write_transit_port(&self, tunnel: &Tunnel) -> Result<WriteOutcome, Error>;

    /// Create or update the proxy's ConfigMap
    async fn write_config_map(&self, config_map: &ConfigMap) -> Result<WriteOutcome, Error>;

    /// Server-side apply the proxy Deployment, returning the stored object
    async fn apply_deployment(&self, deployment: &Deployment) -> Result<Deployment, Error>;

    /// Patch the status of a Proxy
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ProxyStatus,
    ) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct ProxyKubeImpl {
    client: Client,
}

impl ProxyKubeImpl {
    /// Create a new ProxyKubeImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn namespace_of<K: Resource>(obj: &K) -> Result<String, Error> {
        obj.meta()
            .namespace
            .clone()
            .ok_or_else(|| Error::missing_field("metadata.namespace"))
    }
}

#[async_trait]
impl ProxyKube for ProxyKubeImpl {
    async fn list_tunnels(&self, namespace: &str, proxy: &str) -> Result<Vec<Tunnel>, Error> {
        let api: Api<Tunnel> = Api::namespaced(self.client.clone(), namespace);
        let tunnels = api.list(&ListParams::default()).await?;
        Ok(tunnels
            .items
            .into_iter()
            .filter(|t| t.proxy_name() == proxy)
            .collect())
    }

    async fn write_transit_port(&self, tunnel: &Tunnel) -> Result<WriteOutcome, Error> {
        let api: Api<Tunnel> = Api::namespaced(self.client.clone(), &Self::namespace_of(tunnel)?);
        store::write_transit_port(&api, tunnel).await
    }

    async fn write_config_map(&self, config_map: &ConfigMap) -> Result<WriteOutcome, Error> {
        let api: Api<ConfigMap> =
            Api::namespaced(self.client.clone(), &Self::namespace_of(config_map)?);
        store::write_config_map(&api, config_map).await
    }

    async fn apply_deployment(&self, deployment: &Deployment) -> Result<Deployment, Error> {
        let api: Api<Deployment> =
            Api::namespaced(self.client.clone(), &Self::namespace_of(deployment)?);
        let applied = api
            .patch(
                &deployment.name_any(),
                &store::apply_params(),
                &Patch::Apply(deployment),
            )
            .await?;
        Ok(applied)
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ProxyStatus,
    ) -> Result<(), Error> {
        let api: Api<Proxy> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({ "status": status });
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

/// Controller context for Proxy reconciliation
pub struct ProxyContext {
    /// Kubernetes operations (trait object for testability)
    pub kube: Arc<dyn ProxyKube>,
    /// Event publisher
    pub events: Arc<dyn EventPublisher>,
    /// Operator configuration
    pub config: OperatorConfig,
    /// Transit port range
    pub port_range: PortRange,
}

impl ProxyContext {
    /// Create a context backed by the given client
    pub fn new(client: Client, config: OperatorConfig) -> Self {
        Self {
            kube: Arc::new(ProxyKubeImpl::new(client.clone())),
            events: Arc::new(KubeEventPublisher::new(client, "tunnel-proxy-controller")),
            config,
            port_range: PortRange::default(),
        }
    }

    /// Create a context for testing with mock clients
    #[cfg(test)]
    pub fn for_testing(
        kube: Arc<dyn ProxyKube>,
        events: Arc<dyn EventPublisher>,
        port_range: PortRange,
    ) -> Self {
        Self {
            kube,
            events,
            config: OperatorConfig::default(),
            port_range,
        }
    }
}

/// Reconcile a Proxy
#[instrument(skip(proxy, ctx), fields(proxy = %proxy.name_any()))]
pub async fn reconcile(proxy: Arc<Proxy>, ctx: Arc<ProxyContext>) -> Result<Action, Error> {
    if proxy.is_deleting() {
        debug!("proxy is being deleted, owned resources are garbage collected");
        return Ok(Action::await_change());
    }
    let name = proxy.name_any();
    let namespace = proxy
        .namespace()
        .ok_or_else(|| Error::missing_field("metadata.namespace"))?;
    info!("reconciling proxy");

    let mut tunnels = load_tunnels(&ctx, &namespace, &name).await?;

    let allocation = PortAllocator::random(ctx.port_range).allocate(&tunnels);
    for tunnel in &allocation.exhausted {
        if proxy.reports_exhausted(tunnel) {
            debug!(tunnel = %tunnel, "still no free transit port");
            continue;
        }
        warn!(tunnel = %tunnel, "no free transit port");
        if let Some(t) = tunnels.iter().find(|t| t.name_any() == *tunnel) {
            ctx.events
                .publish(
                    &t.object_ref(&()),
                    EventType::Warning,
                    reasons::ALLOCATION_EXHAUSTED,
                    actions::ALLOCATE,
                    Some(format!(
                        "no free transit port on proxy {name} in {}..{}",
                        ctx.port_range.start(),
                        ctx.port_range.end()
                    )),
                )
                .await;
        }
    }

    for tunnel in allocation.apply(&mut tunnels) {
        let port = tunnel.transit_port();
        match ctx.kube.write_transit_port(&tunnel).await? {
            WriteOutcome::Conflict => {
                info!(tunnel = %tunnel.name_any(), "tunnel changed concurrently, waiting for redelivery");
                return Ok(Action::await_change());
            }
            WriteOutcome::Written | WriteOutcome::Unchanged => {
                info!(tunnel = %tunnel.name_any(), transit_port = ?port, "recorded transit port");
            }
        }
        if let Some(port) = port {
            ctx.events
                .publish(
                    &tunnel.object_ref(&()),
                    EventType::Normal,
                    reasons::TRANSIT_PORT_ALLOCATED,
                    actions::ALLOCATE,
                    Some(format!("transit port {port} on proxy {name}")),
                )
                .await;
        }
    }

    let routable: Vec<Tunnel> = tunnels
        .into_iter()
        .filter(|t| t.spec.validate().is_ok())
        .collect();
    let config = envoy::generate(&name, &routable)?;
    let routes = config.routes;
    let config_map = compile_config_map(&proxy, config)?;
    match ctx.kube.write_config_map(&config_map).await? {
        WriteOutcome::Conflict => {
            info!("config map changed concurrently, waiting for redelivery");
            return Ok(Action::await_change());
        }
        WriteOutcome::Unchanged => debug!(routes, "configuration unchanged"),
        WriteOutcome::Written => info!(routes, "configuration written"),
    }

    let deployment = compile_deployment(&proxy, &ctx.config.deployment_defaults())?;
    let applied = ctx.kube.apply_deployment(&deployment).await?;

    let status = compute_status(&proxy, &applied, routes).exhausted(allocation.exhausted);
    ctx.kube.patch_status(&namespace, &name, &status).await?;
    debug!(ready = status.ready, "updated proxy status");

    Ok(Action::await_change())
}

/// Tunnels taking part in allocation, oldest first
///
/// Tunnels being deleted no longer hold a port. An invalid tunnel is never
/// given a port, but one it already holds stays reserved until the tunnel is
/// fixed or deleted. Invalid tunnels are never routed.
async fn load_tunnels(
    ctx: &ProxyContext,
    namespace: &str,
    proxy: &str,
) -> Result<Vec<Tunnel>, Error> {
    let mut tunnels: Vec<Tunnel> = ctx
        .kube
        .list_tunnels(namespace, proxy)
        .await?
        .into_iter()
        .filter(|t| !t.is_deleting())
        .filter(|t| match t.spec.validate() {
            Ok(()) => true,
            Err(e) => {
                debug!(
                    tunnel = %t.name_any(),
                    error = %e,
                    transit_port = ?t.transit_port(),
                    "invalid tunnel is not routed"
                );
                t.transit_port().is_some()
            }
        })
        .collect();
    tunnels.sort_by(|a, b| {
        a.metadata
            .creation_timestamp
            .cmp(&b.metadata.creation_timestamp)
            .then_with(|| a.name_any().cmp(&b.name_any()))
    });
    Ok(tunnels)
}

fn compute_status(proxy: &Proxy, deployment: &Deployment, routes: usize) -> ProxyStatus {
    let (replicas, ready_replicas) = observed_replicas(deployment);
    let desired = proxy.spec.desired_replicas();
    let status = ProxyStatus::from_replicas(desired, replicas, ready_replicas);
    let reason = if status.ready {
        "ReplicasReady"
    } else {
        "ReplicasNotReady"
    };
    let message = format!("{ready_replicas}/{desired} replicas ready");
    let previous = proxy
        .status
        .as_ref()
        .map(|s| s.conditions.as_slice())
        .unwrap_or_default();
    let condition = Condition::new(
        "Ready",
        ConditionStatus::from(status.ready),
        reason,
        message,
    )
    .carry_transition_time(previous);

    status
        .tunnels(u32::try_from(routes).unwrap_or(u32::MAX))
        .observed_generation(proxy.metadata.generation)
        .condition(condition)
}

/// Error policy for the proxy controller
///
/// Conflicts never reach here. Failures are API or encoding errors, retried
/// after the configured delay.
pub fn error_policy(proxy: Arc<Proxy>, error: &Error, ctx: Arc<ProxyContext>) -> Action {
    error!(
        ?error,
        proxy = %proxy.name_any(),
        retryable = error.is_retryable(),
        "proxy reconciliation failed"
    );
    Action::requeue(ctx.config.error_requeue())
}
