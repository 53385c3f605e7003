//! Tunnel controller
//!
//! Exposes each tunnel through a Service once its proxy has assigned a
//! transit port, and reports readiness. The transit port itself is written
//! only by the proxy controller.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use kube::api::{Api, DeleteParams, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Client, Resource, ResourceExt};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use crate::config::OperatorConfig;
use crate::crd::{Condition, ConditionStatus, Proxy, Tunnel, TunnelReason};
use crate::events::{actions, reasons, EventPublisher, KubeEventPublisher};
use crate::store;
use crate::workload::compile_service;
use crate::Error;

/// Kubernetes operations needed by the tunnel controller
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TunnelKube: Send + Sync {
    /// Fetch a Proxy, `None` if it does not exist
    async fn get_proxy(&self, namespace: &str, name: &str) -> Result<Option<Proxy>, Error>;

    /// Server-side apply a tunnel Service
    async fn apply_service(&self, service: &Service) -> Result<(), Error>;

    /// Delete a tunnel Service, succeeding if it is already gone
    async fn delete_service(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Patch the readiness fields of a Tunnel's status
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        readiness: &TunnelReadiness,
    ) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct TunnelKubeImpl {
    client: Client,
}

impl TunnelKubeImpl {
    /// Create a new TunnelKubeImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TunnelKube for TunnelKubeImpl {
    async fn get_proxy(&self, namespace: &str, name: &str) -> Result<Option<Proxy>, Error> {
        let api: Api<Proxy> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn apply_service(&self, service: &Service) -> Result<(), Error> {
        let namespace = service
            .namespace()
            .ok_or_else(|| Error::missing_field("metadata.namespace"))?;
        let api: Api<Service> = Api::namespaced(self.client.clone(), &namespace);
        api.patch(
            &service.name_any(),
            &store::apply_params(),
            &Patch::Apply(service),
        )
        .await?;
        Ok(())
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if store::is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        readiness: &TunnelReadiness,
    ) -> Result<(), Error> {
        let api: Api<Tunnel> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({ "status": readiness });
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

/// Readiness fields of a Tunnel's status
///
/// Serialized without skipping, so a merge patch clears `message` when it is
/// `None`. `transitPort` is absent and left untouched.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelReadiness {
    /// Whether the tunnel is routable
    pub ready: bool,
    /// Why the tunnel is or is not ready
    pub reason: Option<TunnelReason>,
    /// Human-readable detail
    pub message: Option<String>,
    /// The `Ready` condition
    pub conditions: Vec<Condition>,
}

impl TunnelReadiness {
    fn new(tunnel: &Tunnel, reason: TunnelReason, message: Option<String>) -> Self {
        let ready = reason.is_ready();
        let previous = tunnel
            .status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default();
        let condition = Condition::new(
            "Ready",
            ConditionStatus::from(ready),
            reason.to_string(),
            message.clone().unwrap_or_default(),
        )
        .carry_transition_time(previous);
        Self {
            ready,
            reason: Some(reason),
            message,
            conditions: vec![condition],
        }
    }

    /// Whether `tunnel` already reports exactly this readiness
    fn is_current(&self, tunnel: &Tunnel) -> bool {
        tunnel.status.as_ref().is_some_and(|s| {
            s.ready == self.ready
                && s.reason == self.reason
                && s.message == self.message
                && s.conditions == self.conditions
        })
    }
}

/// Controller context for Tunnel reconciliation
pub struct TunnelContext {
    /// Kubernetes operations (trait object for testability)
    pub kube: Arc<dyn TunnelKube>,
    /// Event publisher
    pub events: Arc<dyn EventPublisher>,
    /// Operator configuration
    pub config: OperatorConfig,
}

impl TunnelContext {
    /// Create a context backed by the given client
    pub fn new(client: Client, config: OperatorConfig) -> Self {
        Self {
            kube: Arc::new(TunnelKubeImpl::new(client.clone())),
            events: Arc::new(KubeEventPublisher::new(client, "tunnel-controller")),
            config,
        }
    }

    /// Create a context for testing with mock clients
    #[cfg(test)]
    pub fn for_testing(kube: Arc<dyn TunnelKube>, events: Arc<dyn EventPublisher>) -> Self {
        Self {
            kube,
            events,
            config: OperatorConfig::default(),
        }
    }
}

/// Reconcile a Tunnel
#[instrument(skip(tunnel, ctx), fields(tunnel = %tunnel.name_any()))]
pub async fn reconcile(tunnel: Arc<Tunnel>, ctx: Arc<TunnelContext>) -> Result<Action, Error> {
    if tunnel.is_deleting() {
        debug!("tunnel is being deleted, its Service is garbage collected");
        return Ok(Action::await_change());
    }
    let name = tunnel.name_any();
    let namespace = tunnel
        .namespace()
        .ok_or_else(|| Error::missing_field("metadata.namespace"))?;
    let proxy = tunnel.proxy_name().to_string();

    let mut action = Action::await_change();
    let target = ctx.kube.get_proxy(&namespace, &proxy).await?;
    let readiness = if target.is_none() {
        ctx.kube.delete_service(&namespace, &name).await?;
        let message = format!("proxy {proxy} does not exist in namespace {namespace}");
        if !has_reason(&tunnel, TunnelReason::NoSuchProxy) {
            warn!(%proxy, "tunnel references a missing proxy");
            publish(&ctx, &tunnel, EventType::Warning, reasons::NO_SUCH_PROXY, &message).await;
        }
        TunnelReadiness::new(&tunnel, TunnelReason::NoSuchProxy, Some(message))
    } else if let Err(e) = tunnel.spec.validate() {
        ctx.kube.delete_service(&namespace, &name).await?;
        TunnelReadiness::new(&tunnel, TunnelReason::WaitingForProxy, Some(e.to_string()))
    } else if let Some(port) = tunnel.transit_port() {
        match expose(&ctx, &tunnel, port).await {
            Ok(()) => {
                if !has_reason(&tunnel, TunnelReason::Ready) {
                    info!(transit_port = port, "tunnel is ready");
                }
                TunnelReadiness::new(&tunnel, TunnelReason::Ready, None)
            }
            Err(e) => {
                warn!(error = %e, "failed to apply tunnel service");
                let message = format!("failed to apply service: {e}");
                publish(&ctx, &tunnel, EventType::Warning, reasons::SERVICE_FAILURE, &message)
                    .await;
                action = Action::requeue(ctx.config.error_requeue());
                TunnelReadiness::new(&tunnel, TunnelReason::ServiceFailure, Some(message))
            }
        }
    } else {
        ctx.kube.delete_service(&namespace, &name).await?;
        let exhausted = target.as_ref().is_some_and(|p| p.reports_exhausted(&name));
        let message = if exhausted {
            format!("transit port range exhausted on proxy {proxy}")
        } else {
            format!("waiting for proxy {proxy} to assign a transit port")
        };
        TunnelReadiness::new(&tunnel, TunnelReason::WaitingForProxy, Some(message))
    };

    if readiness.is_current(&tunnel) {
        debug!(reason = ?readiness.reason, "status unchanged");
    } else {
        ctx.kube.patch_status(&namespace, &name, &readiness).await?;
        debug!(reason = ?readiness.reason, ready = readiness.ready, "updated tunnel status");
    }

    Ok(action)
}

async fn expose(ctx: &TunnelContext, tunnel: &Tunnel, port: u16) -> Result<(), Error> {
    let service = compile_service(tunnel, port)?;
    ctx.kube.apply_service(&service).await
}

fn has_reason(tunnel: &Tunnel, reason: TunnelReason) -> bool {
    tunnel.status.as_ref().and_then(|s| s.reason) == Some(reason)
}

async fn publish(
    ctx: &TunnelContext,
    tunnel: &Tunnel,
    type_: EventType,
    reason: &str,
    note: &str,
) {
    ctx.events
        .publish(
            &tunnel.object_ref(&()),
            type_,
            reason,
            actions::EXPOSE,
            Some(note.to_string()),
        )
        .await;
}

/// Error policy for the tunnel controller
pub fn error_policy(tunnel: Arc<Tunnel>, error: &Error, ctx: Arc<TunnelContext>) -> Action {
    error!(
        ?error,
        tunnel = %tunnel.name_any(),
        retryable = error.is_retryable(),
        "tunnel reconciliation failed"
    );
    Action::requeue(ctx.config.error_requeue())
}
