//! Kubernetes Event recording
//!
//! The proxy controller records an Event on a Tunnel when it hands the tunnel
//! a transit port or finds no free port for it. The tunnel controller records
//! one when the tunnel's proxy is missing or its Service is rejected. Operators see
//! them in `kubectl describe` and `kubectl get events`.
//!
//! Events are advisory. A failed publish is logged at warn level and the
//! reconcile carries on.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

#[cfg(test)]
use mockall::automock;

/// Publishes Kubernetes Events
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an Event about a Tunnel
    ///
    /// # Arguments
    ///
    /// * `resource_ref` - The Tunnel the event is attached to
    /// * `type_` - `Normal` for allocations, `Warning` for exhaustion and failures
    /// * `reason` - One of the [`reasons`] constants, e.g. `TransitPortAllocated`
    /// * `action` - One of the [`actions`] constants, `Allocate` or `Expose`
    /// * `note` - Detail such as the assigned port or the API error
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Publisher backed by `kube::runtime::events::Recorder`
///
/// One publisher is built per controller, so events name the controller that
/// produced them.
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a publisher reporting as `controller_name`
    ///
    /// The name becomes the event's reporting controller, either
    /// `tunnel-proxy-controller` or `tunnel-controller`. The reporting instance
    /// is read from `POD_NAME` when the downward API sets it.
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, action, error = %e, "failed to publish event");
        }
    }
}

/// Event reasons, shown in the REASON column
pub mod reasons {
    /// A tunnel received a transit port
    pub const TRANSIT_PORT_ALLOCATED: &str = "TransitPortAllocated";
    /// No free transit port was found for a tunnel
    pub const ALLOCATION_EXHAUSTED: &str = "AllocationExhausted";
    /// A tunnel names a Proxy that does not exist
    pub const NO_SUCH_PROXY: &str = "NoSuchProxy";
    /// A tunnel's Service could not be applied
    pub const SERVICE_FAILURE: &str = "ServiceFailure";
}

/// Event actions, shown in the ACTION column
pub mod actions {
    /// Transit port allocation
    pub const ALLOCATE: &str = "Allocate";
    /// Service provisioning
    pub const EXPOSE: &str = "Expose";
}
