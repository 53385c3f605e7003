//! Custom Resource Definitions for the tunnel operator
//!
//! This module contains all CRD definitions used by the operator.

mod proxy;
mod tunnel;
mod types;

pub use proxy::{EnvoyOverrides, Proxy, ProxySpec, ProxyStatus, ProxyTemplate};
pub use tunnel::{ProxyReference, Tunnel, TunnelSpec, TunnelStatus};
pub use types::{Condition, ConditionStatus, TunnelReason};
