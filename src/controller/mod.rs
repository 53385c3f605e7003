//! Reconcilers for the Tunnel and Proxy resources
//!
//! The proxy controller owns transit port allocation and the proxy workload.
//! The tunnel controller owns each tunnel's Service and readiness. The two
//! never write the same status field.

pub mod proxy;
pub mod tunnel;

pub use proxy::{ProxyContext, ProxyKube, ProxyKubeImpl};
pub use tunnel::{TunnelContext, TunnelKube, TunnelKubeImpl, TunnelReadiness};
