//! Integration tests for the tunnel operator
//!
//! These tests run the reconcilers against a real API server (kind) and tell
//! the story of how application teams use Tunnels and Proxies.
//!
//! # Test Organization
//!
//! - `crd_operations`: Stories about creating and validating Tunnel and Proxy
//!   resources through the Kubernetes API
//!
//! - `tunnel_routing`: Stories about transit port allocation, proxy
//!   configuration, and tunnel exposure driven by the reconcilers
//!
//! # Running These Tests
//!
//! ```bash
//! cargo test --test kind -- --ignored
//! ```

mod crd_operations;
mod helpers;
mod tunnel_routing;
