//! Integration tests for tunnel routing
//!
//! These tests drive the Proxy and Tunnel reconcilers against a real API
//! server: transit ports are allocated and persisted, the proxy's Envoy
//! configuration is written, and each routable tunnel gets its Service.

use std::collections::HashSet;
use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::Api;
use kube::Client;

use tunnel_operator::config::OperatorConfig;
use tunnel_operator::controller::{proxy, tunnel, ProxyContext, TunnelContext};
use tunnel_operator::crd::{Proxy, Tunnel, TunnelReason};
use tunnel_operator::store::{self, WriteOutcome};
use tunnel_operator::transit::PortRange;
use tunnel_operator::{envoy, proxy_resource_name};

use super::helpers::{
    delete_and_wait, ensure_test_cluster, recreate, sample_proxy, sample_tunnel, TEST_NAMESPACE,
};

fn proxy_context(client: Client) -> Arc<ProxyContext> {
    Arc::new(ProxyContext::new(client, OperatorConfig::default()))
}

fn tunnel_context(client: Client) -> Arc<TunnelContext> {
    Arc::new(TunnelContext::new(client, OperatorConfig::default()))
}

/// Story: Tunnels sharing a proxy receive distinct transit ports
///
/// After one proxy pass, every tunnel has a persisted port inside the
/// transit range, no two tunnels share one, and the proxy's ConfigMap routes
/// exactly those ports.
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_tunnels_receive_distinct_transit_ports() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let proxies: Api<Proxy> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let tunnels: Api<Tunnel> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let names = ["route-a", "route-b", "route-c"];

    let egress = recreate(&proxies, &sample_proxy("route-proxy")).await;
    for name in names {
        recreate(&tunnels, &sample_tunnel(name, "route-proxy")).await;
    }

    proxy::reconcile(Arc::new(egress), proxy_context(client.clone()))
        .await
        .expect("proxy reconcile failed");

    let mut ports = HashSet::new();
    for name in names {
        let t = tunnels.get(name).await.expect("failed to get tunnel");
        let port = t.transit_port().expect("transit port assigned");
        assert!(PortRange::default().contains(port));
        assert!(ports.insert(port), "port {port} assigned twice");
    }

    let config_maps: Api<ConfigMap> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let cm = config_maps
        .get(&proxy_resource_name("route-proxy"))
        .await
        .expect("config map written");
    let lds = &cm.data.expect("config data")[envoy::LISTENERS_KEY];
    for port in &ports {
        assert!(lds.contains(&format!("\"port_value\": {port}")));
    }

    let deployments: Api<Deployment> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    assert!(deployments
        .get_opt(&proxy_resource_name("route-proxy"))
        .await
        .expect("failed to get deployment")
        .is_some());

    for name in names {
        delete_and_wait(&tunnels, name).await;
    }
    delete_and_wait(&proxies, "route-proxy").await;
}

/// Story: A second proxy pass changes nothing
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_repeated_reconcile_keeps_ports_stable() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let proxies: Api<Proxy> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let tunnels: Api<Tunnel> = Api::namespaced(client.clone(), TEST_NAMESPACE);

    let egress = recreate(&proxies, &sample_proxy("stable-proxy")).await;
    recreate(&tunnels, &sample_tunnel("stable-a", "stable-proxy")).await;

    let ctx = proxy_context(client.clone());
    proxy::reconcile(Arc::new(egress.clone()), ctx.clone())
        .await
        .expect("first reconcile failed");
    let first = tunnels.get("stable-a").await.expect("failed to get tunnel");

    proxy::reconcile(Arc::new(egress), ctx)
        .await
        .expect("second reconcile failed");
    let second = tunnels.get("stable-a").await.expect("failed to get tunnel");

    assert_eq!(first.transit_port(), second.transit_port());
    assert_eq!(first.metadata.resource_version, second.metadata.resource_version);

    delete_and_wait(&tunnels, "stable-a").await;
    delete_and_wait(&proxies, "stable-proxy").await;
}

/// Story: A write based on a stale read loses the race
///
/// The conditional write reports a conflict instead of overwriting the
/// newer port.
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_stale_write_reports_conflict() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let tunnels: Api<Tunnel> = Api::namespaced(client.clone(), TEST_NAMESPACE);

    let created = recreate(&tunnels, &sample_tunnel("race-a", "race-proxy")).await;

    let mut winner = created.clone();
    winner.set_transit_port(Some(11111));
    assert_eq!(
        store::write_transit_port(&tunnels, &winner).await.unwrap(),
        WriteOutcome::Written
    );

    let mut loser = created;
    loser.set_transit_port(Some(22222));
    assert_eq!(
        store::write_transit_port(&tunnels, &loser).await.unwrap(),
        WriteOutcome::Conflict
    );

    let stored = tunnels.get("race-a").await.expect("failed to get tunnel");
    assert_eq!(stored.transit_port(), Some(11111));

    delete_and_wait(&tunnels, "race-a").await;
}

/// Story: An allocated tunnel is exposed through its own Service
///
/// The Service listens on the tunnel's declared port and forwards to the
/// transit port on the proxy pods.
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_allocated_tunnel_is_exposed() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let proxies: Api<Proxy> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let tunnels: Api<Tunnel> = Api::namespaced(client.clone(), TEST_NAMESPACE);

    let egress = recreate(&proxies, &sample_proxy("expose-proxy")).await;
    recreate(&tunnels, &sample_tunnel("expose-a", "expose-proxy")).await;

    proxy::reconcile(Arc::new(egress), proxy_context(client.clone()))
        .await
        .expect("proxy reconcile failed");
    let allocated = tunnels.get("expose-a").await.expect("failed to get tunnel");
    let port = allocated.transit_port().expect("transit port assigned");

    tunnel::reconcile(Arc::new(allocated), tunnel_context(client.clone()))
        .await
        .expect("tunnel reconcile failed");

    let services: Api<Service> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let svc = services.get("expose-a").await.expect("service created");
    let svc_port = &svc.spec.unwrap().ports.unwrap()[0];
    assert_eq!(svc_port.port, 5432);
    assert_eq!(svc_port.target_port, Some(IntOrString::Int(i32::from(port))));

    let status = tunnels
        .get("expose-a")
        .await
        .expect("failed to get tunnel")
        .status
        .expect("status written");
    assert!(status.ready);
    assert_eq!(status.reason, Some(TunnelReason::Ready));
    assert_eq!(status.transit_port, Some(port));

    delete_and_wait(&tunnels, "expose-a").await;
    delete_and_wait(&proxies, "expose-proxy").await;
}

/// Story: A tunnel naming a proxy that does not exist is reported, not routed
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_missing_proxy_is_reported() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let tunnels: Api<Tunnel> = Api::namespaced(client.clone(), TEST_NAMESPACE);

    let orphan = recreate(&tunnels, &sample_tunnel("orphan-a", "no-such-proxy")).await;

    tunnel::reconcile(Arc::new(orphan), tunnel_context(client.clone()))
        .await
        .expect("tunnel reconcile failed");

    let stored = tunnels.get("orphan-a").await.expect("failed to get tunnel");
    let status = stored.status.expect("status written");
    assert!(!status.ready);
    assert_eq!(status.reason, Some(TunnelReason::NoSuchProxy));
    assert_eq!(status.transit_port, None);

    let services: Api<Service> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    assert!(services
        .get_opt("orphan-a")
        .await
        .expect("failed to query service")
        .is_none());

    delete_and_wait(&tunnels, "orphan-a").await;
}
