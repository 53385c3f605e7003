//! Integration tests for CRD operations
//!
//! These tests tell the story of how application teams declare Tunnels and
//! Proxies through the Kubernetes API, and how the schema protects them.

use kube::api::{Api, PostParams};

use tunnel_operator::crd::{Proxy, Tunnel};

use super::helpers::{
    delete_and_wait, ensure_test_cluster, recreate, sample_proxy, sample_tunnel, TEST_NAMESPACE,
};

/// Story: A team declares a tunnel to a private database
///
/// The tunnel is stored as written and starts with no status: no transit
/// port has been assigned and no readiness has been reported yet.
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_team_declares_tunnel() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let api: Api<Tunnel> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let name = "crd-declare";

    let created = recreate(&api, &sample_tunnel(name, "crd-proxy")).await;

    assert_eq!(created.spec.host, "crd-declare.db.internal");
    assert_eq!(created.spec.port, 5432);
    assert_eq!(created.proxy_name(), "crd-proxy");
    assert_eq!(created.transit_port(), None);

    delete_and_wait(&api, name).await;
}

/// Story: The schema rejects a tunnel with an out-of-range port
///
/// Port 0 never reaches the operator; the API server refuses it.
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_schema_rejects_port_zero() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let api: Api<Tunnel> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let name = "crd-port-zero";
    delete_and_wait(&api, name).await;

    let mut tunnel = sample_tunnel(name, "crd-proxy");
    tunnel.spec.port = 0;
    let result = api.create(&PostParams::default(), &tunnel).await;

    match result {
        Err(kube::Error::Api(e)) => assert_eq!(e.code, 422),
        other => panic!("expected a validation failure, got {other:?}"),
    }
}

/// Story: The schema rejects a tunnel with an empty host
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_schema_rejects_empty_host() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let api: Api<Tunnel> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let name = "crd-empty-host";
    delete_and_wait(&api, name).await;

    let mut tunnel = sample_tunnel(name, "crd-proxy");
    tunnel.spec.host = String::new();
    let result = api.create(&PostParams::default(), &tunnel).await;

    assert!(
        matches!(result, Err(kube::Error::Api(ref e)) if e.code == 422),
        "empty host should be rejected"
    );
}

/// Story: A platform team creates a shared proxy with default settings
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_platform_creates_proxy() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let api: Api<Proxy> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let name = "crd-proxy";

    let created = recreate(&api, &sample_proxy(name)).await;

    assert_eq!(created.spec.desired_replicas(), 1);
    assert!(created.status.is_none());

    delete_and_wait(&api, name).await;
}
