//! Test helpers for integration tests
//!
//! Provides utilities for managing the kind cluster and test resources.

use std::process::Command;
use std::sync::OnceLock;
use std::time::Duration;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::{Client, Config, CustomResourceExt};
use tokio::sync::OnceCell;
use tokio::time::sleep;

use tunnel_operator::crd::{Proxy, ProxyReference, ProxySpec, Tunnel, TunnelSpec};

/// Name of the kind cluster used for integration tests
pub const TEST_CLUSTER_NAME: &str = "tunnel-operator-test";

/// Namespace the tests create their resources in
pub const TEST_NAMESPACE: &str = "default";

/// Global lock to ensure cluster is created only once
static CLUSTER_INIT: OnceLock<Result<(), String>> = OnceLock::new();

/// Track if CRDs have been installed (async-safe)
static CRDS_INSTALLED: OnceCell<Result<(), String>> = OnceCell::const_new();

/// Check if a kind cluster with the given name exists
pub fn kind_cluster_exists(name: &str) -> bool {
    let output = Command::new("kind")
        .args(["get", "clusters"])
        .output()
        .expect("failed to run kind");

    let clusters = String::from_utf8_lossy(&output.stdout);
    clusters.lines().any(|line| line.trim() == name)
}

/// Create a kind cluster for testing
pub fn create_kind_cluster(name: &str) -> Result<(), String> {
    if kind_cluster_exists(name) {
        println!("Kind cluster '{name}' already exists, reusing it");
        return Ok(());
    }

    println!("Creating kind cluster '{name}'...");
    let output = Command::new("kind")
        .args(["create", "cluster", "--name", name, "--wait", "60s"])
        .output()
        .map_err(|e| format!("failed to run kind: {e}"))?;

    if !output.status.success() {
        return Err(format!(
            "failed to create kind cluster: {}",
            String::from_utf8_lossy(&output.stderr)
        ));
    }

    println!("Kind cluster '{name}' created successfully");
    Ok(())
}

/// Install the Tunnel and Proxy CRDs with server-side apply
pub async fn install_crds(client: &Client) -> Result<(), kube::Error> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply("tunnel-operator-test").force();

    for crd in [Tunnel::crd(), Proxy::crd()] {
        let name = crd.metadata.name.clone().unwrap_or_default();
        println!("Installing CRD {name}...");
        crds.patch(&name, &params, &Patch::Apply(&crd)).await?;
    }

    // Wait for the CRDs to be established
    sleep(Duration::from_secs(2)).await;
    Ok(())
}

/// Create a Kubernetes client connected to the test cluster
pub async fn create_test_client() -> Result<Client, String> {
    let context_name = format!("kind-{TEST_CLUSTER_NAME}");

    let config = Config::from_kubeconfig(&kube::config::KubeConfigOptions {
        context: Some(context_name),
        ..Default::default()
    })
    .await
    .map_err(|e| format!("failed to load kubeconfig: {e}"))?;

    Client::try_from(config).map_err(|e| format!("failed to create client: {e}"))
}

/// Ensure the test cluster is ready (thread-safe, cluster created once)
///
/// Returns a fresh Client for each call - clients should not be shared across test threads.
pub async fn ensure_test_cluster() -> Result<Client, String> {
    let cluster_result = CLUSTER_INIT.get_or_init(|| create_kind_cluster(TEST_CLUSTER_NAME));
    cluster_result.clone()?;

    let client = create_test_client().await?;

    let crd_result = CRDS_INSTALLED
        .get_or_init(|| async {
            let client = create_test_client().await?;
            install_crds(&client)
                .await
                .map_err(|e| format!("failed to install CRDs: {e}"))
        })
        .await;
    crd_result.clone()?;

    Ok(client)
}

// =============================================================================
// Resource Fixtures
// =============================================================================

/// A Proxy with default settings
pub fn sample_proxy(name: &str) -> Proxy {
    Proxy {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(TEST_NAMESPACE.to_string()),
            ..Default::default()
        },
        spec: ProxySpec::default(),
        status: None,
    }
}

/// A Tunnel to `<name>.db.internal:5432` through `proxy`
pub fn sample_tunnel(name: &str, proxy: &str) -> Tunnel {
    Tunnel {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(TEST_NAMESPACE.to_string()),
            ..Default::default()
        },
        spec: TunnelSpec {
            host: format!("{name}.db.internal"),
            port: 5432,
            proxy: ProxyReference {
                name: proxy.to_string(),
            },
        },
        status: None,
    }
}

/// Create a resource, replacing any leftover from a previous run
pub async fn recreate<K>(api: &Api<K>, obj: &K) -> K
where
    K: kube::Resource + Clone + serde::de::DeserializeOwned + serde::Serialize + std::fmt::Debug,
{
    let name = obj.meta().name.clone().expect("fixture has a name");
    delete_and_wait(api, &name).await;
    api.create(&PostParams::default(), obj)
        .await
        .expect("failed to create resource")
}

/// Delete a resource and wait until it is gone
pub async fn delete_and_wait<K>(api: &Api<K>, name: &str)
where
    K: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
{
    let _ = api.delete(name, &DeleteParams::default()).await;
    for _ in 0..30 {
        match api.get_opt(name).await {
            Ok(None) => return,
            _ => sleep(Duration::from_millis(200)).await,
        }
    }
}
