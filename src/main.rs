//! Tunnel operator - routes in-cluster traffic through shared Envoy proxies

use clap::{Parser, Subcommand};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch};
use kube::{Client, CustomResourceExt};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tunnel_operator::config::{LogFormat, OperatorConfig};
use tunnel_operator::controller_runner::{build_proxy_controller, build_tunnel_controller};
use tunnel_operator::crd::{Proxy, Tunnel};
use tunnel_operator::retry::{retry_with_backoff, RetryConfig};
use tunnel_operator::store::apply_params;

/// Tunnel operator - exposes private destinations through shared proxies
#[derive(Parser, Debug)]
#[command(name = "tunnel-operator", version, about, long_about = None)]
struct Cli {
    /// Print the CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(flatten)]
    config: OperatorConfig,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the Tunnel and Proxy controllers (default mode)
    Controller,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        println!("{}", crd_manifests()?);
        return Ok(());
    }

    init_tracing(cli.config.log_format);

    match cli.command {
        Some(Commands::Controller) | None => run_controller(cli.config).await,
    }
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,kube=warn"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(fmt::layer()).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
}

/// Both CRDs as a multi-document YAML stream
fn crd_manifests() -> anyhow::Result<String> {
    let tunnel = serde_yaml::to_string(&Tunnel::crd())
        .map_err(|e| anyhow::anyhow!("Failed to serialize Tunnel CRD: {}", e))?;
    let proxy = serde_yaml::to_string(&Proxy::crd())
        .map_err(|e| anyhow::anyhow!("Failed to serialize Proxy CRD: {}", e))?;
    Ok(format!("{tunnel}---\n{proxy}"))
}

async fn run_controller(config: OperatorConfig) -> anyhow::Result<()> {
    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    retry_with_backoff(&RetryConfig::with_max_attempts(10), "install_crds", || {
        ensure_crds_installed(&client)
    })
    .await
    .map_err(|e| anyhow::anyhow!("Failed to install CRDs: {}", e))?;

    match &config.watch_namespace {
        Some(ns) => tracing::info!(namespace = %ns, "Starting tunnel operator"),
        None => tracing::info!("Starting tunnel operator for all namespaces"),
    }

    let proxies = build_proxy_controller(client.clone(), &config);
    let tunnels = build_tunnel_controller(client, &config);
    futures::future::join(proxies, tunnels).await;

    tracing::info!("Tunnel operator shut down");
    Ok(())
}

/// Install or update both CRDs with server-side apply
///
/// The CRD versions always match the running operator.
async fn ensure_crds_installed(client: &Client) -> tunnel_operator::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = apply_params();

    for crd in [Tunnel::crd(), Proxy::crd()] {
        let name = crd.metadata.name.clone().unwrap_or_default();
        tracing::info!(crd = %name, "Installing CRD");
        crds.patch(&name, &params, &Patch::Apply(&crd)).await?;
    }
    Ok(())
}
