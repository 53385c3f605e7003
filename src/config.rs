//! Operator configuration
//!
//! Every setting is a CLI flag with an environment variable fallback, so the
//! same binary is configured from a Deployment's `env` or a local shell.

use std::time::Duration;

use clap::{Args, ValueEnum};
use kube::api::Api;
use kube::{Client, Resource};
use serde::de::DeserializeOwned;

use crate::workload::DeploymentDefaults;
use crate::DEFAULT_ENVOY_IMAGE;

/// Log output format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Runtime configuration shared by both controllers
#[derive(Args, Clone, Debug, PartialEq)]
pub struct OperatorConfig {
    /// Envoy image for proxies that do not set one
    #[arg(long, env = "ENVOY_IMAGE", default_value = DEFAULT_ENVOY_IMAGE)]
    pub envoy_image: String,

    /// Restrict the operator to one namespace (all namespaces when unset)
    #[arg(long, env = "WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Delay before retrying a reconcile that failed
    #[arg(long, env = "ERROR_REQUEUE_SECS", default_value_t = 5)]
    pub error_requeue_secs: u64,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            envoy_image: DEFAULT_ENVOY_IMAGE.to_string(),
            watch_namespace: None,
            log_format: LogFormat::default(),
            error_requeue_secs: 5,
        }
    }
}

impl OperatorConfig {
    /// Requeue delay after a failed reconcile
    pub fn error_requeue(&self) -> Duration {
        Duration::from_secs(self.error_requeue_secs)
    }

    /// Defaults applied to every generated Deployment
    pub fn deployment_defaults(&self) -> DeploymentDefaults {
        DeploymentDefaults {
            image: self.envoy_image.clone(),
        }
    }

    /// Api scoped to the watched namespace, or cluster-wide
    pub fn api<K>(&self, client: Client) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + std::fmt::Debug,
    {
        match &self.watch_namespace {
            Some(ns) => Api::namespaced(client, ns),
            None => Api::all(client),
        }
    }
}
