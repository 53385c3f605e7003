//! Conditional writes against the API server
//!
//! Concurrent reconciles are arbitrated by `resourceVersion` preconditions
//! alone. A write that loses the race returns [`WriteOutcome::Conflict`];
//! callers end the pass and wait for the watch event the winning write
//! produces. Conflicts are ordinary results, never errors.

use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::ResourceExt;
use tracing::debug;

use crate::crd::Tunnel;
use crate::{Error, Result, FIELD_MANAGER};

/// Result of a conditional write
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The object was created or updated
    Written,
    /// The stored object already matched, nothing was sent
    Unchanged,
    /// The object changed since it was read
    Conflict,
}

impl WriteOutcome {
    /// Whether the write lost a race with another writer
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict)
    }
}

/// True for HTTP 409 (stale resourceVersion, or create of an existing name)
pub fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 409)
}

/// True for HTTP 404
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

/// Fold a write result into a [`WriteOutcome`], keeping non-conflict errors
pub fn conditional<T>(result: std::result::Result<T, kube::Error>) -> Result<WriteOutcome> {
    match result {
        Ok(_) => Ok(WriteOutcome::Written),
        Err(e) if is_conflict(&e) => Ok(WriteOutcome::Conflict),
        Err(e) => Err(e.into()),
    }
}

/// Record `tunnel`'s transit port, conditional on the version it was read at
///
/// Only `status.transitPort` is sent. The merge patch carries
/// `metadata.resourceVersion`, which the API server checks as a precondition.
pub async fn write_transit_port(api: &Api<Tunnel>, tunnel: &Tunnel) -> Result<WriteOutcome> {
    let name = tunnel.name_any();
    let version = tunnel
        .resource_version()
        .ok_or_else(|| Error::missing_field("metadata.resourceVersion"))?;
    let patch = transit_port_patch(&version, tunnel.transit_port());

    conditional(
        api.patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await,
    )
}

fn transit_port_patch(version: &str, port: Option<u16>) -> serde_json::Value {
    serde_json::json!({
        "metadata": { "resourceVersion": version },
        "status": { "transitPort": port },
    })
}

/// Create or update a ConfigMap, skipping the write when data is unchanged
///
/// Creation fails with a conflict if another writer created it first. Updates
/// are conditional on the version just read.
pub async fn write_config_map(api: &Api<ConfigMap>, desired: &ConfigMap) -> Result<WriteOutcome> {
    let name = desired.name_any();

    let Some(current) = api.get_opt(&name).await? else {
        debug!(config_map = %name, "creating");
        return conditional(api.create(&PostParams::default(), desired).await);
    };

    if current.data == desired.data
        && current.metadata.owner_references == desired.metadata.owner_references
    {
        return Ok(WriteOutcome::Unchanged);
    }

    let mut update = desired.clone();
    update.metadata.resource_version = current.metadata.resource_version.clone();
    debug!(config_map = %name, "replacing");
    conditional(api.replace(&name, &PostParams::default(), &update).await)
}

/// Server-side apply parameters for generated resources
pub fn apply_params() -> PatchParams {
    PatchParams::apply(FIELD_MANAGER).force()
}
