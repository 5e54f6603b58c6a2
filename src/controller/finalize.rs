//! Release finalization.
//!
//! Deletion-time state machine: Active -> Finalizing -> gone. The
//! Finalizing transition is persisted as a status condition before any
//! cleanup starts, so a crash mid-cleanup is externally distinguishable
//! from cleanup never having begun. Cleanup probes with an empty desired
//! set, making every previously tracked resource stale by construction.
//!
//! Invariant: the finalizer is removed if and only if zero live resources
//! carry this Release's UID label.

use std::time::Duration;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, info, warn};

use crate::controller::conditions;
use crate::controller::release::{
    ownership_selector, probe_gvks, Context, DataPlaneClient, FINALIZER,
};
use crate::crd::{set_condition, Release};
use crate::{Error, Result};

/// Delay between finalization passes while resources are still live.
///
/// Target objects may carry their own finalizers that delay physical
/// removal, so the delete-then-recheck loop is safely repeatable.
const REQUEUE_INTERVAL: Duration = Duration::from_secs(5);

/// Run one finalization pass for a Release with a deletion timestamp
pub async fn finalize(release: &Release, ctx: &Context) -> Result<Action> {
    if !release.finalizers().iter().any(|f| f == FINALIZER) {
        // Nothing was ever applied under this controller's watch
        return Ok(Action::await_change());
    }

    let namespace = release
        .namespace()
        .ok_or_else(|| Error::input("release has no namespace"))?;
    let uid = release
        .uid()
        .ok_or_else(|| Error::input("release has no uid"))?;
    let generation = release.metadata.generation;

    // Persist the Finalizing transition before any cleanup work
    let mut status = release.status.clone().unwrap_or_default();
    if set_condition(&mut status.conditions, conditions::finalizing(generation)) {
        ctx.control_plane.patch_status(release, &status).await?;
        info!("Entered finalizing state");
        return Ok(Action::requeue(REQUEUE_INTERVAL));
    }

    let dataplane = match ctx
        .resolver
        .resolve(&namespace, &release.spec.environment_name)
        .await
    {
        Ok(dataplane) => dataplane,
        Err(e) => {
            warn!(error = %e, "Cleanup blocked: cannot reach data plane");
            if set_condition(
                &mut status.conditions,
                conditions::cleanup_failed(e.to_string(), generation),
            ) {
                ctx.control_plane.patch_status(release, &status).await?;
            }
            // Finalizer retained; the next pass retries cleanup
            return Err(e);
        }
    };

    // Empty desired set: everything previously tracked is stale
    let selector = ownership_selector(&uid);
    let remaining = match delete_tracked(dataplane.as_ref(), release, &selector).await {
        Ok(remaining) => remaining,
        Err(e) => {
            warn!(error = %e, "Cleanup pass failed");
            if set_condition(
                &mut status.conditions,
                conditions::cleanup_failed(e.to_string(), generation),
            ) {
                ctx.control_plane.patch_status(release, &status).await?;
            }
            // Finalizer retained; the next pass retries cleanup
            return Err(e);
        }
    };

    if remaining > 0 {
        // Deletion is asynchronous; check back until the live set drains
        info!(remaining, "Resources still live, requeueing finalization");
        return Ok(Action::requeue(REQUEUE_INTERVAL));
    }

    ctx.control_plane.remove_finalizer(release).await?;
    info!("Finalization complete, removed finalizer");
    Ok(Action::await_change())
}

/// Delete every live resource still carrying the Release's UID label,
/// returning how many delete calls this pass issued
async fn delete_tracked(
    dataplane: &dyn DataPlaneClient,
    release: &Release,
    selector: &str,
) -> Result<usize> {
    let mut remaining = 0usize;
    for gvk in probe_gvks(&[], release) {
        for live in dataplane.list(&gvk, selector).await? {
            let name = live["metadata"]["name"].as_str().unwrap_or_default();
            let live_namespace = live["metadata"]["namespace"].as_str().map(str::to_string);
            debug!(kind = %gvk.kind, name = %name, "Deleting resource during finalization");
            dataplane.delete(&gvk, live_namespace, name).await?;
            remaining += 1;
        }
    }
    Ok(remaining)
}
