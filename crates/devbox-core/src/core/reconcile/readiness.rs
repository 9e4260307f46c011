use anyhow::Result;
use devbox_domain::{AccountIds, PersistLayout};
use serde_json::json;
use tracing::{debug, info, warn};

use super::{reason, ReconcileError};
use crate::context::CommandContext;
use crate::diagnostics::commands;
use crate::effects::{path_exists, FileSystem};
use crate::outcome::ExecutionOutcome;

/// Withdraws the ready signal. A marker that cannot be removed is fatal.
pub(crate) fn clear_marker(fs: &dyn FileSystem, layout: &PersistLayout) -> Result<()> {
    let marker = layout.ready_marker();
    if !path_exists(fs, &marker) {
        debug!(path = %marker.display(), "no readiness marker to clear");
        return Ok(());
    }
    fs.remove_file(&marker)
        .map_err(|err| ReconcileError::ClearMarker {
            path: marker.clone(),
            reason: reason(&err),
        })?;
    info!(path = %marker.display(), "readiness marker cleared");
    Ok(())
}

pub(crate) fn publish_marker(
    fs: &dyn FileSystem,
    layout: &PersistLayout,
    ids: AccountIds,
) -> Result<()> {
    let marker = layout.ready_marker();
    fs.write(&marker, b"")
        .map_err(|err| ReconcileError::PublishMarker {
            path: marker.clone(),
            reason: reason(&err),
        })?;
    if let Err(err) = fs.lchown(&marker, ids) {
        warn!(
            path = %marker.display(),
            error = %reason(&err),
            "could not hand marker to the account"
        );
    }
    info!(path = %marker.display(), "readiness marker published");
    Ok(())
}

#[must_use]
pub fn is_ready(fs: &dyn FileSystem, layout: &PersistLayout) -> bool {
    path_exists(fs, &layout.ready_marker())
}

/// Health probe: succeeds iff the readiness marker exists.
///
/// # Errors
/// Never fails; the result is carried in the outcome status.
pub fn ready(ctx: &CommandContext) -> Result<ExecutionOutcome> {
    let marker = ctx.layout().ready_marker();
    let details = json!({
        "code": commands::READY,
        "marker": marker.display().to_string(),
    });
    if is_ready(ctx.fs(), ctx.layout()) {
        Ok(ExecutionOutcome::success("devbox is ready", details))
    } else {
        Ok(ExecutionOutcome::user_error("devbox is not ready", details))
    }
}
