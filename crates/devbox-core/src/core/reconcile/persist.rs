use std::path::Path;

use anyhow::Result;
use devbox_domain::{AccountIds, HomeLink};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::{reason, ReconcileError};
use crate::context::CommandContext;
use crate::effects::{EntryKind, FileSystem};

pub(crate) const PRIVATE_DIR_MODE: u32 = 0o700;
pub(crate) const PRIVATE_FILE_MODE: u32 = 0o600;

#[derive(Debug, Serialize)]
pub(crate) struct PersistReport {
    pub(crate) links: Vec<HomeLink>,
    pub(crate) warnings: Vec<String>,
}

/// Prepares the durable volume and points the home shortcuts at it.
pub(crate) fn link_persistent_state(ctx: &CommandContext) -> Result<PersistReport> {
    let fs = ctx.fs();
    let layout = ctx.layout();
    let account = ctx.account();
    let ids = account.ids;
    let mut warnings = Vec::new();

    for dir in layout.directories().iter().chain([&account.home]) {
        fs.create_dir_all(dir).map_err(|err| ReconcileError::Volume {
            path: dir.clone(),
            reason: reason(&err),
        })?;
    }
    let history = layout.history_file();
    fs.touch(&history).map_err(|err| ReconcileError::Volume {
        path: history.clone(),
        reason: reason(&err),
    })?;
    // pass writes owner-only files; every entry has to follow a remap
    hand_over(fs, layout.password_store(), ids, &mut warnings);
    hand_over(fs, &layout.state(), ids, &mut warnings);

    let links = layout.home_links(account);
    for link in &links {
        replace_link(fs, link)?;
        best_effort(fs.lchown(&link.link, ids), &mut warnings);
        info!(link = %link.link.display(), target = %link.target.display(), "linked");
    }

    lock_down(fs, &layout.gnupg(), ids, &mut warnings);
    if !warnings.is_empty() {
        warn!(count = warnings.len(), "some ownership or permission repairs failed");
    }
    Ok(PersistReport { links, warnings })
}

/// Removes whatever occupies the link path and links it afresh.
fn replace_link(fs: &dyn FileSystem, link: &HomeLink) -> Result<()> {
    let failed = |err: anyhow::Error| ReconcileError::Link {
        link: link.link.clone(),
        target: link.target.clone(),
        reason: reason(&err),
    };
    match fs.symlink_metadata(&link.link).map_err(failed)? {
        Some(meta) if meta.kind == EntryKind::Dir => {
            debug!(path = %link.link.display(), "removing directory in place of link");
            fs.remove_dir_all(&link.link).map_err(failed)?;
        }
        Some(_) => fs.remove_file(&link.link).map_err(failed)?,
        None => {}
    }
    fs.symlink(&link.target, &link.link).map_err(failed)?;
    Ok(())
}

/// Recursively hands `root` to `ids` with owner-only modes.
pub(crate) fn lock_down(
    fs: &dyn FileSystem,
    root: &Path,
    ids: AccountIds,
    warnings: &mut Vec<String>,
) {
    reown(fs, root, ids, true, warnings);
}

/// Recursively hands `root` to `ids`, leaving modes alone.
pub(crate) fn hand_over(
    fs: &dyn FileSystem,
    root: &Path,
    ids: AccountIds,
    warnings: &mut Vec<String>,
) {
    reown(fs, root, ids, false, warnings);
}

fn reown(
    fs: &dyn FileSystem,
    root: &Path,
    ids: AccountIds,
    private: bool,
    warnings: &mut Vec<String>,
) {
    let meta = match fs.symlink_metadata(root) {
        Ok(Some(meta)) => meta,
        Ok(None) => return,
        Err(err) => {
            warnings.push(reason(&err));
            return;
        }
    };
    match meta.kind {
        EntryKind::Dir => {
            best_effort(fs.chown(root, ids), warnings);
            if private {
                best_effort(fs.set_mode(root, PRIVATE_DIR_MODE), warnings);
            }
            match fs.read_dir(root) {
                Ok(children) => {
                    for child in children {
                        reown(fs, &child, ids, private, warnings);
                    }
                }
                Err(err) => warnings.push(reason(&err)),
            }
        }
        EntryKind::File => {
            best_effort(fs.chown(root, ids), warnings);
            if private {
                best_effort(fs.set_mode(root, PRIVATE_FILE_MODE), warnings);
            }
        }
        EntryKind::Symlink => best_effort(fs.lchown(root, ids), warnings),
        EntryKind::Other => best_effort(fs.chown(root, ids), warnings),
    }
}

fn best_effort(result: Result<()>, warnings: &mut Vec<String>) {
    if let Err(err) = result {
        debug!(error = %reason(&err), "repair skipped");
        warnings.push(reason(&err));
    }
}
