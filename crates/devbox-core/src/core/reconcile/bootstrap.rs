//! Drives the secret bootstrap state machine against the real key manager
//! and secret store.

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use devbox_domain::{
    first_secret_fingerprint, has_secret_key, secret_key_matches, transition, AccountIds,
    BootstrapAction, BootstrapState, Facts, Fingerprint,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::{reason, ReconcileError};
use crate::context::CommandContext;
use crate::effects::{EntryKind, FileSystem};
use crate::session::Session;
use crate::unique_suffix;

pub(crate) const BATCH_FILE_PREFIX: &str = ".devbox-keygen-";
const AGENT_SOCKET_PREFIX: &str = "S.gpg-agent";
const MAX_TRANSITIONS: usize = 8;

#[derive(Debug, Serialize)]
pub(crate) struct BootstrapReport {
    pub(crate) fingerprint: Fingerprint,
    pub(crate) states: Vec<&'static str>,
    pub(crate) actions: Vec<BootstrapAction>,
    pub(crate) warnings: Vec<String>,
}

pub(crate) fn bootstrap_secrets(
    ctx: &CommandContext,
    session: &Session,
) -> Result<BootstrapReport> {
    let gnupg = ctx.layout().gnupg();
    let mut warnings = Vec::new();
    sweep_gnupg(ctx.fs(), &gnupg, &mut warnings);
    if let Err(err) = ctx.keys().restart_agent(session) {
        warn!(error = %reason(&err), "gpg-agent restart failed");
        warnings.push(format!("gpg-agent restart failed: {}", reason(&err)));
    }

    let mut state = BootstrapState::NoKey;
    let mut states = vec![state.as_str()];
    let mut actions = Vec::new();
    for _ in 0..MAX_TRANSITIONS {
        if let BootstrapState::StoreReady(fingerprint) = &state {
            verify_store(ctx, session, &mut warnings)?;
            info!(fingerprint = %fingerprint, "secret store ready");
            return Ok(BootstrapReport {
                fingerprint: fingerprint.clone(),
                states,
                actions,
                warnings,
            });
        }
        let (facts, _) = observe(ctx, session)?;
        let step = transition(&state, &facts).map_err(ReconcileError::from)?;
        if let Some(action) = step.action {
            perform(ctx, session, &gnupg, &action)?;
            actions.push(action);
        }
        debug!(from = state.as_str(), to = step.next.as_str(), "bootstrap transition");
        state = step.next;
        states.push(state.as_str());
    }
    bail!("secret bootstrap did not settle after {MAX_TRANSITIONS} transitions")
}

fn observe(ctx: &CommandContext, session: &Session) -> Result<(Facts, String)> {
    let listing = ctx
        .keys()
        .list_secret_keys(session)
        .map_err(|err| ReconcileError::KeyListing(reason(&err)))?;
    let facts = Facts {
        secret_key_present: has_secret_key(&listing),
        fingerprint: first_secret_fingerprint(&listing),
        store_marker_present: store_marker_present(ctx.fs(), &ctx.layout().store_marker()),
    };
    Ok((facts, listing))
}

/// An empty marker counts as absent.
pub(crate) fn store_marker_present(fs: &dyn FileSystem, marker: &Path) -> bool {
    matches!(
        fs.metadata(marker),
        Ok(Some(meta)) if meta.kind == EntryKind::File && meta.len > 0
    )
}

fn perform(
    ctx: &CommandContext,
    session: &Session,
    gnupg: &Path,
    action: &BootstrapAction,
) -> Result<()> {
    match action {
        BootstrapAction::GenerateKey => {
            let spec = ctx.gpg();
            info!(
                name = %spec.name,
                email = %spec.email,
                protected = spec.is_protected(),
                "generating signing key"
            );
            let owner = session
                .run_as()
                .map(|run_as| AccountIds::new(run_as.uid, run_as.gid));
            let batch = BatchFile::create(ctx.fs(), gnupg, &spec.render(), owner)?;
            ctx.keys()
                .generate_key(session, batch.path())
                .map_err(|err| ReconcileError::KeyGeneration(reason(&err)))?;
        }
        BootstrapAction::InitStore(fingerprint) => {
            info!(fingerprint = %fingerprint, "initializing secret store");
            ctx.secrets()
                .init(session, fingerprint)
                .map_err(|err| ReconcileError::StoreInit(reason(&err)))?;
        }
    }
    Ok(())
}

/// The store marker must exist after the machine settles; marker ids
/// without a secret key are reported, never re-initialized.
fn verify_store(
    ctx: &CommandContext,
    session: &Session,
    warnings: &mut Vec<String>,
) -> Result<()> {
    let (facts, listing) = observe(ctx, session)?;
    let marker = ctx.layout().store_marker();
    if !facts.store_marker_present {
        return Err(ReconcileError::StoreInit(format!(
            "{} is missing after initialization",
            marker.display()
        ))
        .into());
    }
    let contents = ctx.fs().read_to_string(&marker).unwrap_or_default();
    for id in contents.lines().map(str::trim).filter(|id| !id.is_empty()) {
        if !secret_key_matches(&listing, id) {
            warn!(id, "store marker names a key without a loadable secret key");
            warnings.push(format!("{} names `{id}` which has no secret key", marker.display()));
        }
    }
    Ok(())
}

/// Removes key generation leftovers and stale agent sockets.
fn sweep_gnupg(fs: &dyn FileSystem, gnupg: &Path, warnings: &mut Vec<String>) {
    let entries = match fs.read_dir(gnupg) {
        Ok(entries) => entries,
        Err(err) => {
            warnings.push(reason(&err));
            return;
        }
    };
    for path in entries {
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if name.starts_with(BATCH_FILE_PREFIX) {
            warn!(path = %path.display(), "removing leftover key generation batch file");
        } else if name.starts_with(AGENT_SOCKET_PREFIX) {
            debug!(path = %path.display(), "removing stale agent socket");
        } else {
            continue;
        }
        if let Err(err) = fs.remove_file(&path) {
            warn!(path = %path.display(), error = %reason(&err), "cleanup failed");
            warnings.push(reason(&err));
        }
    }
}

/// Unattended key generation parameters on disk, removed on drop.
struct BatchFile<'a> {
    fs: &'a dyn FileSystem,
    path: PathBuf,
}

impl<'a> BatchFile<'a> {
    fn create(
        fs: &'a dyn FileSystem,
        dir: &Path,
        contents: &str,
        owner: Option<AccountIds>,
    ) -> Result<Self> {
        let path = dir.join(format!("{BATCH_FILE_PREFIX}{}", unique_suffix(12)));
        fs.write_private(&path, contents.as_bytes())
            .map_err(|err| ReconcileError::KeyGeneration(reason(&err)))?;
        let batch = Self { fs, path };
        if let Some(ids) = owner {
            fs.chown(&batch.path, ids)
                .map_err(|err| ReconcileError::KeyGeneration(reason(&err)))?;
        }
        Ok(batch)
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for BatchFile<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.fs.remove_file(&self.path) {
            warn!(
                path = %self.path.display(),
                error = %reason(&err),
                "failed to remove key generation batch file"
            );
        }
    }
}
