//! Read-mostly health checks of a running devbox.
//!
//! Every check runs even when an earlier one failed; the only mutation is a
//! disposable probe file per volume and one throwaway secret entry.

use std::path::{Path, PathBuf};

use anyhow::Result;
use devbox_domain::{
    first_secret_fingerprint, has_secret_key, secret_key_matches, AccountIds, AuditReport,
    CheckResult, CheckStatus,
};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::context::CommandContext;
use crate::diagnostics::commands;
use crate::effects::{EntryKind, FileSystem};
use crate::outcome::ExecutionOutcome;
use crate::reconcile::bootstrap::store_marker_present;
use crate::reconcile::persist::{PRIVATE_DIR_MODE, PRIVATE_FILE_MODE};
use crate::reconcile::readiness::is_ready;
use crate::reconcile::reason;
use crate::session::Session;
use crate::{timestamp, unique_suffix};

const ROUNDTRIP_PREFIX: &str = "devbox-audit";
const PROBE_PREFIX: &str = ".devbox-probe-";
const MAX_LISTED_PROBLEMS: usize = 5;

/// Runs the full check list and reports the findings.
///
/// # Errors
/// Never fails on findings; failed checks are carried in the outcome.
pub fn audit(ctx: &CommandContext) -> Result<ExecutionOutcome> {
    let report = run_audit(ctx);
    let summary = report.summary();
    let exit_code = report.exit_code();
    let details = json!({
        "code": commands::AUDIT,
        "report": report,
        "summary": summary,
        "exit_code": exit_code,
        "checked_at": timestamp()?,
    });
    if report.has_failures() {
        warn!(failed = summary.failed, "audit found problems");
        Ok(ExecutionOutcome::failure(summary.line(), details))
    } else {
        info!(warnings = summary.warnings, "audit passed");
        Ok(ExecutionOutcome::success(summary.line(), details))
    }
}

pub(crate) fn run_audit(ctx: &CommandContext) -> AuditReport {
    let session = ctx.session();
    let mut report = AuditReport::default();
    report.push(check_tools(ctx));
    report.push(check_account(ctx));
    report.push(check_session(ctx));
    report.push(check_links(ctx));
    report.push(check_gnupg_permissions(ctx));
    for (label, dir) in [
        ("password-store", ctx.layout().password_store().to_path_buf()),
        ("state", ctx.layout().state()),
    ] {
        report.push(check_writable(ctx.fs(), label, &dir));
    }

    let listing = ctx.keys().list_secret_keys(&session);
    report.push(match &listing {
        Ok(listing) if has_secret_key(listing) => {
            CheckResult::pass("secret-key", "secret key present")
        }
        Ok(_) => CheckResult::fail("secret-key", "no secret key in the keyring"),
        Err(err) => {
            CheckResult::fail("secret-key", format!("listing failed: {}", reason(err)))
        }
    });
    let listing = listing.unwrap_or_default();
    report.push(match first_secret_fingerprint(&listing) {
        Some(fingerprint) => CheckResult::pass("fingerprint", fingerprint.to_string()),
        None => CheckResult::fail("fingerprint", "no fingerprint derivable"),
    });
    let store = check_store(ctx, &listing);
    let store_ready = store.status == CheckStatus::Pass;
    report.push(store);
    report.push(if store_ready {
        check_roundtrip(ctx, &session)
    } else {
        CheckResult::fail("secret-roundtrip", "skipped: store not initialized")
    });
    report.push(match ctx.git().credential_helper(&session) {
        Ok(Some(helper)) => CheckResult::pass("git-credential-helper", helper),
        Ok(None) => {
            CheckResult::warn("git-credential-helper", "credential.helper is not configured")
        }
        Err(err) => CheckResult::warn("git-credential-helper", reason(&err)),
    });
    let marker = ctx.layout().ready_marker();
    report.push(if is_ready(ctx.fs(), ctx.layout()) {
        CheckResult::pass("readiness-marker", marker.display().to_string())
    } else {
        CheckResult::fail("readiness-marker", format!("{} is absent", marker.display()))
    });
    report
}

fn check_tools(ctx: &CommandContext) -> CheckResult {
    let missing: Vec<&str> = ["gpg", "pass"]
        .into_iter()
        .filter(|program| ctx.host().find_program(program).is_none())
        .collect();
    if !missing.is_empty() {
        return CheckResult::fail("tools", format!("missing: {}", missing.join(", ")));
    }
    if ctx.host().find_program("git").is_none() {
        return CheckResult::warn("tools", "git is not on PATH");
    }
    CheckResult::pass("tools", "gpg, pass, git")
}

fn check_account(ctx: &CommandContext) -> CheckResult {
    let account = ctx.account();
    let users = match ctx.accounts().users() {
        Ok(users) => users,
        Err(err) => return CheckResult::fail("account", reason(&err)),
    };
    match users.iter().find(|user| user.name == account.name) {
        None => CheckResult::fail("account", format!("`{}` does not exist", account.name)),
        Some(user) if AccountIds::new(user.uid, user.gid) == account.ids => {
            CheckResult::pass("account", format!("{} {}", account.name, account.ids))
        }
        Some(user) => CheckResult::fail(
            "account",
            format!(
                "`{}` is {}:{}, expected {}",
                account.name, user.uid, user.gid, account.ids
            ),
        ),
    }
}

fn check_session(ctx: &CommandContext) -> CheckResult {
    let euid = ctx.host().effective_uid();
    let expected = ctx.account().ids.uid;
    if euid == expected {
        CheckResult::pass("session", format!("running as uid {euid}"))
    } else {
        CheckResult::warn(
            "session",
            format!("running as uid {euid}, expected {expected}"),
        )
    }
}

fn check_links(ctx: &CommandContext) -> CheckResult {
    let fs = ctx.fs();
    let mut problems = Vec::new();
    for link in ctx.layout().home_links(ctx.account()) {
        let linked = matches!(
            fs.symlink_metadata(&link.link),
            Ok(Some(meta)) if meta.kind == EntryKind::Symlink
        ) && fs.read_link(&link.link).ok().as_deref() == Some(link.target.as_path());
        if !linked {
            problems.push(format!(
                "{} does not point at {}",
                link.link.display(),
                link.target.display()
            ));
        }
    }
    if problems.is_empty() {
        CheckResult::pass("links", "home links resolve into the volume")
    } else {
        CheckResult::fail("links", problems.join("; "))
    }
}

fn check_gnupg_permissions(ctx: &CommandContext) -> CheckResult {
    let root = ctx.layout().gnupg();
    match ctx.fs().symlink_metadata(&root) {
        Ok(Some(meta)) if meta.kind == EntryKind::Dir => {}
        Ok(_) => {
            return CheckResult::fail(
                "gnupg-permissions",
                format!("{} is not a directory", root.display()),
            )
        }
        Err(err) => return CheckResult::fail("gnupg-permissions", reason(&err)),
    }
    let mut problems = Vec::new();
    inspect_private_tree(ctx.fs(), &root, ctx.account().ids, &mut problems);
    if problems.is_empty() {
        return CheckResult::pass("gnupg-permissions", "owner-only modes, owned by the account");
    }
    let total = problems.len();
    problems.truncate(MAX_LISTED_PROBLEMS);
    let mut detail = problems.join("; ");
    if total > MAX_LISTED_PROBLEMS {
        detail.push_str(&format!(" (+{} more)", total - MAX_LISTED_PROBLEMS));
    }
    CheckResult::fail("gnupg-permissions", detail)
}

fn inspect_private_tree(
    fs: &dyn FileSystem,
    path: &Path,
    ids: AccountIds,
    problems: &mut Vec<String>,
) {
    let meta = match fs.symlink_metadata(path) {
        Ok(Some(meta)) => meta,
        Ok(None) => return,
        Err(err) => {
            problems.push(reason(&err));
            return;
        }
    };
    if meta.kind != EntryKind::Symlink && meta.ids() != ids {
        problems.push(format!("{} is owned by {}", path.display(), meta.ids()));
    }
    let expected = match meta.kind {
        EntryKind::Dir => Some(PRIVATE_DIR_MODE),
        EntryKind::File => Some(PRIVATE_FILE_MODE),
        // agent sockets carry their own modes
        EntryKind::Symlink | EntryKind::Other => None,
    };
    if let Some(expected) = expected {
        if meta.mode != expected {
            problems.push(format!(
                "{} has mode {:o}, expected {expected:o}",
                path.display(),
                meta.mode
            ));
        }
    }
    if meta.kind == EntryKind::Dir {
        match fs.read_dir(path) {
            Ok(children) => {
                for child in children {
                    inspect_private_tree(fs, &child, ids, problems);
                }
            }
            Err(err) => problems.push(reason(&err)),
        }
    }
}

fn check_writable(fs: &dyn FileSystem, label: &str, dir: &Path) -> CheckResult {
    let name = format!("volume-writable:{label}");
    let probe: PathBuf = dir.join(format!("{PROBE_PREFIX}{}", unique_suffix(8)));
    if let Err(err) = fs.write_private(&probe, b"probe") {
        return CheckResult::fail(name, format!("{}: {}", dir.display(), reason(&err)));
    }
    if let Err(err) = fs.remove_file(&probe) {
        return CheckResult::fail(
            name,
            format!("probe {} left behind: {}", probe.display(), reason(&err)),
        );
    }
    CheckResult::pass(name, dir.display().to_string())
}

fn check_store(ctx: &CommandContext, listing: &str) -> CheckResult {
    let marker = ctx.layout().store_marker();
    if !store_marker_present(ctx.fs(), &marker) {
        return CheckResult::fail(
            "store-initialized",
            format!("{} is missing or empty", marker.display()),
        );
    }
    let contents = match ctx.fs().read_to_string(&marker) {
        Ok(contents) => contents,
        Err(err) => return CheckResult::fail("store-initialized", reason(&err)),
    };
    let ids: Vec<&str> = contents
        .lines()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .collect();
    let unknown: Vec<&str> = ids
        .iter()
        .copied()
        .filter(|id| !secret_key_matches(listing, id))
        .collect();
    if ids.is_empty() {
        CheckResult::fail("store-initialized", format!("{} names no key", marker.display()))
    } else if unknown.is_empty() {
        CheckResult::pass("store-initialized", ids.join(", "))
    } else {
        CheckResult::fail(
            "store-initialized",
            format!("no secret key for {}", unknown.join(", ")),
        )
    }
}

fn check_roundtrip(ctx: &CommandContext, session: &Session) -> CheckResult {
    let entry = format!("{ROUNDTRIP_PREFIX}/{}", unique_suffix(12));
    let value = unique_suffix(24);
    debug!(entry = %entry, "secret round trip");
    match roundtrip(ctx, session, &entry, &value) {
        Ok(()) => CheckResult::pass("secret-roundtrip", "insert, show and remove succeeded"),
        Err(detail) => match clean_up(ctx, session, &entry) {
            Ok(()) => CheckResult::fail("secret-roundtrip", detail),
            Err(leftover) => {
                CheckResult::fail("secret-roundtrip", format!("{detail}; {leftover}"))
            }
        },
    }
}

/// Removes the throwaway entry after a failed round trip, if it was written.
fn clean_up(
    ctx: &CommandContext,
    session: &Session,
    entry: &str,
) -> std::result::Result<(), String> {
    let secrets = ctx.secrets();
    if matches!(secrets.show(session, entry), Ok(None)) {
        return Ok(());
    }
    secrets.remove(session, entry).map_err(|err| {
        warn!(entry, error = %reason(&err), "round-trip cleanup failed");
        format!("{entry} was left in the store: {}", reason(&err))
    })
}

fn roundtrip(
    ctx: &CommandContext,
    session: &Session,
    entry: &str,
    value: &str,
) -> std::result::Result<(), String> {
    let secrets = ctx.secrets();
    secrets
        .insert(session, entry, value)
        .map_err(|err| format!("insert failed: {}", reason(&err)))?;
    match secrets.show(session, entry) {
        Ok(Some(shown)) if shown.trim_end_matches('\n') == value => {}
        Ok(Some(_)) => return Err("show returned a different value".to_string()),
        Ok(None) => return Err("show could not read the entry back".to_string()),
        Err(err) => return Err(format!("show failed: {}", reason(&err))),
    }
    secrets
        .remove(session, entry)
        .map_err(|err| format!("remove failed: {}", reason(&err)))?;
    match secrets.show(session, entry) {
        Ok(None) | Err(_) => Ok(()),
        Ok(Some(_)) => Err("entry still readable after removal".to_string()),
    }
}
