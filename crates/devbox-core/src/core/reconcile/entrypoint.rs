//! Container entrypoint: preconditions, the reconciliation sequence, then the
//! session process.

use anyhow::Result;
use serde::Serialize;
use serde_json::json;
use tracing::{error, info};

use super::bootstrap::{bootstrap_secrets, BootstrapReport};
use super::credentials::{preseed_credentials, SeedOutcome};
use super::identity::{reconcile_identity, IdentityReport};
use super::persist::{link_persistent_state, PersistReport};
use super::readiness::{clear_marker, publish_marker};
use crate::context::CommandContext;
use crate::diagnostics::commands;
use crate::outcome::{ExecutionOutcome, PreconditionError};
use crate::process::Invocation;

pub const REQUIRED_PROGRAMS: [&str; 6] =
    ["gpg", "gpgconf", "pass", "usermod", "groupmod", "groupadd"];
const FALLBACK_SHELL: &str = "/bin/sh";

#[derive(Clone, Debug, Default)]
pub struct EntrypointRequest {
    /// Trailing command; empty means a login shell.
    pub command: Vec<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ReconcileSummary {
    pub(crate) identity: IdentityReport,
    pub(crate) persist: PersistReport,
    pub(crate) bootstrap: BootstrapReport,
    pub(crate) credentials: SeedOutcome,
}

/// Runs the start sequence and replaces the process with the session.
///
/// # Errors
/// Returns a [`PreconditionError`] when the container cannot be reconciled
/// at all; reconciliation failures are reported through the outcome.
pub fn entrypoint(ctx: &CommandContext, request: &EntrypointRequest) -> Result<ExecutionOutcome> {
    check_preconditions(ctx)?;
    let summary = match reconcile(ctx) {
        Ok(summary) => summary,
        Err(err) => {
            error!(error = %format!("{err:#}"), "reconciliation failed; devbox stays not-ready");
            return Ok(ExecutionOutcome::failure(
                format!("reconciliation failed: {err:#}"),
                json!({
                    "code": commands::RECONCILE,
                    "reason": "reconcile_failed",
                    "exit_code": 1,
                }),
            ));
        }
    };

    let invocation = session_command(ctx, request);
    info!(command = %invocation.display(), "starting session");
    match ctx.host().exec(&invocation) {
        Ok(()) => Ok(ExecutionOutcome::success(
            "session finished",
            json!({
                "code": commands::ENTRYPOINT,
                "command": invocation.display(),
                "reconcile": summary,
            }),
        )),
        Err(err) => Ok(ExecutionOutcome::failure(
            format!("{err:#}"),
            json!({
                "code": commands::ENTRYPOINT,
                "reason": "exec_failed",
                "command": invocation.display(),
                "exit_code": 127,
            }),
        )),
    }
}

/// Everything that must hold before anything is mutated.
pub(crate) fn check_preconditions(ctx: &CommandContext) -> Result<()> {
    let euid = ctx.host().effective_uid();
    if euid != 0 {
        return Err(PreconditionError::new(
            "devbox entrypoint must run as root",
            json!({
                "code": commands::ENTRYPOINT,
                "reason": "not_root",
                "euid": euid,
            }),
        )
        .into());
    }
    let missing: Vec<&str> = REQUIRED_PROGRAMS
        .iter()
        .copied()
        .filter(|program| ctx.host().find_program(program).is_none())
        .collect();
    if !missing.is_empty() {
        return Err(PreconditionError::new(
            format!("required programs missing from PATH: {}", missing.join(", ")),
            json!({
                "code": commands::ENTRYPOINT,
                "reason": "missing_programs",
                "missing": missing,
            }),
        )
        .into());
    }
    let name = &ctx.account().name;
    if !ctx.accounts().users()?.iter().any(|user| &user.name == name) {
        return Err(PreconditionError::new(
            format!("account `{name}` is missing from the image"),
            json!({
                "code": commands::ENTRYPOINT,
                "reason": "missing_account",
                "account": name,
            }),
        )
        .into());
    }
    Ok(())
}

/// The strict start sequence. The readiness marker is absent from the first
/// step until the last one has succeeded.
pub(crate) fn reconcile(ctx: &CommandContext) -> Result<ReconcileSummary> {
    clear_marker(ctx.fs(), ctx.layout())?;
    let identity = reconcile_identity(ctx)?;
    let persist = link_persistent_state(ctx)?;
    let session = ctx.session();
    let bootstrap = bootstrap_secrets(ctx, &session)?;
    let credentials = preseed_credentials(ctx, &session);
    publish_marker(ctx.fs(), ctx.layout(), ctx.account().ids)?;
    Ok(ReconcileSummary {
        identity,
        persist,
        bootstrap,
        credentials,
    })
}

fn session_command(ctx: &CommandContext, request: &EntrypointRequest) -> Invocation {
    let (program, args) = match request.command.split_first() {
        Some((program, args)) => (program.clone(), args.to_vec()),
        None => (login_shell(ctx), vec!["-l".to_string()]),
    };
    ctx.session()
        .command(&program, args)
        .cwd(&ctx.account().home)
}

fn login_shell(ctx: &CommandContext) -> String {
    let name = &ctx.account().name;
    ctx.accounts()
        .users()
        .ok()
        .and_then(|users| users.into_iter().find(|user| &user.name == name))
        .map(|user| user.shell)
        .filter(|shell| !shell.trim().is_empty())
        .unwrap_or_else(|| FALLBACK_SHELL.to_string())
}
