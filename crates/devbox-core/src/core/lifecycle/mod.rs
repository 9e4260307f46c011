//! Host-side launcher: maps lifecycle commands onto compose invocations.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::context::CommandContext;
use crate::diagnostics::commands;
use crate::effects::path_exists;
use crate::outcome::{ExecutionOutcome, PreconditionError};
use crate::process::Invocation;

pub const COMPOSE_FILE_CANDIDATES: [&str; 4] = [
    "compose.yaml",
    "compose.yml",
    "docker-compose.yaml",
    "docker-compose.yml",
];
pub(crate) const READY_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub(crate) const READY_POLL_ATTEMPTS: usize = 60;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LifecycleCommand {
    Up,
    Work,
    Shell,
    Status,
    Validate,
    Down,
    Rebuild,
    RebuildNocache,
}

impl LifecycleCommand {
    pub const ALL: [LifecycleCommand; 8] = [
        LifecycleCommand::Up,
        LifecycleCommand::Work,
        LifecycleCommand::Shell,
        LifecycleCommand::Status,
        LifecycleCommand::Validate,
        LifecycleCommand::Down,
        LifecycleCommand::Rebuild,
        LifecycleCommand::RebuildNocache,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleCommand::Up => "up",
            LifecycleCommand::Work => "work",
            LifecycleCommand::Shell => "shell",
            LifecycleCommand::Status => "status",
            LifecycleCommand::Validate => "validate",
            LifecycleCommand::Down => "down",
            LifecycleCommand::Rebuild => "rebuild",
            LifecycleCommand::RebuildNocache => "rebuild-nocache",
        }
    }
}

impl FromStr for LifecycleCommand {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|command| command.as_str() == raw)
            .ok_or_else(|| format!("unknown lifecycle command `{raw}`"))
    }
}

#[derive(Clone, Debug)]
pub struct LifecycleRequest {
    pub command: LifecycleCommand,
    /// Explicit compose file; relative paths resolve against `project_dir`.
    pub compose_file: Option<PathBuf>,
    pub project_dir: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "step", content = "args", rename_all = "kebab-case")]
pub enum ComposeStep {
    /// A compose subcommand run with the terminal attached.
    Compose(Vec<String>),
    /// Polls the readiness probe inside the service.
    WaitReady,
}

/// Compose steps for one lifecycle command.
#[must_use]
pub fn plan_lifecycle(
    command: LifecycleCommand,
    service: &str,
    user: &str,
    shell: &str,
) -> Vec<ComposeStep> {
    let compose =
        |args: &[&str]| ComposeStep::Compose(args.iter().map(ToString::to_string).collect());
    match command {
        LifecycleCommand::Up => vec![compose(&["up", "-d", "--build"])],
        LifecycleCommand::Work => vec![
            compose(&["up", "-d"]),
            ComposeStep::WaitReady,
            compose(&["exec", "-u", user, service, shell]),
        ],
        LifecycleCommand::Shell => vec![compose(&["exec", "-u", user, service, shell])],
        LifecycleCommand::Status => vec![compose(&["ps", service])],
        LifecycleCommand::Validate => vec![compose(&[
            "exec", "-T", "-u", user, service, "devbox", "audit",
        ])],
        LifecycleCommand::Down => vec![compose(&["down"])],
        LifecycleCommand::Rebuild => vec![
            compose(&["build", service]),
            compose(&["up", "-d", "--force-recreate"]),
        ],
        LifecycleCommand::RebuildNocache => vec![
            compose(&["build", "--no-cache", service]),
            compose(&["up", "-d", "--force-recreate"]),
        ],
    }
}

/// Runs a lifecycle command through the compose tool.
///
/// # Errors
/// Returns a [`PreconditionError`] when no compose file or compose tool is
/// available; failing compose steps are reported through the outcome.
pub fn lifecycle(ctx: &CommandContext, request: &LifecycleRequest) -> Result<ExecutionOutcome> {
    let file = find_compose_file(ctx, request)?;
    let tool = detect_compose_tool(ctx)?;
    let launcher = ctx.settings().launcher();
    let steps = plan_lifecycle(
        request.command,
        &launcher.service,
        &ctx.account().name,
        &launcher.shell,
    );
    let (program, prefix) = tool
        .split_first()
        .ok_or_else(|| anyhow::anyhow!("compose command is empty"))?;
    let base = Invocation::new(program)
        .args(prefix.iter().cloned())
        .arg("-f")
        .arg(file.display().to_string())
        .cwd(&request.project_dir);
    info!(
        command = request.command.as_str(),
        compose = %tool.join(" "),
        file = %file.display(),
        "running lifecycle command"
    );

    let mut exit_code = 0;
    for step in &steps {
        match step {
            ComposeStep::Compose(args) => {
                let invocation = base.clone().args(args.iter().cloned());
                exit_code = ctx.host().run_passthrough(&invocation)?;
                if exit_code != 0 {
                    warn!(command = %invocation.display(), exit_code, "compose step failed");
                    return Ok(ExecutionOutcome::failure(
                        format!("`{}` exited with {exit_code}", invocation.display()),
                        json!({
                            "code": commands::LIFECYCLE,
                            "command": request.command,
                            "reason": "compose_failed",
                            "steps": steps,
                            "exit_code": exit_code,
                            "passthrough": true,
                        }),
                    ));
                }
            }
            ComposeStep::WaitReady => {
                if !wait_ready(ctx, &base, &launcher.service)? {
                    return Ok(ExecutionOutcome::failure(
                        format!(
                            "service `{}` did not become ready after {} probes",
                            launcher.service, READY_POLL_ATTEMPTS
                        ),
                        json!({
                            "code": commands::LIFECYCLE,
                            "command": request.command,
                            "reason": "not_ready",
                            "steps": steps,
                            "exit_code": 1,
                        }),
                    ));
                }
            }
        }
    }
    Ok(ExecutionOutcome::success(
        format!("{} finished", request.command.as_str()),
        json!({
            "code": commands::LIFECYCLE,
            "command": request.command,
            "compose": tool,
            "file": file.display().to_string(),
            "steps": steps,
            "exit_code": exit_code,
            "passthrough": true,
        }),
    ))
}

fn wait_ready(ctx: &CommandContext, base: &Invocation, service: &str) -> Result<bool> {
    let probe = base
        .clone()
        .args(["exec", "-T", service, "devbox", "ready"]);
    for attempt in 1..=READY_POLL_ATTEMPTS {
        let output = ctx.host().run(&probe)?;
        if output.success() {
            info!(attempt, "service ready");
            return Ok(true);
        }
        debug!(attempt, code = output.code, "service not ready yet");
        if attempt < READY_POLL_ATTEMPTS {
            ctx.host().sleep(READY_POLL_INTERVAL);
        }
    }
    Ok(false)
}

fn find_compose_file(ctx: &CommandContext, request: &LifecycleRequest) -> Result<PathBuf> {
    let fs = ctx.fs();
    if let Some(file) = &request.compose_file {
        let file = absolute(&request.project_dir, file);
        if path_exists(fs, &file) {
            return Ok(file);
        }
        return Err(PreconditionError::new(
            format!("compose file {} does not exist", file.display()),
            json!({
                "code": commands::LIFECYCLE,
                "reason": "compose_file_missing",
                "file": file.display().to_string(),
            }),
        )
        .into());
    }
    COMPOSE_FILE_CANDIDATES
        .iter()
        .map(|name| request.project_dir.join(name))
        .find(|candidate| path_exists(fs, candidate))
        .ok_or_else(|| {
            PreconditionError::new(
                format!("no compose file found in {}", request.project_dir.display()),
                json!({
                    "code": commands::LIFECYCLE,
                    "reason": "compose_file_missing",
                    "searched": COMPOSE_FILE_CANDIDATES,
                    "hint": "pass --file or set DEVBOX_COMPOSE_FILE",
                }),
            )
            .into()
        })
}

fn absolute(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// `DEVBOX_COMPOSE`, then `docker compose`, then `docker-compose`.
fn detect_compose_tool(ctx: &CommandContext) -> Result<Vec<String>> {
    if let Some(tool) = ctx
        .settings()
        .launcher()
        .compose
        .as_ref()
        .filter(|tool| !tool.is_empty())
    {
        debug!(compose = %tool.join(" "), "compose tool from environment");
        return Ok(tool.clone());
    }
    let host = ctx.host();
    if host.find_program("docker").is_some() {
        let probe = Invocation::new("docker").args(["compose", "version"]);
        match host.run(&probe) {
            Ok(output) if output.success() => {
                return Ok(vec!["docker".to_string(), "compose".to_string()]);
            }
            Ok(output) => debug!(code = output.code, "docker compose plugin unavailable"),
            Err(err) => debug!(error = %format!("{err:#}"), "docker compose probe failed"),
        }
    }
    if host.find_program("docker-compose").is_some() {
        return Ok(vec!["docker-compose".to_string()]);
    }
    Err(PreconditionError::new(
        "no compose tool found",
        json!({
            "code": commands::LIFECYCLE,
            "reason": "compose_missing",
            "hint": "install the docker compose plugin or set DEVBOX_COMPOSE",
        }),
    )
    .into())
}
