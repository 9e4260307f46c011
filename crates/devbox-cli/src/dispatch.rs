use color_eyre::{eyre::eyre, Result};
use devbox_core::{
    CommandContext, CommandGroup, CommandInfo, ConfigError, EntrypointRequest, ExecutionOutcome,
    LifecycleCommand, LifecycleRequest, PreconditionError,
};
use serde_json::json;

use crate::cli::{CommandGroupCli, LauncherArgs};

pub fn dispatch_command(
    ctx: &CommandContext,
    group: &CommandGroupCli,
) -> Result<(CommandInfo, ExecutionOutcome)> {
    let info = command_info(group);
    match group {
        CommandGroupCli::Entrypoint(args) => {
            let request = EntrypointRequest {
                command: args.command.clone(),
            };
            core_call(info, || devbox_core::entrypoint(ctx, &request))
        }
        CommandGroupCli::Audit => core_call(info, || devbox_core::audit(ctx)),
        CommandGroupCli::Ready => core_call(info, || devbox_core::ready(ctx)),
        launcher => {
            let (command, args) = lifecycle_command(launcher)
                .ok_or_else(|| eyre!("`{}` is not a lifecycle command", info.name))?;
            let request = LifecycleRequest {
                command,
                compose_file: args.file.clone(),
                project_dir: std::env::current_dir()?,
            };
            core_call(info, || devbox_core::lifecycle(ctx, &request))
        }
    }
}

pub fn command_info(group: &CommandGroupCli) -> CommandInfo {
    match group {
        CommandGroupCli::Entrypoint(_) => {
            CommandInfo::new(CommandGroup::Entrypoint, "entrypoint")
        }
        CommandGroupCli::Audit => CommandInfo::new(CommandGroup::Audit, "audit"),
        CommandGroupCli::Ready => CommandInfo::new(CommandGroup::Ready, "ready"),
        _ => {
            let name =
                lifecycle_command(group).map_or("lifecycle", |(command, _)| command.as_str());
            CommandInfo::new(CommandGroup::Lifecycle, name)
        }
    }
}

fn lifecycle_command(group: &CommandGroupCli) -> Option<(LifecycleCommand, &LauncherArgs)> {
    let pair = match group {
        CommandGroupCli::Up(args) => (LifecycleCommand::Up, args),
        CommandGroupCli::Work(args) => (LifecycleCommand::Work, args),
        CommandGroupCli::Shell(args) => (LifecycleCommand::Shell, args),
        CommandGroupCli::Status(args) => (LifecycleCommand::Status, args),
        CommandGroupCli::Validate(args) => (LifecycleCommand::Validate, args),
        CommandGroupCli::Down(args) => (LifecycleCommand::Down, args),
        CommandGroupCli::Rebuild(args) => (LifecycleCommand::Rebuild, args),
        CommandGroupCli::RebuildNocache(args) => (LifecycleCommand::RebuildNocache, args),
        CommandGroupCli::Entrypoint(_) | CommandGroupCli::Audit | CommandGroupCli::Ready => {
            return None
        }
    };
    Some(pair)
}

/// Outcome for a context that could not be built from the environment.
pub fn config_error_outcome(err: &anyhow::Error) -> ExecutionOutcome {
    match err.downcast_ref::<ConfigError>() {
        Some(config) => ExecutionOutcome::user_error(
            config.to_string(),
            json!({
                "reason": "invalid_config",
                "hint": "Fix the environment variable and re-run the command.",
            }),
        ),
        None => internal_error(err),
    }
}

fn core_call<F>(info: CommandInfo, action: F) -> Result<(CommandInfo, ExecutionOutcome)>
where
    F: FnOnce() -> anyhow::Result<ExecutionOutcome>,
{
    match action() {
        Ok(outcome) => Ok((info, outcome)),
        Err(err) => {
            if let Some(user) = err.downcast_ref::<PreconditionError>() {
                let message = user.message().to_string();
                let outcome = ExecutionOutcome::user_error(message, user.details().clone());
                Ok((info, outcome))
            } else if err.downcast_ref::<ConfigError>().is_some() {
                Ok((info, config_error_outcome(&err)))
            } else {
                Ok((info, internal_error(&err)))
            }
        }
    }
}

fn internal_error(err: &anyhow::Error) -> ExecutionOutcome {
    let issues: Vec<String> = err.chain().map(std::string::ToString::to_string).collect();
    ExecutionOutcome::failure(
        err.to_string(),
        json!({
            "reason": "internal_error",
            "error": err.to_string(),
            "issues": issues,
            "hint": "Re-run with `-vv` for more detail.",
        }),
    )
}
