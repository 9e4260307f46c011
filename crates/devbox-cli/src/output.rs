use atty::Stream;
use color_eyre::Result;
use devbox_core::{CommandGroup, CommandInfo, CommandStatus, ExecutionOutcome};
use serde_json::Value;

use crate::style::Style;

#[derive(Clone, Copy, Debug)]
pub struct OutputOptions {
    pub quiet: bool,
    pub json: bool,
    pub no_color: bool,
}

/// Prints the outcome and returns the process exit code.
pub fn emit_output(
    opts: &OutputOptions,
    info: CommandInfo,
    outcome: &ExecutionOutcome,
) -> Result<i32> {
    let code = exit_code(outcome);

    if opts.json {
        let payload = devbox_core::to_json_response(info, outcome);
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(code);
    }

    let style = Style::new(opts.no_color, atty::is(Stream::Stdout));
    if info.group == CommandGroup::Audit {
        if let Some(lines) = render_checks(&style, &outcome.details) {
            if !opts.quiet {
                for line in lines {
                    println!("{line}");
                }
            }
        }
    }

    let message = devbox_core::format_status_message(info, &outcome.message);
    match outcome.status {
        CommandStatus::Ok => {
            if !opts.quiet && !is_passthrough(&outcome.details) {
                println!("{}", style.status(&outcome.status, &message));
            }
        }
        CommandStatus::UserError | CommandStatus::Failure => {
            eprintln!("{}", style.status(&outcome.status, &message));
            if let Some(hint) = hint_from_details(&outcome.details) {
                eprintln!("{}", style.info(&format!("Hint: {hint}")));
            }
        }
    }
    Ok(code)
}

/// A propagated child exit code wins; otherwise the status decides.
pub fn exit_code(outcome: &ExecutionOutcome) -> i32 {
    outcome.exit_code().unwrap_or(match outcome.status {
        CommandStatus::Ok => 0,
        CommandStatus::UserError => 1,
        CommandStatus::Failure => 2,
    })
}

fn render_checks(style: &Style, details: &Value) -> Option<Vec<String>> {
    let checks = details.get("report")?.get("checks")?.as_array()?;
    let lines = checks
        .iter()
        .filter_map(|check| {
            Some(style.check(
                check.get("status")?.as_str()?,
                check.get("name")?.as_str()?,
                check.get("detail").and_then(Value::as_str).unwrap_or_default(),
            ))
        })
        .collect();
    Some(lines)
}

fn hint_from_details(details: &Value) -> Option<&str> {
    details
        .as_object()
        .and_then(|map| map.get("hint"))
        .and_then(Value::as_str)
}

fn is_passthrough(details: &Value) -> bool {
    details
        .as_object()
        .and_then(|map| map.get("passthrough"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}
