use std::sync::Arc;

use clap::Parser;
use color_eyre::Result;
use devbox_core::{CommandContext, GlobalOptions, SharedEffects, SystemEffects};

mod cli;
mod dispatch;
mod output;
mod style;

use cli::DevboxCli;
use dispatch::{command_info, config_error_outcome, dispatch_command};
use output::{emit_output, OutputOptions};

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = match DevboxCli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // usage errors exit 1, help and version exit 0
            let code = i32::from(err.use_stderr());
            err.print()?;
            std::process::exit(code);
        }
    };
    init_tracing(cli.trace, cli.verbose, cli.quiet);

    let global = GlobalOptions {
        quiet: cli.quiet,
        verbose: cli.verbose,
        trace: cli.trace,
        json: cli.json,
    };
    let effects: SharedEffects = Arc::new(SystemEffects::new());
    let (info, outcome) = match CommandContext::new(&global, effects) {
        Ok(ctx) => dispatch_command(&ctx, &cli.command)?,
        Err(err) => (command_info(&cli.command), config_error_outcome(&err)),
    };

    let opts = OutputOptions {
        quiet: cli.quiet,
        json: cli.json,
        no_color: cli.no_color,
    };
    let code = emit_output(&opts, info, &outcome)?;
    if code == 0 {
        Ok(())
    } else {
        std::process::exit(code);
    }
}

fn init_tracing(trace: bool, verbose: u8, quiet: bool) {
    let level = if trace {
        "trace"
    } else if quiet {
        "warn"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = format!("devbox={level},devbox_core={level},devbox_cli={level}");
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}
