use std::path::PathBuf;

use clap::{value_parser, ArgAction, Args, Parser, Subcommand};

pub const DEVBOX_HELP_TEMPLATE: &str =
    "{before-help}\nUsage:\n    {usage}\n\nGlobal options:\n{options}\n";

pub const DEVBOX_BEFORE_HELP: &str = concat!(
    "devbox ",
    env!("CARGO_PKG_VERSION"),
    " – Reproducible development container\n\n",
    "\x1b[1;36mInside the container\x1b[0m\n",
    "  entrypoint       Reconcile identity, volume and secrets, then start the session.\n",
    "  audit            Check that the running devbox is healthy (exit 1 on failure).\n",
    "  ready            Health probe: succeeds once the devbox finished starting.\n\n",
    "\x1b[1;36mOn the host\x1b[0m\n",
    "  up               Build and start the devbox in the background.\n",
    "  work             Start if needed, wait until ready, then attach a shell.\n",
    "  shell            Attach a shell to the running devbox.\n",
    "  status           Show the devbox service state.\n",
    "  validate         Run `devbox audit` inside the running devbox.\n",
    "  down             Stop and remove the devbox containers (volumes are kept).\n",
    "  rebuild          Rebuild the image and recreate the container.\n",
    "  rebuild-nocache  Rebuild without the build cache and recreate the container.\n",
);

#[derive(Parser, Debug)]
#[command(
    name = "devbox",
    author,
    version,
    propagate_version = false,
    disable_help_subcommand = true,
    before_help = DEVBOX_BEFORE_HELP,
    help_template = DEVBOX_HELP_TEMPLATE
)]
#[allow(clippy::struct_excessive_bools)]
pub struct DevboxCli {
    #[arg(
        short,
        long,
        help = "Suppress human output (errors still print to stderr)",
        global = true
    )]
    pub quiet: bool,
    #[arg(
        short,
        long,
        action = ArgAction::Count,
        help = "Increase logging (-vv reaches trace)",
        global = true
    )]
    pub verbose: u8,
    #[arg(long, help = "Force trace logging regardless of -v/-q", global = true)]
    pub trace: bool,
    #[arg(
        long,
        help = "Emit {status,message,details} JSON envelopes",
        global = true
    )]
    pub json: bool,
    #[arg(long, help = "Disable colored human output", global = true)]
    pub no_color: bool,
    #[command(subcommand)]
    pub command: CommandGroupCli,
}

#[derive(Subcommand, Debug)]
pub enum CommandGroupCli {
    #[command(
        about = "Reconcile the container, publish readiness and start the session.",
        override_usage = "devbox entrypoint [-- <COMMAND>...]",
        after_help = "Examples:\n  devbox entrypoint\n  devbox entrypoint -- make test\n"
    )]
    Entrypoint(EntrypointArgs),
    #[command(
        about = "Run every health check and report pass/warn/fail per check.",
        after_help = "Examples:\n  devbox audit\n  devbox --json audit\n"
    )]
    Audit,
    #[command(
        about = "Exit 0 once the readiness marker is published, 1 otherwise.",
        after_help = "Example:\n  devbox ready\n"
    )]
    Ready,
    #[command(about = "Build and start the devbox in the background.")]
    Up(LauncherArgs),
    #[command(about = "Start if needed, wait until ready, then attach a shell.")]
    Work(LauncherArgs),
    #[command(about = "Attach a shell to the running devbox.")]
    Shell(LauncherArgs),
    #[command(about = "Show the devbox service state.")]
    Status(LauncherArgs),
    #[command(about = "Run `devbox audit` inside the running devbox.")]
    Validate(LauncherArgs),
    #[command(about = "Stop and remove the devbox containers; volumes are kept.")]
    Down(LauncherArgs),
    #[command(about = "Rebuild the image and recreate the container.")]
    Rebuild(LauncherArgs),
    #[command(
        name = "rebuild-nocache",
        about = "Rebuild without the build cache and recreate the container."
    )]
    RebuildNocache(LauncherArgs),
}

#[derive(Args, Debug)]
pub struct EntrypointArgs {
    #[arg(
        value_name = "COMMAND",
        trailing_var_arg = true,
        allow_hyphen_values = true,
        help = "Command to run instead of the login shell"
    )]
    pub command: Vec<String>,
}

#[derive(Args, Debug)]
pub struct LauncherArgs {
    #[arg(
        short = 'f',
        long = "file",
        env = "DEVBOX_COMPOSE_FILE",
        value_parser = value_parser!(PathBuf),
        help = "Compose file (defaults to compose.yaml and friends in the current directory)"
    )]
    pub file: Option<PathBuf>,
}
