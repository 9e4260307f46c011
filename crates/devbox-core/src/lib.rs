#![deny(clippy::all)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

mod core;

pub(crate) use crate::core::config;
pub(crate) use crate::core::config::context;
pub(crate) use crate::core::runtime::{effects, process, session, timestamp, unique_suffix};
pub(crate) use crate::core::tooling::{diagnostics, outcome};
pub(crate) use crate::core::reconcile;
#[cfg(test)]
pub(crate) use crate::core::test_support;

pub use crate::core::config::context::{CommandContext, CommandInfo};
pub use crate::core::config::{ConfigError, GlobalOptions, Settings};
pub use crate::core::runtime::effects::{Effects, SharedEffects, SystemEffects};
pub use crate::core::runtime::process::RunOutput;
pub use crate::core::runtime::response::{format_status_message, to_json_response};
pub use crate::core::runtime::{CommandGroup, DEVBOX_VERSION};
pub use crate::core::tooling::diagnostics::commands as diag_commands;
pub use crate::core::tooling::outcome::{CommandStatus, ExecutionOutcome, PreconditionError};

pub use crate::core::audit::audit;
pub use crate::core::lifecycle::{
    lifecycle, plan_lifecycle, ComposeStep, LifecycleCommand, LifecycleRequest,
    COMPOSE_FILE_CANDIDATES,
};
pub use crate::core::reconcile::entrypoint::{entrypoint, EntrypointRequest, REQUIRED_PROGRAMS};
pub use crate::core::reconcile::readiness::{is_ready, ready};
pub use crate::core::reconcile::ReconcileError;
