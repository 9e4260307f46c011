//! Process execution and the effect adapters every handler goes through.

use std::fmt;

use anyhow::Result;
use rand::{distributions::Alphanumeric, thread_rng, Rng};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

pub mod effects;
pub mod process;
pub mod response;
pub mod session;

pub const DEVBOX_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandGroup {
    Entrypoint,
    Audit,
    Ready,
    Lifecycle,
}

impl CommandGroup {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CommandGroup::Entrypoint => "entrypoint",
            CommandGroup::Audit => "audit",
            CommandGroup::Ready => "ready",
            CommandGroup::Lifecycle => "lifecycle",
        }
    }
}

impl fmt::Display for CommandGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Random alphanumeric suffix for disposable file and entry names.
pub(crate) fn unique_suffix(len: usize) -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

pub(crate) fn timestamp() -> Result<String> {
    Ok(OffsetDateTime::now_utc().format(&Rfc3339)?)
}
