//! Container start reconciliation: identity, durable state, secrets, readiness.

use std::path::PathBuf;

use devbox_domain::BootstrapError;

pub(crate) mod bootstrap;
pub(crate) mod credentials;
pub(crate) mod entrypoint;
pub(crate) mod identity;
pub(crate) mod persist;
pub(crate) mod readiness;

/// Failures that abort reconciliation and leave the readiness marker absent.
#[derive(thiserror::Error, Debug)]
pub enum ReconcileError {
    #[error("account `{0}` is missing from the account database")]
    MissingAccount(String),
    #[error("no free uid at or above {floor} to relocate accounts holding uid {uid}")]
    UidSpaceExhausted { uid: u32, floor: u32 },
    #[error("failed to give group `{name}` gid {gid}: {reason}")]
    Group {
        name: String,
        gid: u32,
        reason: String,
    },
    #[error("failed to set uid of `{name}` to {uid}: {reason}")]
    SetUid {
        name: String,
        uid: u32,
        reason: String,
    },
    #[error("failed to set primary gid of `{name}` to {gid}: {reason}")]
    SetGid {
        name: String,
        gid: u32,
        reason: String,
    },
    #[error("`{name}` holds {found} after reconciliation, expected {expected}")]
    IdentityMismatch {
        name: String,
        found: String,
        expected: String,
    },
    #[error("uid {uid} is still shared with {others:?}")]
    UidShared { uid: u32, others: Vec<String> },
    #[error("failed to prepare {}: {reason}", path.display())]
    Volume { path: PathBuf, reason: String },
    #[error("failed to link {} to {}: {reason}", link.display(), target.display())]
    Link {
        link: PathBuf,
        target: PathBuf,
        reason: String,
    },
    #[error("failed to clear readiness marker {}: {reason}", path.display())]
    ClearMarker { path: PathBuf, reason: String },
    #[error("failed to publish readiness marker {}: {reason}", path.display())]
    PublishMarker { path: PathBuf, reason: String },
    #[error("failed to list secret keys: {0}")]
    KeyListing(String),
    #[error("key generation failed: {0}")]
    KeyGeneration(String),
    #[error("secret store initialization failed: {0}")]
    StoreInit(String),
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
}

/// Flattens an adapter error chain into one line.
pub(crate) fn reason(err: &anyhow::Error) -> String {
    format!("{err:#}")
}
