#![deny(clippy::all)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

pub mod account;
pub mod audit;
pub mod bootstrap;
pub mod fingerprint;
pub mod keyspec;
pub mod layout;

pub use account::{
    next_free_uid, plan_identity, AccountIds, GroupAction, GroupEntry, IdentityPlan,
    ParseEntryError, PasswdEntry, Relocation, ServiceAccount, DEFAULT_GID, DEFAULT_UID,
    SAFE_UID_FLOOR, SERVICE_ACCOUNT_HOME, SERVICE_ACCOUNT_NAME,
};
pub use audit::{AuditReport, AuditSummary, CheckResult, CheckStatus};
pub use bootstrap::{transition, BootstrapAction, BootstrapError, BootstrapState, Facts, Step};
pub use fingerprint::{
    first_secret_fingerprint, has_secret_key, secret_key_matches, Fingerprint, FingerprintError,
};
pub use keyspec::KeyGenSpec;
pub use layout::{HomeLink, PersistLayout, READY_MARKER_NAME, STORE_MARKER_NAME};
