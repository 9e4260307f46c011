use serde::Serialize;
use tracing::{info, warn};

use super::reason;
use crate::config::CredentialSeed;
use crate::context::CommandContext;
use crate::session::Session;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub(crate) enum SeedOutcome {
    NotConfigured,
    Incomplete { missing: Vec<&'static str> },
    /// `git credential approve` succeeds without any helper but stores nothing.
    NoHelper { host: String },
    Seeded { host: String, helper: String },
    Failed { host: String, reason: String },
}

/// Hands the code-review credential to git's helper. Never fails the start.
pub(crate) fn preseed_credentials(ctx: &CommandContext, session: &Session) -> SeedOutcome {
    match ctx.settings().gerrit() {
        CredentialSeed::Absent => SeedOutcome::NotConfigured,
        CredentialSeed::Partial(missing) => {
            warn!(missing = ?missing, "skipping credential pre-seeding; variables unset");
            SeedOutcome::Incomplete {
                missing: missing.clone(),
            }
        }
        CredentialSeed::Complete(credential) => {
            let host = credential.host.clone();
            let helper = match ctx.git().credential_helper(session) {
                Ok(Some(helper)) => helper,
                Ok(None) => {
                    warn!(host = %host, "credential not seeded: no credential.helper configured");
                    return SeedOutcome::NoHelper { host };
                }
                Err(err) => {
                    warn!(host = %host, error = %reason(&err), "credential helper lookup failed");
                    return SeedOutcome::Failed {
                        host,
                        reason: reason(&err),
                    };
                }
            };
            match ctx.git().approve_credential(session, credential) {
                Ok(()) => {
                    info!(
                        host = %host,
                        user = %credential.username,
                        helper = %helper,
                        "credential pre-seeded"
                    );
                    SeedOutcome::Seeded { host, helper }
                }
                Err(err) => {
                    warn!(host = %host, error = %reason(&err), "credential pre-seeding failed");
                    SeedOutcome::Failed {
                        host,
                        reason: reason(&err),
                    }
                }
            }
        }
    }
}
