use anyhow::Result;
use devbox_domain::{plan_identity, GroupAction, IdentityPlan, PasswdEntry, SAFE_UID_FLOOR};
use serde::Serialize;
use tracing::{info, warn};

use super::{reason, ReconcileError};
use crate::context::CommandContext;

#[derive(Debug, Serialize)]
pub(crate) struct IdentityReport {
    pub(crate) plan: IdentityPlan,
    pub(crate) warnings: Vec<String>,
}

/// Moves the service account to the configured uid/gid.
pub(crate) fn reconcile_identity(ctx: &CommandContext) -> Result<IdentityReport> {
    let account = ctx.account();
    let target = account.ids;
    let accounts = ctx.accounts();
    let users = accounts.users()?;
    let groups = accounts.groups()?;
    let current = find_account(&users, &account.name)?;
    let plan = plan_identity(current, target, &users, &groups).ok_or(
        ReconcileError::UidSpaceExhausted {
            uid: target.uid,
            floor: SAFE_UID_FLOOR,
        },
    )?;
    if plan.is_noop() {
        info!(
            account = %account.name,
            uid = target.uid,
            gid = target.gid,
            "identity already reconciled"
        );
        return Ok(IdentityReport {
            plan,
            warnings: Vec::new(),
        });
    }

    match &plan.group {
        GroupAction::Keep => {}
        GroupAction::Rename { name, gid } => {
            info!(group = %name, gid, "renumbering group");
            accounts
                .set_group_gid(name, *gid)
                .map_err(|err| ReconcileError::Group {
                    name: name.clone(),
                    gid: *gid,
                    reason: reason(&err),
                })?;
        }
        GroupAction::Create { name, gid } => {
            info!(group = %name, gid, "creating group");
            accounts
                .create_group(name, *gid)
                .map_err(|err| ReconcileError::Group {
                    name: name.clone(),
                    gid: *gid,
                    reason: reason(&err),
                })?;
        }
    }

    let mut warnings = Vec::new();
    for relocation in &plan.relocations {
        info!(
            account = %relocation.name,
            from = relocation.from,
            to = relocation.to,
            "relocating account holding the target uid"
        );
        if let Err(err) = accounts.set_user_uid(&relocation.name, relocation.to) {
            warn!(account = %relocation.name, error = %reason(&err), "relocation failed");
            warnings.push(format!(
                "could not move `{}` to uid {}: {}",
                relocation.name,
                relocation.to,
                reason(&err)
            ));
        }
    }

    if let Some(uid) = plan.set_uid {
        info!(account = %account.name, uid, "setting uid");
        accounts
            .set_user_uid(&account.name, uid)
            .map_err(|err| ReconcileError::SetUid {
                name: account.name.clone(),
                uid,
                reason: reason(&err),
            })?;
    }
    if let Some(gid) = plan.set_gid {
        info!(account = %account.name, gid, "setting primary gid");
        accounts
            .set_user_gid(&account.name, gid)
            .map_err(|err| ReconcileError::SetGid {
                name: account.name.clone(),
                gid,
                reason: reason(&err),
            })?;
    }

    verify(&accounts.users()?, &account.name, target.uid, target.gid)?;
    Ok(IdentityReport { plan, warnings })
}

fn find_account<'a>(users: &'a [PasswdEntry], name: &str) -> Result<&'a PasswdEntry> {
    users
        .iter()
        .find(|user| user.name == name)
        .ok_or_else(|| ReconcileError::MissingAccount(name.to_string()).into())
}

fn verify(users: &[PasswdEntry], name: &str, uid: u32, gid: u32) -> Result<()> {
    let current = find_account(users, name)?;
    if current.uid != uid || current.gid != gid {
        return Err(ReconcileError::IdentityMismatch {
            name: name.to_string(),
            found: format!("{}:{}", current.uid, current.gid),
            expected: format!("{uid}:{gid}"),
        }
        .into());
    }
    let others: Vec<String> = users
        .iter()
        .filter(|user| user.uid == uid && user.name != name)
        .map(|user| user.name.clone())
        .collect();
    if !others.is_empty() {
        return Err(ReconcileError::UidShared { uid, others }.into());
    }
    Ok(())
}
