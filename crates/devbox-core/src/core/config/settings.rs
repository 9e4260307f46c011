use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};

use devbox_domain::{
    AccountIds, KeyGenSpec, PersistLayout, ServiceAccount, DEFAULT_GID, DEFAULT_UID,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PERSIST_DIR: &str = "/persist";
pub const DEFAULT_GPG_NAME: &str = "Devbox User";
pub const DEFAULT_GPG_EMAIL: &str = "dev@devbox.local";
pub const DEFAULT_SERVICE: &str = "devbox";
pub const DEFAULT_SHELL: &str = "zsh";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalOptions {
    pub quiet: bool,
    pub verbose: u8,
    pub trace: bool,
    pub json: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    pub(crate) fn capture() -> Self {
        Self {
            vars: env::vars().collect(),
        }
    }

    /// Value of `key`, treating an empty variable as unset.
    pub(crate) fn var(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    #[cfg(test)]
    pub(crate) fn testing(pairs: &[(&str, &str)]) -> Self {
        let vars = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Self { vars }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be a numeric id, got `{value}`")]
    InvalidId { var: &'static str, value: String },
    #[error("{var} must not be 0; the session account cannot be root")]
    PrivilegedId { var: &'static str },
    #[error("{var} must be an absolute path, got `{value}`")]
    RelativePath { var: &'static str, value: String },
}

/// A code-review host credential for `git credential approve`.
#[derive(Clone, PartialEq, Eq)]
pub struct GitCredential {
    pub host: String,
    pub username: String,
    pub password: String,
}

impl GitCredential {
    /// The credential in git's `key=value` helper protocol.
    #[must_use]
    pub fn to_protocol_input(&self) -> String {
        format!(
            "protocol=https\nhost={}\nusername={}\npassword={}\n\n",
            self.host, self.username, self.password
        )
    }
}

impl fmt::Debug for GitCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitCredential")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSeed {
    Absent,
    /// Some variables are set; carries the names of the missing ones.
    Partial(Vec<&'static str>),
    Complete(GitCredential),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LauncherConfig {
    /// Compose program override, already split on whitespace.
    pub compose: Option<Vec<String>>,
    pub service: String,
    pub shell: String,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub(crate) account: ServiceAccount,
    pub(crate) layout: PersistLayout,
    pub(crate) gpg: KeyGenSpec,
    pub(crate) gerrit: CredentialSeed,
    pub(crate) launcher: LauncherConfig,
}

impl Settings {
    pub(crate) fn from_snapshot(snapshot: &EnvSnapshot) -> Result<Self, ConfigError> {
        let ids = AccountIds::new(
            parse_id(snapshot, "USER_ID", DEFAULT_UID)?,
            parse_id(snapshot, "GROUP_ID", DEFAULT_GID)?,
        );
        let root = absolute_path(snapshot, "PERSIST_DIR")?
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PERSIST_DIR));
        let mut layout = PersistLayout::new(root);
        if let Some(store) = absolute_path(snapshot, "PASSWORD_STORE_DIR")? {
            layout = layout.with_password_store(store);
        }
        let gpg = KeyGenSpec::new(
            snapshot.var("GPG_NAME").unwrap_or(DEFAULT_GPG_NAME),
            snapshot.var("GPG_EMAIL").unwrap_or(DEFAULT_GPG_EMAIL),
        )
        .with_passphrase(snapshot.var("GPG_PASSPHRASE").map(ToOwned::to_owned));
        Ok(Self {
            account: ServiceAccount::new(ids),
            layout,
            gpg,
            gerrit: credential_seed(snapshot),
            launcher: LauncherConfig {
                compose: snapshot.var("DEVBOX_COMPOSE").map(|raw| {
                    raw.split_whitespace().map(ToOwned::to_owned).collect()
                }),
                service: snapshot
                    .var("DEVBOX_SERVICE")
                    .unwrap_or(DEFAULT_SERVICE)
                    .to_string(),
                shell: snapshot
                    .var("DEVBOX_SHELL")
                    .unwrap_or(DEFAULT_SHELL)
                    .to_string(),
            },
        })
    }

    #[must_use]
    pub fn account(&self) -> &ServiceAccount {
        &self.account
    }

    #[must_use]
    pub fn layout(&self) -> &PersistLayout {
        &self.layout
    }

    #[must_use]
    pub fn gpg(&self) -> &KeyGenSpec {
        &self.gpg
    }

    #[must_use]
    pub fn gerrit(&self) -> &CredentialSeed {
        &self.gerrit
    }

    #[must_use]
    pub fn launcher(&self) -> &LauncherConfig {
        &self.launcher
    }
}

fn parse_id(snapshot: &EnvSnapshot, var: &'static str, default: u32) -> Result<u32, ConfigError> {
    let Some(raw) = snapshot.var(var) else {
        return Ok(default);
    };
    let id = raw
        .trim()
        .parse::<u32>()
        .map_err(|_| ConfigError::InvalidId {
            var,
            value: raw.to_string(),
        })?;
    if id == 0 {
        return Err(ConfigError::PrivilegedId { var });
    }
    Ok(id)
}

fn absolute_path(
    snapshot: &EnvSnapshot,
    var: &'static str,
) -> Result<Option<PathBuf>, ConfigError> {
    match snapshot.var(var) {
        None => Ok(None),
        Some(raw) if Path::new(raw).is_absolute() => Ok(Some(PathBuf::from(raw))),
        Some(raw) => Err(ConfigError::RelativePath {
            var,
            value: raw.to_string(),
        }),
    }
}

const GERRIT_VARS: [&str; 3] = ["GERRIT_HOST", "GERRIT_USERNAME", "GERRIT_PAT"];

fn credential_seed(snapshot: &EnvSnapshot) -> CredentialSeed {
    let values: Vec<Option<&str>> = GERRIT_VARS.iter().map(|var| snapshot.var(var)).collect();
    match values.as_slice() {
        [Some(host), Some(username), Some(password)] => CredentialSeed::Complete(GitCredential {
            host: (*host).to_string(),
            username: (*username).to_string(),
            password: (*password).to_string(),
        }),
        _ if values.iter().all(Option::is_none) => CredentialSeed::Absent,
        _ => CredentialSeed::Partial(
            GERRIT_VARS
                .iter()
                .zip(&values)
                .filter(|(_, value)| value.is_none())
                .map(|(var, _)| *var)
                .collect(),
        ),
    }
}
