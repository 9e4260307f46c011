use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const SERVICE_ACCOUNT_NAME: &str = "dev";
pub const SERVICE_ACCOUNT_HOME: &str = "/home/dev";
pub const DEFAULT_UID: u32 = 1000;
pub const DEFAULT_GID: u32 = 1000;
/// Colliding accounts are moved to the first unused uid at or above this.
pub const SAFE_UID_FLOOR: u32 = 2000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountIds {
    pub uid: u32,
    pub gid: u32,
}

impl AccountIds {
    #[must_use]
    pub const fn new(uid: u32, gid: u32) -> Self {
        Self { uid, gid }
    }
}

impl fmt::Display for AccountIds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.uid, self.gid)
    }
}

impl Default for AccountIds {
    fn default() -> Self {
        Self::new(DEFAULT_UID, DEFAULT_GID)
    }
}

/// The fixed-name account the container session runs as.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAccount {
    pub name: String,
    pub home: PathBuf,
    pub ids: AccountIds,
}

impl ServiceAccount {
    #[must_use]
    pub fn new(ids: AccountIds) -> Self {
        Self {
            name: SERVICE_ACCOUNT_NAME.to_string(),
            home: PathBuf::from(SERVICE_ACCOUNT_HOME),
            ids,
        }
    }

    #[must_use]
    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = home.into();
        self
    }

    #[must_use]
    pub fn home_path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.home.join(relative)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseEntryError {
    #[error("line {line}: expected {expected} fields, found {found}")]
    FieldCount {
        line: usize,
        expected: usize,
        found: usize,
    },
    #[error("line {line}: invalid {field} value `{value}`")]
    InvalidId {
        line: usize,
        field: &'static str,
        value: String,
    },
}

/// One `/etc/passwd` record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswdEntry {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub home: PathBuf,
    pub shell: String,
}

impl PasswdEntry {
    pub fn parse_line(raw: &str, line: usize) -> Result<Self, ParseEntryError> {
        let fields: Vec<&str> = raw.split(':').collect();
        if fields.len() != 7 {
            return Err(ParseEntryError::FieldCount {
                line,
                expected: 7,
                found: fields.len(),
            });
        }
        Ok(Self {
            name: fields[0].to_string(),
            uid: parse_id(fields[2], "uid", line)?,
            gid: parse_id(fields[3], "gid", line)?,
            home: PathBuf::from(fields[5]),
            shell: fields[6].to_string(),
        })
    }

    pub fn parse_all(contents: &str) -> Result<Vec<Self>, ParseEntryError> {
        records(contents)
            .map(|(line, raw)| Self::parse_line(raw, line))
            .collect()
    }
}

/// One `/etc/group` record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupEntry {
    pub name: String,
    pub gid: u32,
    pub members: Vec<String>,
}

impl GroupEntry {
    pub fn parse_line(raw: &str, line: usize) -> Result<Self, ParseEntryError> {
        let fields: Vec<&str> = raw.split(':').collect();
        if fields.len() != 4 {
            return Err(ParseEntryError::FieldCount {
                line,
                expected: 4,
                found: fields.len(),
            });
        }
        let members = fields[3]
            .split(',')
            .map(str::trim)
            .filter(|member| !member.is_empty())
            .map(ToString::to_string)
            .collect();
        Ok(Self {
            name: fields[0].to_string(),
            gid: parse_id(fields[2], "gid", line)?,
            members,
        })
    }

    pub fn parse_all(contents: &str) -> Result<Vec<Self>, ParseEntryError> {
        records(contents)
            .map(|(line, raw)| Self::parse_line(raw, line))
            .collect()
    }
}

fn records(contents: &str) -> impl Iterator<Item = (usize, &str)> {
    contents
        .lines()
        .enumerate()
        .map(|(idx, raw)| (idx + 1, raw.trim_end()))
        .filter(|(_, raw)| !raw.is_empty() && !raw.starts_with('#'))
}

fn parse_id(raw: &str, field: &'static str, line: usize) -> Result<u32, ParseEntryError> {
    raw.trim()
        .parse::<u32>()
        .map_err(|_| ParseEntryError::InvalidId {
            line,
            field,
            value: raw.to_string(),
        })
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GroupAction {
    /// A group already carries the target gid.
    Keep,
    Rename { name: String, gid: u32 },
    Create { name: String, gid: u32 },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Relocation {
    pub name: String,
    pub from: u32,
    pub to: u32,
}

/// Ordered changes that move the account database to the requested ids.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IdentityPlan {
    pub group: GroupAction,
    pub relocations: Vec<Relocation>,
    pub set_uid: Option<u32>,
    pub set_gid: Option<u32>,
}

impl IdentityPlan {
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.group == GroupAction::Keep
            && self.relocations.is_empty()
            && self.set_uid.is_none()
            && self.set_gid.is_none()
    }
}

/// Lowest id at or above `floor` that is absent from `taken`.
pub fn next_free_uid(taken: impl IntoIterator<Item = u32>, floor: u32) -> Option<u32> {
    let taken: BTreeSet<u32> = taken.into_iter().collect();
    let mut candidate = floor;
    while taken.contains(&candidate) {
        candidate = candidate.checked_add(1)?;
    }
    Some(candidate)
}

/// Plans the account database changes for `current` to end on `target`.
///
/// Returns `None` only when the uid space above [`SAFE_UID_FLOOR`] is
/// exhausted and a colliding account cannot be moved.
pub fn plan_identity(
    current: &PasswdEntry,
    target: AccountIds,
    users: &[PasswdEntry],
    groups: &[GroupEntry],
) -> Option<IdentityPlan> {
    let group = if groups.iter().any(|group| group.gid == target.gid) {
        GroupAction::Keep
    } else if groups.iter().any(|group| group.name == current.name) {
        GroupAction::Rename {
            name: current.name.clone(),
            gid: target.gid,
        }
    } else {
        GroupAction::Create {
            name: current.name.clone(),
            gid: target.gid,
        }
    };

    let mut taken: Vec<u32> = users.iter().map(|user| user.uid).collect();
    taken.push(target.uid);
    let mut relocations = Vec::new();
    for other in users
        .iter()
        .filter(|user| user.uid == target.uid && user.name != current.name)
    {
        let to = next_free_uid(taken.iter().copied(), SAFE_UID_FLOOR)?;
        taken.push(to);
        relocations.push(Relocation {
            name: other.name.clone(),
            from: other.uid,
            to,
        });
    }

    Some(IdentityPlan {
        group,
        relocations,
        set_uid: (current.uid != target.uid).then_some(target.uid),
        set_gid: (current.gid != target.gid).then_some(target.gid),
    })
}
