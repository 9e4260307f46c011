//! Parsing of `gpg --with-colons` key listings.

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FingerprintError {
    #[error("fingerprint is empty")]
    Empty,
    #[error("fingerprint `{0}` must be 40 or 64 hexadecimal characters")]
    Malformed(String),
}

/// Hex fingerprint of an OpenPGP key, normalised to upper case.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Fingerprint {
    type Err = FingerprintError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(FingerprintError::Empty);
        }
        let valid_len = matches!(trimmed.len(), 40 | 64);
        if !valid_len || !trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(FingerprintError::Malformed(trimmed.to_string()));
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

const KEY_RECORDS: [&str; 4] = ["sec", "ssb", "pub", "sub"];

fn record_type(line: &str) -> &str {
    line.split(':').next().unwrap_or_default()
}

/// True when the listing contains at least one secret key record.
pub fn has_secret_key(listing: &str) -> bool {
    listing.lines().any(|line| record_type(line) == "sec")
}

/// Fingerprint of the first secret key in a colon listing.
///
/// The `fpr` record must follow the first `sec` record before any other key
/// record; a subkey fingerprint is never returned.
pub fn first_secret_fingerprint(listing: &str) -> Option<Fingerprint> {
    let mut in_secret = false;
    for line in listing.lines() {
        let kind = record_type(line);
        if kind == "sec" {
            if in_secret {
                return None;
            }
            in_secret = true;
            continue;
        }
        if !in_secret {
            continue;
        }
        if KEY_RECORDS.contains(&kind) {
            return None;
        }
        if kind == "fpr" {
            return line.split(':').nth(9).and_then(|raw| raw.parse().ok());
        }
    }
    None
}

/// True when `id` names a secret key in the listing.
///
/// `id` may be a full fingerprint, a long or short key id (matched as a
/// fingerprint suffix), or an email address from one of the key's user ids,
/// the forms `pass init` accepts.
pub fn secret_key_matches(listing: &str, id: &str) -> bool {
    let id = id.trim();
    if id.is_empty() {
        return false;
    }
    let wanted = id.to_ascii_uppercase();
    let is_hex = wanted.chars().all(|c| c.is_ascii_hexdigit());
    let mut in_secret = false;
    for line in listing.lines() {
        let kind = record_type(line);
        match kind {
            "sec" | "ssb" => in_secret = true,
            "pub" | "sub" => in_secret = false,
            "fpr" if in_secret && is_hex => {
                let fpr = line.split(':').nth(9).unwrap_or_default();
                if fpr.to_ascii_uppercase().ends_with(&wanted) {
                    return true;
                }
            }
            "uid" if in_secret => {
                let user_id = line.split(':').nth(9).unwrap_or_default();
                if user_id.contains(&format!("<{id}>")) || user_id == id {
                    return true;
                }
            }
            _ => {}
        }
    }
    false
}
