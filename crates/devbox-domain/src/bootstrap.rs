//! The secret bootstrap state machine.
//!
//! States advance only through [`transition`], which is pure: the caller
//! observes [`Facts`] from the key manager and the store marker, performs the
//! returned [`BootstrapAction`], then observes again.

use serde::Serialize;

use crate::fingerprint::Fingerprint;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "fingerprint", rename_all = "snake_case")]
pub enum BootstrapState {
    NoKey,
    HasKey,
    StoreUninitialized(Fingerprint),
    StoreReady(Fingerprint),
}

impl BootstrapState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            BootstrapState::NoKey => "no-key",
            BootstrapState::HasKey => "has-key",
            BootstrapState::StoreUninitialized(_) => "store-uninitialized",
            BootstrapState::StoreReady(_) => "store-ready",
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, BootstrapState::StoreReady(_))
    }
}

/// The side effects the sequencer may perform.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "action", content = "fingerprint", rename_all = "snake_case")]
pub enum BootstrapAction {
    GenerateKey,
    InitStore(Fingerprint),
}

/// What the sequencer observed just before a transition.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Facts {
    pub secret_key_present: bool,
    pub fingerprint: Option<Fingerprint>,
    pub store_marker_present: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Step {
    pub action: Option<BootstrapAction>,
    pub next: BootstrapState,
}

impl Step {
    fn quiet(next: BootstrapState) -> Self {
        Self { action: None, next }
    }

    fn acting(action: BootstrapAction, next: BootstrapState) -> Self {
        Self {
            action: Some(action),
            next,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BootstrapError {
    #[error("a secret key exists but no fingerprint could be derived from the key listing")]
    MissingFingerprint,
    #[error("no secret key present after key generation")]
    KeyNotGenerated,
}

pub fn transition(state: &BootstrapState, facts: &Facts) -> Result<Step, BootstrapError> {
    match state {
        BootstrapState::NoKey if facts.secret_key_present => {
            Ok(Step::quiet(BootstrapState::HasKey))
        }
        BootstrapState::NoKey => Ok(Step::acting(
            BootstrapAction::GenerateKey,
            BootstrapState::HasKey,
        )),
        BootstrapState::HasKey => {
            if !facts.secret_key_present {
                return Err(BootstrapError::KeyNotGenerated);
            }
            let fingerprint = facts
                .fingerprint
                .clone()
                .ok_or(BootstrapError::MissingFingerprint)?;
            if facts.store_marker_present {
                Ok(Step::quiet(BootstrapState::StoreReady(fingerprint)))
            } else {
                Ok(Step::quiet(BootstrapState::StoreUninitialized(fingerprint)))
            }
        }
        BootstrapState::StoreUninitialized(fingerprint) => Ok(Step::acting(
            BootstrapAction::InitStore(fingerprint.clone()),
            BootstrapState::StoreReady(fingerprint.clone()),
        )),
        BootstrapState::StoreReady(_) => Ok(Step::quiet(state.clone())),
    }
}
