use anyhow::Result;
use devbox_domain::{KeyGenSpec, PersistLayout, ServiceAccount};

use crate::config::{EnvSnapshot, GlobalOptions, Settings};
use crate::effects::{self, Effects, SharedEffects};
use crate::session::Session;
use crate::CommandGroup;

#[derive(Clone, Copy, Debug)]
pub struct CommandInfo {
    pub group: CommandGroup,
    pub name: &'static str,
}

impl CommandInfo {
    #[must_use]
    pub const fn new(group: CommandGroup, name: &'static str) -> Self {
        Self { group, name }
    }
}

pub struct CommandContext<'a> {
    pub global: &'a GlobalOptions,
    settings: Settings,
    effects: SharedEffects,
}

impl<'a> CommandContext<'a> {
    /// Creates a command context from the process environment.
    ///
    /// # Errors
    /// Returns a [`crate::ConfigError`] when the environment holds invalid values.
    pub fn new(global: &'a GlobalOptions, effects: SharedEffects) -> Result<Self> {
        Self::from_snapshot(global, &EnvSnapshot::capture(), effects)
    }

    pub(crate) fn from_snapshot(
        global: &'a GlobalOptions,
        snapshot: &EnvSnapshot,
        effects: SharedEffects,
    ) -> Result<Self> {
        let settings = Settings::from_snapshot(snapshot)?;
        Ok(Self {
            global,
            settings,
            effects,
        })
    }

    pub fn effects(&self) -> &dyn Effects {
        self.effects.as_ref()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn account(&self) -> &ServiceAccount {
        &self.settings.account
    }

    pub fn layout(&self) -> &PersistLayout {
        &self.settings.layout
    }

    pub fn gpg(&self) -> &KeyGenSpec {
        &self.settings.gpg
    }

    pub fn fs(&self) -> &dyn effects::FileSystem {
        self.effects.fs()
    }

    pub fn accounts(&self) -> &dyn effects::AccountDirectory {
        self.effects.accounts()
    }

    pub fn keys(&self) -> &dyn effects::KeyManager {
        self.effects.keys()
    }

    pub fn secrets(&self) -> &dyn effects::SecretStore {
        self.effects.secrets()
    }

    pub fn git(&self) -> &dyn effects::GitClient {
        self.effects.git()
    }

    pub fn host(&self) -> &dyn effects::Host {
        self.effects.host()
    }

    /// Session for commands that must run as the service account.
    ///
    /// A privileged caller switches to the account's ids; anyone else runs
    /// commands under their own identity with the account's environment.
    pub fn session(&self) -> Session {
        let privileged = self.host().effective_uid() == 0;
        Session::for_account(self.account(), self.layout(), privileged)
    }
}
