use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::account::ServiceAccount;

pub const READY_MARKER_NAME: &str = "devbox_ready";
pub const STORE_MARKER_NAME: &str = ".gpg-id";
pub const HISTORY_FILE_NAME: &str = "zsh_history";

/// Paths on the durable volume.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PersistLayout {
    root: PathBuf,
    password_store: PathBuf,
}

impl PersistLayout {
    /// Layout with the secret store at its default location under `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let password_store = root.join("password-store");
        Self {
            root,
            password_store,
        }
    }

    #[must_use]
    pub fn with_password_store(mut self, path: impl Into<PathBuf>) -> Self {
        self.password_store = path.into();
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn gnupg(&self) -> PathBuf {
        self.root.join("gnupg")
    }

    #[must_use]
    pub fn password_store(&self) -> &Path {
        &self.password_store
    }

    #[must_use]
    pub fn state(&self) -> PathBuf {
        self.root.join("state")
    }

    #[must_use]
    pub fn history_file(&self) -> PathBuf {
        self.state().join(HISTORY_FILE_NAME)
    }

    #[must_use]
    pub fn ready_marker(&self) -> PathBuf {
        self.state().join(READY_MARKER_NAME)
    }

    #[must_use]
    pub fn store_marker(&self) -> PathBuf {
        self.password_store.join(STORE_MARKER_NAME)
    }

    /// The durable directories, in creation order.
    #[must_use]
    pub fn directories(&self) -> [PathBuf; 3] {
        [self.gnupg(), self.password_store.clone(), self.state()]
    }

    #[must_use]
    pub fn home_links(&self, account: &ServiceAccount) -> Vec<HomeLink> {
        vec![
            HomeLink {
                name: "gnupg",
                link: account.home_path(".gnupg"),
                target: self.gnupg(),
            },
            HomeLink {
                name: "password-store",
                link: account.home_path(".password-store"),
                target: self.password_store.clone(),
            },
            HomeLink {
                name: "history",
                link: account.home_path(".zsh_history"),
                target: self.history_file(),
            },
        ]
    }
}

/// A home-directory shortcut into the durable volume.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HomeLink {
    pub name: &'static str,
    pub link: PathBuf,
    pub target: PathBuf,
}
