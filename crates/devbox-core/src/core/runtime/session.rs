use devbox_domain::{PersistLayout, ServiceAccount};

use super::process::{Invocation, RunAs};

/// How commands reach the service account: its environment and, when the
/// caller is privileged, a uid/gid switch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    run_as: Option<RunAs>,
    env: Vec<(String, String)>,
}

impl Session {
    #[must_use]
    pub fn for_account(
        account: &ServiceAccount,
        layout: &PersistLayout,
        switch_user: bool,
    ) -> Self {
        let home = account.home.display().to_string();
        let env = vec![
            ("HOME".to_string(), home),
            ("USER".to_string(), account.name.clone()),
            ("LOGNAME".to_string(), account.name.clone()),
            (
                "GNUPGHOME".to_string(),
                account.home_path(".gnupg").display().to_string(),
            ),
            (
                "PASSWORD_STORE_DIR".to_string(),
                layout.password_store().display().to_string(),
            ),
        ];
        let run_as = switch_user.then_some(RunAs {
            uid: account.ids.uid,
            gid: account.ids.gid,
        });
        Self { run_as, env }
    }

    #[must_use]
    pub fn run_as(&self) -> Option<RunAs> {
        self.run_as
    }

    #[must_use]
    pub fn env(&self) -> &[(String, String)] {
        &self.env
    }

    #[must_use]
    pub fn var(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn command<I, S>(&self, program: &str, args: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Invocation::new(program)
            .args(args)
            .envs(&self.env)
            .run_as(self.run_as)
    }
}
