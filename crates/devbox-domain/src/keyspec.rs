use std::fmt;

/// Unattended key generation parameters for `gpg --batch --gen-key`.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyGenSpec {
    pub name: String,
    pub email: String,
    pub passphrase: Option<String>,
    pub key_length: u32,
}

impl KeyGenSpec {
    pub const DEFAULT_KEY_LENGTH: u32 = 4096;

    #[must_use]
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            passphrase: None,
            key_length: Self::DEFAULT_KEY_LENGTH,
        }
    }

    /// An empty passphrase means an unprotected key.
    #[must_use]
    pub fn with_passphrase(mut self, passphrase: Option<String>) -> Self {
        self.passphrase = passphrase.filter(|value| !value.is_empty());
        self
    }

    #[must_use]
    pub fn is_protected(&self) -> bool {
        self.passphrase.is_some()
    }

    #[must_use]
    pub fn render(&self) -> String {
        let protection = match &self.passphrase {
            Some(passphrase) => format!("Passphrase: {passphrase}"),
            None => "%no-protection".to_string(),
        };
        let lines = [
            "%echo Generating devbox signing key".to_string(),
            "Key-Type: RSA".to_string(),
            format!("Key-Length: {}", self.key_length),
            "Subkey-Type: RSA".to_string(),
            format!("Subkey-Length: {}", self.key_length),
            format!("Name-Real: {}", self.name),
            format!("Name-Email: {}", self.email),
            "Expire-Date: 0".to_string(),
            protection,
            "%commit".to_string(),
            "%echo done".to_string(),
        ];
        let mut rendered = lines.join("\n");
        rendered.push('\n');
        rendered
    }
}

// The passphrase never reaches logs.
impl fmt::Debug for KeyGenSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyGenSpec")
            .field("name", &self.name)
            .field("email", &self.email)
            .field("protected", &self.is_protected())
            .field("key_length", &self.key_length)
            .finish()
    }
}
