use anyhow::Context;
use tutorcall_providers::CredentialSource;

/// Keyring service name. Changing it orphans stored tokens.
const SERVICE: &str = "tutorcall";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretKey {
    SessionToken,
}

impl SecretKey {
    fn user(self) -> &'static str {
        match self {
            SecretKey::SessionToken => "session_token",
        }
    }
}

pub fn set_secret(key: SecretKey, value: &str) -> anyhow::Result<()> {
    let entry = keyring::Entry::new(SERVICE, key.user()).context("create keyring entry")?;
    entry.set_password(value).context("set secret")
}

pub fn get_secret(key: SecretKey) -> anyhow::Result<Option<String>> {
    let entry = keyring::Entry::new(SERVICE, key.user()).context("create keyring entry")?;

    match entry.get_password() {
        Ok(v) => Ok(Some(v)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(e) => Err(anyhow::Error::new(e)).context("get secret"),
    }
}

pub fn delete_secret(key: SecretKey) -> anyhow::Result<()> {
    let entry = keyring::Entry::new(SERVICE, key.user()).context("create keyring entry")?;
    match entry.delete_credential() {
        Ok(()) => Ok(()),
        Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(anyhow::Error::new(e)).context("delete secret"),
    }
}

/// Session token source for the channel and REST lookups.
///
/// An explicit override (from a flag or environment variable) wins; otherwise the
/// keyring is read on every call so a fresh `login` is picked up on reconnect.
#[derive(Clone, Default)]
pub struct KeyringCredentials {
    override_token: Option<String>,
}

impl KeyringCredentials {
    pub fn new(override_token: Option<String>) -> Self {
        Self {
            override_token: override_token.filter(|t| !t.trim().is_empty()),
        }
    }
}

impl std::fmt::Debug for KeyringCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyringCredentials")
            .field("override_token", &self.override_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl CredentialSource for KeyringCredentials {
    fn token(&self) -> Option<String> {
        if let Some(t) = &self.override_token {
            return Some(t.clone());
        }
        match get_secret(SecretKey::SessionToken) {
            Ok(t) => t,
            Err(e) => {
                log::warn!("session token unavailable: {e:#}");
                None
            }
        }
    }
}
