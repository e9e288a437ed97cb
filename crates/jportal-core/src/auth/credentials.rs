use anyhow::{Context, Result};
use keyring::Entry;

const SERVICE_NAME: &str = "jportal";

/// Portal passwords kept in the OS keychain, keyed by username.
pub struct CredentialStore;

impl CredentialStore {
    /// Store username and password in the OS keychain
    pub fn store(username: &str, password: &str) -> Result<()> {
        Self::entry(username)?
            .set_password(password)
            .context("Failed to store password in keychain")
    }

    /// Retrieve password for a username from the OS keychain
    pub fn get_password(username: &str) -> Result<String> {
        Self::entry(username)?
            .get_password()
            .context("Failed to retrieve password from keychain")
    }

    /// Delete stored credentials for a username
    pub fn delete(username: &str) -> Result<()> {
        Self::entry(username)?
            .delete_credential()
            .context("Failed to delete credential from keychain")
    }

    /// Check if credentials exist for a username
    pub fn has_credentials(username: &str) -> bool {
        Self::entry(username)
            .map(|entry| entry.get_password().is_ok())
            .unwrap_or(false)
    }

    fn entry(username: &str) -> Result<Entry> {
        Entry::new(SERVICE_NAME, username).context("Failed to create keyring entry")
    }
}
