use async_trait::async_trait;
use keel_core::{AuthResult, Storage};
use keyring::Entry;
use tracing::{debug, warn};

use crate::KeystoreError;

/// Session records kept in the platform credential store, one entry per key.
pub struct KeyringStorage {
    service: String,
}

impl KeyringStorage {
    pub fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry, KeystoreError> {
        Entry::new(&self.service, key).map_err(|err| KeystoreError::Keyring {
            message: err.to_string(),
        })
    }
}

#[async_trait]
impl Storage for KeyringStorage {
    async fn get(&self, key: &str) -> AuthResult<Option<String>> {
        let entry = self.entry(key)?;
        match entry.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(KeystoreError::Keyring {
                message: format!("failed to load entry '{key}': {err}"),
            }
            .into()),
        }
    }

    async fn set(&self, key: &str, value: String) -> AuthResult<()> {
        let entry = self.entry(key)?;
        entry
            .set_password(&value)
            .map_err(|err| KeystoreError::Keyring {
                message: format!("failed to store entry '{key}': {err}"),
            })?;
        debug!(event = "keyring_entry_stored", service = %self.service, key = %key);
        Ok(())
    }

    async fn delete(&self, key: &str) -> AuthResult<()> {
        let entry = self.entry(key)?;
        match entry.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(err) => {
                warn!(event = "keyring_delete_failed", service = %self.service, key = %key, error = %err);
                Err(KeystoreError::Keyring {
                    message: format!("failed to delete entry '{key}': {err}"),
                }
                .into())
            }
        }
    }
}
