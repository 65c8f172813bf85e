use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::{AuthError, AuthResult, SESSION_KEY_PREFIX};

/// Fields of one session, keyed by the names in [`crate::session_fields`].
pub type SessionRecord = BTreeMap<String, String>;

/// Key-value backend holding session records.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn get(&self, key: &str) -> AuthResult<Option<String>>;
    async fn set(&self, key: &str, value: String) -> AuthResult<()>;
    async fn delete(&self, key: &str) -> AuthResult<()>;
}

#[derive(Default)]
pub struct InMemoryStorage {
    entries: RwLock<HashMap<String, String>>,
}

impl InMemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn get(&self, key: &str) -> AuthResult<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> AuthResult<()> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> AuthResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// Session-scoped view over a [`Storage`] backend.
///
/// Each session is one JSON object stored under `keel:session:<id>`;
/// writes merge fields into it.
#[derive(Clone)]
pub struct StorageUtility {
    storage: Arc<dyn Storage>,
}

impl StorageUtility {
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    #[must_use]
    pub fn user_key(session_id: &str) -> String {
        format!("{SESSION_KEY_PREFIX}{session_id}")
    }

    pub async fn get_for_user(&self, session_id: &str) -> AuthResult<Option<SessionRecord>> {
        let Some(raw) = self.storage.get(&Self::user_key(session_id)).await? else {
            return Ok(None);
        };
        let record = serde_json::from_str::<SessionRecord>(&raw).map_err(|_| {
            AuthError::storage(format!("session [{session_id}] record is not a JSON object"))
        })?;
        Ok(Some(record))
    }

    pub async fn get_for_user_key(
        &self,
        session_id: &str,
        key: &str,
    ) -> AuthResult<Option<String>> {
        Ok(self
            .get_for_user(session_id)
            .await?
            .and_then(|mut record| record.remove(key)))
    }

    /// Merges `fields` into the session record in a single backend write.
    pub async fn set_for_user(&self, session_id: &str, fields: &[(&str, &str)]) -> AuthResult<()> {
        let mut record = self.get_for_user(session_id).await?.unwrap_or_default();
        for (key, value) in fields {
            record.insert((*key).to_string(), (*value).to_string());
        }
        self.write_record(session_id, &record).await?;
        debug!(
            event = "session_fields_set",
            session_id = %session_id,
            fields = ?fields.iter().map(|(key, _)| *key).collect::<Vec<_>>()
        );
        Ok(())
    }

    pub async fn delete_for_user(&self, session_id: &str, key: &str) -> AuthResult<()> {
        let Some(mut record) = self.get_for_user(session_id).await? else {
            return Ok(());
        };
        if record.remove(key).is_some() {
            self.write_record(session_id, &record).await?;
        }
        Ok(())
    }

    pub async fn delete_all_user_data(&self, session_id: &str) -> AuthResult<()> {
        self.storage.delete(&Self::user_key(session_id)).await?;
        debug!(event = "session_deleted", session_id = %session_id);
        Ok(())
    }

    /// Puts the session back to `record`, deleting it when `record` is `None`.
    pub async fn restore_for_user(
        &self,
        session_id: &str,
        record: Option<&SessionRecord>,
    ) -> AuthResult<()> {
        match record {
            Some(record) => self.write_record(session_id, record).await,
            None => self.delete_all_user_data(session_id).await,
        }
    }

    async fn write_record(&self, session_id: &str, record: &SessionRecord) -> AuthResult<()> {
        let raw = serde_json::to_string(record)
            .map_err(|err| AuthError::storage(format!("failed to encode session record: {err}")))?;
        self.storage.set(&Self::user_key(session_id), raw).await
    }
}
