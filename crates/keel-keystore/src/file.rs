use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use keel_core::{AuthResult, Storage};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

use crate::KeystoreError;

/// Session records in a single JSON file.
///
/// Every write rewrites the file through a sibling temp file and a rename,
/// so a reader never observes a half-written map. Writes from one process
/// are serialized; separate processes are not coordinated.
pub struct FileStorage {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<BTreeMap<String, String>, KeystoreError> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(source) => {
                return Err(KeystoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&contents).map_err(|_| KeystoreError::Corrupt {
            path: self.path.clone(),
        })
    }

    async fn save(&self, entries: &BTreeMap<String, String>) -> Result<(), KeystoreError> {
        let io_err = |source| KeystoreError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let contents = serde_json::to_string_pretty(entries).map_err(|_| KeystoreError::Corrupt {
            path: self.path.clone(),
        })?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, contents).await.map_err(io_err)?;
        restrict_permissions(&tmp).await.map_err(io_err)?;
        fs::rename(&tmp, &self.path).await.map_err(io_err)?;
        Ok(())
    }
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[async_trait]
impl Storage for FileStorage {
    async fn get(&self, key: &str) -> AuthResult<Option<String>> {
        Ok(self.load().await?.remove(key))
    }

    async fn set(&self, key: &str, value: String) -> AuthResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.load().await?;
        entries.insert(key.to_string(), value);
        self.save(&entries).await?;
        debug!(event = "file_entry_stored", path = %self.path.display(), key = %key);
        Ok(())
    }

    async fn delete(&self, key: &str) -> AuthResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.load().await?;
        if entries.remove(key).is_some() {
            self.save(&entries).await?;
        }
        Ok(())
    }
}
