use std::path::PathBuf;
use std::sync::Arc;

use keel_core::{AuthError, Storage};

mod file;
mod os_keyring;

pub use file::FileStorage;
pub use os_keyring::KeyringStorage;

pub const DEFAULT_KEYRING_SERVICE: &str = "keel";

#[derive(thiserror::Error, Debug)]
pub enum KeystoreError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt session file {path}")]
    Corrupt { path: PathBuf },
    #[error("keyring error: {message}")]
    Keyring { message: String },
}

impl From<KeystoreError> for AuthError {
    fn from(value: KeystoreError) -> Self {
        AuthError::storage(value.to_string())
    }
}

/// Where session records are persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    File(PathBuf),
    Keyring { service: String },
}

pub fn open_storage(backend: &StorageBackend) -> Arc<dyn Storage> {
    match backend {
        StorageBackend::File(path) => Arc::new(FileStorage::new(path.clone())),
        StorageBackend::Keyring { service } => Arc::new(KeyringStorage::new(service)),
    }
}
