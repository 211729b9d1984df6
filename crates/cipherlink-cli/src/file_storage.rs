//! Directory-backed secure storage.
//!
//! Layout under the root directory:
//!
//! ```text
//! config.cbor                      EncryptionConfig
//! diagnostics.cbor                 DiagnosticsSnapshot
//! keys/<purpose>-<generation>.der  public key, SPKI DER
//! ```
//!
//! Every write goes to a temporary file first and is renamed into place, so
//! a crash never leaves a half-written record behind.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use cipherlink_core::{
    DiagnosticsSnapshot, EncryptionConfig, KeyPurpose, SecureStorage, StorageError,
};
use serde::{Serialize, de::DeserializeOwned};

const CONFIG_FILE: &str = "config.cbor";
const SNAPSHOT_FILE: &str = "diagnostics.cbor";
const KEYS_DIR: &str = "keys";

/// Storage rooted at a directory.
///
/// Cheap to clone; clones share the directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// Open storage at `root`, creating the directory tree if needed.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the directories cannot be created.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(root.join(KEYS_DIR))
            .await
            .map_err(|e| StorageError::Io(format!("{}: {e}", root.display())))?;
        Ok(Self { root })
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the stored public key for `purpose` and `generation`.
    pub fn public_key_path(&self, purpose: KeyPurpose, generation: u64) -> PathBuf {
        self.root.join(KEYS_DIR).join(format!("{}-{generation}.der", purpose.as_str()))
    }

    async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| StorageError::Io(format!("{}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| StorageError::Io(format!("{}: {e}", path.display())))
    }

    async fn write_cbor<T: Serialize>(&self, file: &str, value: &T) -> Result<(), StorageError> {
        let mut bytes = Vec::new();
        ciborium::into_writer(value, &mut bytes)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.write_atomic(&self.root.join(file), &bytes).await
    }

    async fn read_cbor<T: DeserializeOwned>(&self, file: &str) -> Result<Option<T>, StorageError> {
        let path = self.root.join(file);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::Io(format!("{}: {e}", path.display()))),
        };

        ciborium::from_reader(bytes.as_slice())
            .map(Some)
            .map_err(|e| StorageError::Serialization(format!("{}: {e}", path.display())))
    }
}

#[async_trait]
impl SecureStorage for FileStorage {
    async fn store_public_key(
        &self,
        purpose: KeyPurpose,
        generation: u64,
        spki: &[u8],
    ) -> Result<(), StorageError> {
        self.write_atomic(&self.public_key_path(purpose, generation), spki).await
    }

    async fn load_config(&self) -> Result<Option<EncryptionConfig>, StorageError> {
        self.read_cbor(CONFIG_FILE).await
    }

    async fn store_config(&self, config: &EncryptionConfig) -> Result<(), StorageError> {
        self.write_cbor(CONFIG_FILE, config).await
    }

    async fn store_snapshot(&self, snapshot: &DiagnosticsSnapshot) -> Result<(), StorageError> {
        self.write_cbor(SNAPSHOT_FILE, snapshot).await
    }

    async fn load_snapshot(&self) -> Result<Option<DiagnosticsSnapshot>, StorageError> {
        self.read_cbor(SNAPSHOT_FILE).await
    }
}
