//! Secure storage abstraction.
//!
//! The engine persists public keys, its configuration and a diagnostics
//! snapshot through [`SecureStorage`]. Private keys and session keys are never
//! handed to storage.
//!
//! Storage is best effort: the engine logs failures and carries on. Calls are
//! async and are never made while the engine holds one of its locks.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{config::EncryptionConfig, keys::KeyPurpose, stats::EncryptionStats};

/// Errors from a storage backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Backend I/O failed
    #[error("storage I/O error: {0}")]
    Io(String),

    /// Stored bytes could not be encoded or decoded
    #[error("storage serialization error: {0}")]
    Serialization(String),

    /// Injected by [`ChaoticStorage`]
    #[error("injected storage failure: {0}")]
    Injected(&'static str),
}

/// State persisted for restart diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticsSnapshot {
    /// Live sessions when the snapshot was taken
    pub active_sessions: u64,
    /// Stats at that time
    pub stats: EncryptionStats,
    /// Capture time, ms since the Unix epoch
    pub captured_at_ms: u64,
}

/// Persistence backend for non-secret engine state.
///
/// Implementations share state across clones (typically via `Arc`).
#[async_trait]
pub trait SecureStorage: Send + Sync + 'static {
    /// Store the public key of `purpose` for key generation `generation`.
    async fn store_public_key(
        &self,
        purpose: KeyPurpose,
        generation: u64,
        spki: &[u8],
    ) -> Result<(), StorageError>;

    /// Load the persisted configuration. `None` if never stored.
    async fn load_config(&self) -> Result<Option<EncryptionConfig>, StorageError>;

    /// Overwrite the persisted configuration.
    async fn store_config(&self, config: &EncryptionConfig) -> Result<(), StorageError>;

    /// Overwrite the diagnostics snapshot.
    async fn store_snapshot(&self, snapshot: &DiagnosticsSnapshot) -> Result<(), StorageError>;

    /// Load the diagnostics snapshot. `None` if never stored.
    async fn load_snapshot(&self) -> Result<Option<DiagnosticsSnapshot>, StorageError>;
}

/// In-memory storage for tests and embedding.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<MemoryStorageInner>>,
}

#[derive(Default)]
struct MemoryStorageInner {
    /// (purpose, generation) -> SPKI DER
    public_keys: HashMap<(KeyPurpose, u64), Vec<u8>>,
    config: Option<EncryptionConfig>,
    snapshot: Option<DiagnosticsSnapshot>,
}

impl MemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryStorageInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stored public key, if any.
    pub fn public_key(&self, purpose: KeyPurpose, generation: u64) -> Option<Vec<u8>> {
        self.lock().public_keys.get(&(purpose, generation)).cloned()
    }

    /// Number of stored public keys across generations.
    pub fn public_key_count(&self) -> usize {
        self.lock().public_keys.len()
    }
}

#[async_trait]
impl SecureStorage for MemoryStorage {
    async fn store_public_key(
        &self,
        purpose: KeyPurpose,
        generation: u64,
        spki: &[u8],
    ) -> Result<(), StorageError> {
        self.lock().public_keys.insert((purpose, generation), spki.to_vec());
        Ok(())
    }

    async fn load_config(&self) -> Result<Option<EncryptionConfig>, StorageError> {
        Ok(self.lock().config.clone())
    }

    async fn store_config(&self, config: &EncryptionConfig) -> Result<(), StorageError> {
        self.lock().config = Some(config.clone());
        Ok(())
    }

    async fn store_snapshot(&self, snapshot: &DiagnosticsSnapshot) -> Result<(), StorageError> {
        self.lock().snapshot = Some(snapshot.clone());
        Ok(())
    }

    async fn load_snapshot(&self) -> Result<Option<DiagnosticsSnapshot>, StorageError> {
        Ok(self.lock().snapshot.clone())
    }
}

/// Storage wrapper that fails a fraction of operations.
///
/// Delegates to `inner` but fails each call with probability `failure_rate`,
/// drawn from a seeded LCG so runs are reproducible. Used to check that the
/// engine keeps working when storage does not.
#[derive(Clone)]
pub struct ChaoticStorage<S> {
    inner: S,
    failure_rate: f64,
    rng: Arc<Mutex<u64>>,
}

impl<S: SecureStorage> ChaoticStorage<S> {
    /// Wrap `inner`. `failure_rate` is clamped to `[0.0, 1.0]`.
    pub fn with_seed(inner: S, failure_rate: f64, seed: u64) -> Self {
        Self { inner, failure_rate: failure_rate.clamp(0.0, 1.0), rng: Arc::new(Mutex::new(seed)) }
    }

    fn roll(&self, operation: &'static str) -> Result<(), StorageError> {
        // LCG constants from Numerical Recipes
        const A: u64 = 1_664_525;
        const C: u64 = 1_013_904_223;
        const M: u64 = 1u64 << 32;

        let mut state = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        *state = A.wrapping_mul(*state).wrapping_add(C) % M;
        let sample = *state as f64 / M as f64;

        if sample < self.failure_rate { Err(StorageError::Injected(operation)) } else { Ok(()) }
    }
}

#[async_trait]
impl<S: SecureStorage> SecureStorage for ChaoticStorage<S> {
    async fn store_public_key(
        &self,
        purpose: KeyPurpose,
        generation: u64,
        spki: &[u8],
    ) -> Result<(), StorageError> {
        self.roll("store_public_key")?;
        self.inner.store_public_key(purpose, generation, spki).await
    }

    async fn load_config(&self) -> Result<Option<EncryptionConfig>, StorageError> {
        self.roll("load_config")?;
        self.inner.load_config().await
    }

    async fn store_config(&self, config: &EncryptionConfig) -> Result<(), StorageError> {
        self.roll("store_config")?;
        self.inner.store_config(config).await
    }

    async fn store_snapshot(&self, snapshot: &DiagnosticsSnapshot) -> Result<(), StorageError> {
        self.roll("store_snapshot")?;
        self.inner.store_snapshot(snapshot).await
    }

    async fn load_snapshot(&self) -> Result<Option<DiagnosticsSnapshot>, StorageError> {
        self.roll("load_snapshot")?;
        self.inner.load_snapshot().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_storage_roundtrips() {
        let storage = MemoryStorage::new();
        let config = EncryptionConfig { forward_secrecy: true, ..EncryptionConfig::default() };

        assert_eq!(storage.load_config().await.unwrap(), None);
        storage.store_config(&config).await.unwrap();
        storage.store_public_key(KeyPurpose::Signing, 3, &[1, 2, 3]).await.unwrap();

        assert_eq!(storage.load_config().await.unwrap(), Some(config));
        assert_eq!(storage.public_key(KeyPurpose::Signing, 3), Some(vec![1, 2, 3]));
        assert_eq!(storage.public_key(KeyPurpose::Exchange, 3), None);
    }

    #[tokio::test]
    async fn clones_share_state() {
        let storage = MemoryStorage::new();
        let clone = storage.clone();

        clone.store_public_key(KeyPurpose::Exchange, 1, &[9]).await.unwrap();
        assert_eq!(storage.public_key_count(), 1);
    }

    #[tokio::test]
    async fn chaotic_storage_always_fails_at_rate_one() {
        let storage = ChaoticStorage::with_seed(MemoryStorage::new(), 1.0, 7);

        assert_eq!(storage.load_config().await, Err(StorageError::Injected("load_config")));
    }

    #[tokio::test]
    async fn chaotic_storage_never_fails_at_rate_zero() {
        let storage = ChaoticStorage::with_seed(MemoryStorage::new(), 0.0, 7);

        for _ in 0..100 {
            storage.store_config(&EncryptionConfig::default()).await.unwrap();
        }
    }
}
