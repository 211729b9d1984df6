//! The encryption engine: public surface of the session layer.
//!
//! One engine per process (or per identity), shared through `Arc`. It owns
//! the key material, the session store, stats and config, and delegates to
//! [`MessageCipher`], [`StreamCipher`] and [`KeyRotationScheduler`].
//!
//! # Lifecycle
//!
//! ```text
//! new --> initialize --> (sessions, messages, streams, rotation)* --> cleanup
//! ```
//!
//! Every operation other than `initialize`, `config` and `stats` fails with
//! `NotInitialized` before `initialize` succeeds and after `cleanup`.
//!
//! # Error reporting
//!
//! Errors are returned to the caller and also sent to the engine's
//! [`ErrorReporter`]: initialization failures at `Critical`, per-operation
//! failures at `High`, storage trouble at `Low`. Storage failures never fail
//! an operation.

use std::{
    fmt,
    sync::{
        Arc, PoisonError, RwLock,
        atomic::{AtomicBool, Ordering},
    },
};

use tokio::sync::watch;

use crate::{
    compression::{Compression, PassthroughCompression},
    config::{ConfigUpdate, EncryptionConfig},
    env::Environment,
    error::EncryptionError,
    keys::{KeyGeneration, KeyMaterial, KeyPurpose, PublicKeyBundle},
    message::{EncryptedMessage, MessageCipher, MessageType},
    report::{ErrorReporter, Severity, TracingReporter},
    rotation::{self, KeyRotationScheduler, RotationHandle, RotationState},
    session::{SessionId, SessionInfo, SessionOffer, SessionStore},
    stats::{EncryptionStats, StatsRecorder},
    storage::{DiagnosticsSnapshot, SecureStorage, StorageError},
    stream::{DecryptStream, EncryptStream, StreamCipher},
};

/// End-to-end encryption service.
pub struct EncryptionEngine<E: Environment, S: SecureStorage> {
    local_id: String,
    env: E,
    storage: S,
    reporter: Arc<dyn ErrorReporter>,
    compression: Box<dyn Compression>,
    config: RwLock<EncryptionConfig>,
    keys: KeyMaterial,
    sessions: SessionStore,
    stats: StatsRecorder,
    rotation: KeyRotationScheduler,
    initialized: AtomicBool,
}

impl<E: Environment, S: SecureStorage> EncryptionEngine<E, S> {
    /// Create an engine for the identity `local_id`.
    ///
    /// No keys exist until [`initialize`](Self::initialize).
    pub fn new(local_id: impl Into<String>, env: E, storage: S) -> Self {
        Self {
            local_id: local_id.into(),
            env,
            storage,
            reporter: Arc::new(TracingReporter),
            compression: Box::new(PassthroughCompression),
            config: RwLock::new(EncryptionConfig::default()),
            keys: KeyMaterial::new(),
            sessions: SessionStore::new(),
            stats: StatsRecorder::new(),
            rotation: KeyRotationScheduler::new(),
            initialized: AtomicBool::new(false),
        }
    }

    /// Replace the error reporter.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Replace the compression strategy.
    #[must_use]
    pub fn with_compression(mut self, compression: Box<dyn Compression>) -> Self {
        self.compression = compression;
        self
    }

    /// Start from `config` instead of the defaults. A config persisted in
    /// storage still takes precedence during `initialize`.
    #[must_use]
    pub fn with_config(self, config: EncryptionConfig) -> Self {
        self.set_config(config);
        self
    }

    fn set_config(&self, config: EncryptionConfig) {
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;
    }

    /// Identity this engine encrypts as.
    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    /// The engine's environment.
    pub fn env(&self) -> &E {
        &self.env
    }

    /// The engine's storage backend.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    fn ensure_initialized(&self) -> Result<(), EncryptionError> {
        if self.initialized.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(EncryptionError::NotInitialized)
        }
    }

    fn reported<T>(
        &self,
        context: &str,
        result: Result<T, EncryptionError>,
    ) -> Result<T, EncryptionError> {
        if let Err(e) = &result {
            self.reporter.report(e, Severity::High, context);
        }
        result
    }

    /// Bring the engine up.
    ///
    /// 1. Load persisted config (falls back to the current one)
    /// 2. Self-test the configured AEAD and asymmetric suite
    /// 3. Generate the first key generation and persist its public keys
    /// 4. Restore stats from the last diagnostics snapshot
    ///
    /// Calling it again on an initialized engine does nothing.
    ///
    /// # Errors
    ///
    /// - `CryptoUnavailable` if a self-test fails. Reported as `Critical`;
    ///   the engine stays uninitialized and the application should disable
    ///   encrypted features.
    pub async fn initialize(&self) -> Result<(), EncryptionError> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }

        match self.storage.load_config().await {
            Ok(Some(stored)) => match stored.validate() {
                Ok(()) => self.set_config(stored),
                Err(e) => tracing::warn!(error = %e, "ignoring invalid persisted config"),
            },
            Ok(None) => {},
            Err(e) => self.storage_failed("load_config", &e),
        }
        let config = self.config();

        let checks = KeyMaterial::self_test(&self.env, config.algorithm).and_then(|()| {
            KeyMaterial::self_test_asymmetric(&self.env, config.key_exchange, config.signing)
        });
        if let Err(e) = checks {
            self.reporter.report(&e, Severity::Critical, "initialize");
            return Err(e);
        }

        let generation = match self.keys.current() {
            Ok(generation) => generation,
            Err(_) => self.keys.rotate(&self.env),
        };
        self.persist_public_keys(&generation).await;

        match self.storage.load_snapshot().await {
            Ok(Some(snapshot)) => self.stats.restore(snapshot.stats),
            Ok(None) => {},
            Err(e) => self.storage_failed("load_snapshot", &e),
        }
        self.stats.set_active_sessions(self.sessions.len());

        self.initialized.store(true, Ordering::Release);
        tracing::info!(
            local_id = %self.local_id,
            algorithm = config.algorithm.name(),
            generation = generation.generation(),
            "encryption engine initialized"
        );
        Ok(())
    }

    fn storage_failed(&self, operation: &'static str, error: &StorageError) {
        tracing::warn!(operation, error = %error, "secure storage unavailable");
        self.reporter.report(
            &EncryptionError::Storage { operation, reason: error.to_string() },
            Severity::Low,
            "secure storage",
        );
    }

    async fn persist_public_keys(&self, generation: &KeyGeneration) {
        let bundle = generation.public_bundle();
        for (purpose, spki) in
            [(KeyPurpose::Exchange, bundle.exchange), (KeyPurpose::Signing, bundle.signing)]
        {
            if let Err(e) =
                self.storage.store_public_key(purpose, generation.generation(), &spki).await
            {
                self.storage_failed("store_public_key", &e);
            }
        }
    }

    /// Establish a session with a peer. Send the returned offer to the peer,
    /// who passes it to [`accept_session`](Self::accept_session).
    pub fn create_session(
        &self,
        peer: &PublicKeyBundle,
        peer_id: &str,
    ) -> Result<(SessionId, SessionOffer), EncryptionError> {
        let result = self.ensure_initialized().and_then(|()| {
            let config = self.config();
            self.sessions.create_session(
                &self.env,
                &self.keys,
                &config,
                &self.local_id,
                peer,
                peer_id,
            )
        });
        if result.is_ok() {
            self.stats.record_session_created(self.sessions.len());
        }
        self.reported("create_session", result)
    }

    /// Join a session a peer created.
    pub fn accept_session(&self, offer: &SessionOffer) -> Result<SessionId, EncryptionError> {
        let result = self.ensure_initialized().and_then(|()| {
            self.sessions.accept_session(&self.env, &self.keys, &self.config(), offer)
        });
        if result.is_ok() {
            self.stats.record_session_created(self.sessions.len());
        }
        self.reported("accept_session", result)
    }

    fn message_cipher(&self) -> MessageCipher<'_, E> {
        MessageCipher::new(
            &self.env,
            &self.sessions,
            &self.stats,
            self.compression.as_ref(),
            &self.local_id,
        )
    }

    fn stream_cipher(&self) -> StreamCipher<'_, E> {
        StreamCipher::new(&self.env, &self.sessions, &self.stats, self.reporter.as_ref())
            .with_replay_policy(self.config().replay_policy)
    }

    /// Encrypt one message on a session.
    pub fn encrypt_message(
        &self,
        session_id: SessionId,
        plaintext: &[u8],
        message_type: MessageType,
        recipient_id: &str,
    ) -> Result<EncryptedMessage, EncryptionError> {
        let result = self.ensure_initialized().and_then(|()| {
            self.message_cipher().encrypt(
                &self.config(),
                session_id,
                plaintext,
                message_type,
                recipient_id,
            )
        });
        self.reported("encrypt_message", result)
    }

    /// Verify and decrypt one message.
    pub fn decrypt_message(&self, message: &EncryptedMessage) -> Result<Vec<u8>, EncryptionError> {
        let result = self
            .ensure_initialized()
            .and_then(|()| self.message_cipher().decrypt(&self.config(), message));
        self.reported("decrypt_message", result)
    }

    /// Lazily encrypt a stream of chunks into frames.
    ///
    /// Errors surface as items and are reported; the iterator ends after the first one.
    pub fn encrypt_stream<I>(
        &self,
        session_id: SessionId,
        source: I,
    ) -> Result<EncryptStream<'_, E, I::IntoIter>, EncryptionError>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        self.reported("encrypt_stream", self.ensure_initialized())?;
        Ok(self.stream_cipher().encrypt_stream(session_id, source))
    }

    /// Lazily decrypt a stream of frames into chunks.
    pub fn decrypt_stream<I>(
        &self,
        session_id: SessionId,
        frames: I,
    ) -> Result<DecryptStream<'_, E, I::IntoIter>, EncryptionError>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        self.reported("decrypt_stream", self.ensure_initialized())?;
        Ok(self.stream_cipher().decrypt_stream(session_id, frames))
    }

    /// Destroy a session and wipe its keys.
    pub fn destroy_session(&self, session_id: SessionId) -> Result<(), EncryptionError> {
        let result = self
            .ensure_initialized()
            .and_then(|()| self.sessions.destroy_session(session_id));
        self.stats.set_active_sessions(self.sessions.len());
        self.reported("destroy_session", result)
    }

    /// Drop sessions whose lifetime has elapsed. Returns how many.
    pub fn purge_expired_sessions(&self) -> usize {
        let purged = self.sessions.purge_expired(self.env.wall_clock_millis());
        if purged > 0 {
            self.stats.set_active_sessions(self.sessions.len());
            tracing::debug!(purged, "expired sessions purged");
        }
        purged
    }

    /// Apply a partial config update and persist the result.
    ///
    /// The update is validated as a whole; on error the config is unchanged.
    /// Existing sessions keep the algorithm and lifetime they were created
    /// with.
    pub async fn update_config(
        &self,
        update: &ConfigUpdate,
    ) -> Result<EncryptionConfig, EncryptionError> {
        let merged = {
            let mut config = self.config.write().unwrap_or_else(PoisonError::into_inner);
            let merged = config.merged(update);
            if let Ok(merged) = &merged {
                *config = merged.clone();
            }
            merged
        };
        let merged = self.reported("update_config", merged)?;

        if let Err(e) = self.storage.store_config(&merged).await {
            self.storage_failed("store_config", &e);
        }
        tracing::info!(?update, "configuration updated");
        Ok(merged)
    }

    /// Copy of the current config.
    pub fn config(&self) -> EncryptionConfig {
        self.config.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Copy of the current stats.
    pub fn stats(&self) -> EncryptionStats {
        self.stats.snapshot()
    }

    /// IDs of live sessions.
    pub fn active_sessions(&self) -> Vec<SessionId> {
        self.sessions.active_sessions()
    }

    /// Non-secret view of a session.
    pub fn session(&self, session_id: SessionId) -> Result<SessionInfo, EncryptionError> {
        self.sessions.lookup(session_id)
    }

    /// Public keys to hand to peers.
    pub fn public_keys(&self) -> Result<PublicKeyBundle, EncryptionError> {
        self.ensure_initialized()?;
        self.keys.public_bundle()
    }

    /// One public key as SPKI DER.
    pub fn export_public_key(&self, purpose: KeyPurpose) -> Result<Vec<u8>, EncryptionError> {
        self.ensure_initialized()?;
        self.keys.export_public_key(purpose)
    }

    /// Number of the current key generation.
    pub fn key_generation(&self) -> Result<u64, EncryptionError> {
        self.ensure_initialized()?;
        Ok(self.keys.current()?.generation())
    }

    /// Rotate keys now. Returns the new generation number.
    pub async fn rotate_keys(&self) -> Result<u64, EncryptionError> {
        self.ensure_initialized()?;
        let config = self.config();
        let generation = self.reported(
            "rotate_keys",
            self.rotation.rotate_now(&self.env, &config, &self.keys, &self.sessions, &self.stats),
        )?;

        self.persist_public_keys(&generation).await;
        Ok(generation.generation())
    }

    /// Current rotation state.
    pub fn rotation_state(&self) -> RotationState {
        self.rotation.state()
    }

    /// Start the periodic rotation loop on the current Tokio runtime.
    pub fn spawn_rotation(self: &Arc<Self>) -> RotationHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(rotation::run(Arc::clone(self), shutdown_rx));
        RotationHandle::new(shutdown_tx, task)
    }

    /// Persist a diagnostics snapshot. Storage failures are logged and the
    /// snapshot is still returned.
    pub async fn persist_diagnostics(&self) -> DiagnosticsSnapshot {
        let snapshot = DiagnosticsSnapshot {
            active_sessions: self.sessions.len() as u64,
            stats: self.stats.snapshot(),
            captured_at_ms: self.env.wall_clock_millis(),
        };
        if let Err(e) = self.storage.store_snapshot(&snapshot).await {
            self.storage_failed("store_snapshot", &e);
        }
        snapshot
    }

    /// Shut down: persist diagnostics, destroy every session, drop the keys.
    ///
    /// The engine can be initialized again afterwards with fresh keys.
    pub async fn cleanup(&self) {
        self.persist_diagnostics().await;

        let destroyed = self.sessions.destroy_all();
        self.keys.clear();
        self.stats.set_active_sessions(0);
        self.initialized.store(false, Ordering::Release);

        tracing::info!(destroyed, "encryption engine cleaned up");
    }
}

impl<E: Environment, S: SecureStorage> fmt::Debug for EncryptionEngine<E, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionEngine")
            .field("local_id", &self.local_id)
            .field("initialized", &self.initialized.load(Ordering::Relaxed))
            .field("sessions", &self.sessions)
            .finish_non_exhaustive()
    }
}
