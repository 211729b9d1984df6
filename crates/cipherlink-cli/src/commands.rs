//! Subcommand implementations.
//!
//! Each command runs against real system time and randomness. Output goes
//! through `tracing`; the returned reports are what tests assert on.

use std::path::{Path, PathBuf};

use cipherlink_core::{
    ConfigUpdate, EncryptionConfig, EncryptionEngine, EncryptionError, EncryptionStats,
    MemoryStorage, MessageType, SecureStorage, StorageError, SystemEnv,
};
use cipherlink_crypto::AeadAlgorithm;
use thiserror::Error;

use crate::file_storage::FileStorage;

/// File the public key bundle is written to by `keygen`.
pub const BUNDLE_FILE: &str = "bundle.cbor";

/// Errors surfaced by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// Session layer failure
    #[error(transparent)]
    Encryption(#[from] EncryptionError),

    /// Storage could not be opened or written
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A round trip produced the wrong plaintext
    #[error("round trip mismatch: {0}")]
    Mismatch(&'static str),
}

/// Outcome of `keygen`.
#[derive(Debug, Clone)]
pub struct KeygenReport {
    /// Where the public key bundle was written
    pub bundle_path: PathBuf,
    /// Key generation the bundle belongs to
    pub generation: u64,
}

/// Options for `demo`.
#[derive(Debug, Clone)]
pub struct DemoOptions {
    /// Messages sent each way
    pub messages: usize,
    /// Stream chunks sent from the initiator
    pub chunks: usize,
    /// Bytes per stream chunk
    pub chunk_size: usize,
    /// Rotate keys halfway and continue on a replacement session
    pub rotate: bool,
    /// AEAD for both parties
    pub algorithm: AeadAlgorithm,
}

impl Default for DemoOptions {
    fn default() -> Self {
        Self {
            messages: 8,
            chunks: 64,
            chunk_size: 1024,
            rotate: true,
            algorithm: AeadAlgorithm::default(),
        }
    }
}

/// Outcome of `demo`.
#[derive(Debug, Clone)]
pub struct DemoReport {
    /// Messages decrypted by both sides together
    pub messages_delivered: usize,
    /// Stream chunks decrypted by the responder
    pub chunks_delivered: usize,
    /// Initiator stats at the end of the run
    pub initiator_stats: EncryptionStats,
}

fn config_for(algorithm: AeadAlgorithm) -> EncryptionConfig {
    EncryptionConfig { algorithm, ..EncryptionConfig::default() }
}

/// Initialize an engine and push one message through a loopback session.
pub async fn self_test(algorithm: AeadAlgorithm) -> Result<(), CliError> {
    let config = config_for(algorithm);
    let local = EncryptionEngine::new("self-test", SystemEnv::new(), MemoryStorage::new())
        .with_config(config.clone());
    let peer = EncryptionEngine::new("self-test-peer", SystemEnv::new(), MemoryStorage::new())
        .with_config(config);
    local.initialize().await?;
    peer.initialize().await?;

    let (session, offer) = local.create_session(&peer.public_keys()?, "self-test-peer")?;
    peer.accept_session(&offer)?;

    let probe = b"cipherlink self-test";
    let message = local.encrypt_message(session, probe, MessageType::System, "self-test-peer")?;
    if peer.decrypt_message(&message)? != probe {
        return Err(CliError::Mismatch("self-test message"));
    }

    tracing::info!(algorithm = algorithm.name(), "self-test passed");
    Ok(())
}

/// Generate a key generation into `dir` and write its public bundle.
///
/// Private keys are never written; each run produces a fresh identity.
pub async fn keygen(dir: &Path, algorithm: AeadAlgorithm) -> Result<KeygenReport, CliError> {
    let storage = FileStorage::open(dir).await?;
    let engine = EncryptionEngine::new("keygen", SystemEnv::new(), storage.clone());
    engine.initialize().await?;
    engine
        .update_config(&ConfigUpdate { algorithm: Some(algorithm), ..ConfigUpdate::default() })
        .await?;

    let bundle = engine.public_keys()?.to_cbor()?;
    let bundle_path = storage.root().join(BUNDLE_FILE);
    tokio::fs::write(&bundle_path, &bundle)
        .await
        .map_err(|e| StorageError::Io(format!("{}: {e}", bundle_path.display())))?;

    let generation = engine.key_generation()?;
    tracing::info!(path = %bundle_path.display(), generation, "public key bundle written");
    engine.cleanup().await;

    Ok(KeygenReport { bundle_path, generation })
}

/// Run the two-party demo, storing the initiator's state in `dir` if given.
pub async fn demo(options: &DemoOptions, dir: Option<&Path>) -> Result<DemoReport, CliError> {
    match dir {
        Some(dir) => run_demo(FileStorage::open(dir).await?, options).await,
        None => run_demo(MemoryStorage::new(), options).await,
    }
}

async fn run_demo<S: SecureStorage>(
    storage: S,
    options: &DemoOptions,
) -> Result<DemoReport, CliError> {
    let config = config_for(options.algorithm);
    let alice =
        EncryptionEngine::new("alice", SystemEnv::new(), storage).with_config(config.clone());
    let bob =
        EncryptionEngine::new("bob", SystemEnv::new(), MemoryStorage::new()).with_config(config);
    alice.initialize().await?;
    bob.initialize().await?;

    let (mut session, offer) = alice.create_session(&bob.public_keys()?, "bob")?;
    bob.accept_session(&offer)?;
    tracing::info!(%session, "session established");

    let mut messages_delivered = 0;
    for i in 0..options.messages {
        if options.rotate && i == options.messages / 2 {
            let generation = alice.rotate_keys().await?;
            let (replacement, offer) = alice.create_session(&bob.public_keys()?, "bob")?;
            bob.accept_session(&offer)?;
            tracing::info!(
                generation,
                %replacement,
                previous = %session,
                "continuing on replacement session"
            );
            session = replacement;
        }

        let text = format!("message {i}");
        let sent = alice.encrypt_message(session, text.as_bytes(), MessageType::Text, "bob")?;
        if bob.decrypt_message(&sent)? != text.as_bytes() {
            return Err(CliError::Mismatch("initiator message"));
        }

        let reply = bob.encrypt_message(session, b"ack", MessageType::System, "alice")?;
        if alice.decrypt_message(&reply)? != b"ack" {
            return Err(CliError::Mismatch("responder reply"));
        }
        messages_delivered += 2;
    }

    let chunks: Vec<Vec<u8>> = (0..options.chunks)
        .map(|i| vec![(i % 251) as u8; options.chunk_size])
        .collect();
    let frames = alice.encrypt_stream(session, &chunks)?.collect::<Result<Vec<_>, _>>()?;
    let opened = bob.decrypt_stream(session, &frames)?.collect::<Result<Vec<_>, _>>()?;
    if opened != chunks {
        return Err(CliError::Mismatch("stream"));
    }

    let initiator_stats = alice.stats();
    alice.cleanup().await;
    bob.cleanup().await;

    tracing::info!(
        messages = messages_delivered,
        chunks = opened.len(),
        rotations = initiator_stats.key_rotations,
        avg_encrypt_us = initiator_stats.avg_encryption_micros,
        avg_decrypt_us = initiator_stats.avg_decryption_micros,
        "demo complete"
    );

    Ok(DemoReport { messages_delivered, chunks_delivered: opened.len(), initiator_stats })
}
