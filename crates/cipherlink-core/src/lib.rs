//! Cipherlink session layer.
//!
//! End-to-end encryption between two parties: key management, ECDH session
//! establishment, message and stream encryption, and periodic key rotation.
//! Transport is out of scope; callers move [`PublicKeyBundle`]s,
//! [`SessionOffer`]s, [`EncryptedMessage`]s and stream frames themselves.
//!
//! # Architecture
//!
//! [`EncryptionEngine`] is the service object applications hold. It is
//! generic over an [`Environment`] (clock and randomness) and a
//! [`SecureStorage`] backend, so the same code runs in production with
//! [`SystemEnv`] and deterministically in tests with [`SimEnv`].
//!
//! # Components
//!
//! - [`KeyMaterial`]: current exchange and signing key generation
//! - [`SessionStore`]: sessions, counters, expiry
//! - [`MessageCipher`]: discrete message envelopes
//! - [`StreamCipher`]: lazy chunked streams
//! - [`KeyRotationScheduler`]: rotation state machine and loop
//! - [`StatsRecorder`]: counters and timing
//!
//! # Example
//!
//! ```
//! # use cipherlink_core::{EncryptionEngine, MemoryStorage, MessageType, SimEnv};
//! # tokio_test_block(async {
//! let alice = EncryptionEngine::new("alice", SimEnv::with_seed(1), MemoryStorage::new());
//! let bob = EncryptionEngine::new("bob", SimEnv::with_seed(2), MemoryStorage::new());
//! alice.initialize().await?;
//! bob.initialize().await?;
//!
//! let (session, offer) = alice.create_session(&bob.public_keys()?, "bob")?;
//! bob.accept_session(&offer)?;
//!
//! let message = alice.encrypt_message(session, b"hello", MessageType::Text, "bob")?;
//! assert_eq!(bob.decrypt_message(&message)?, b"hello");
//! # Ok::<(), cipherlink_core::EncryptionError>(())
//! # }).unwrap();
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod codec;
pub mod compression;
pub mod config;
pub mod engine;
pub mod env;
pub mod error;
pub mod keys;
pub mod message;
pub mod report;
pub mod rotation;
pub mod session;
pub mod sim;
pub mod stats;
pub mod storage;
pub mod stream;
mod system_env;

pub use compression::{Compression, CompressionKind, PassthroughCompression};
pub use config::{
    ConfigUpdate, DEFAULT_KEY_ROTATION_INTERVAL, DEFAULT_SESSION_LIFETIME, EncryptionConfig,
    PROTOCOL_VERSION, ReplayPolicy,
};
pub use engine::EncryptionEngine;
pub use env::Environment;
pub use error::EncryptionError;
pub use keys::{KeyGeneration, KeyMaterial, KeyPair, KeyPurpose, KeyUsage, PublicKeyBundle};
pub use message::{EncryptedMessage, EncryptionMetadata, MessageCipher, MessageType};
pub use report::{ErrorReporter, RecordingReporter, Severity, TracingReporter};
pub use rotation::{KeyRotationScheduler, RotationHandle, RotationState};
pub use session::{SessionId, SessionInfo, SessionOffer, SessionRole, SessionStore};
pub use sim::SimEnv;
pub use stats::{EncryptionStats, StatsRecorder};
pub use storage::{ChaoticStorage, DiagnosticsSnapshot, MemoryStorage, SecureStorage, StorageError};
pub use stream::{DecryptStream, EncryptStream, MIN_FRAME_SIZE, StreamCipher};
pub use system_env::SystemEnv;
