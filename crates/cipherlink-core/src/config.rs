//! Process-wide encryption configuration.
//!
//! Loaded once during `initialize` (defaults overridden by persisted config)
//! and replaced wholesale by `update_config`. A partial update is expressed as
//! [`ConfigUpdate`], merged into a copy, validated, and only then swapped in,
//! so a rejected update never leaves a half-applied config behind.

use std::time::Duration;

use cipherlink_crypto::{AeadAlgorithm, KeyExchangeAlgorithm, SignatureAlgorithm};
use serde::{Deserialize, Serialize};

use crate::error::EncryptionError;

/// Default interval between key rotations.
pub const DEFAULT_KEY_ROTATION_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Default lifetime of a session from creation to expiry.
pub const DEFAULT_SESSION_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

/// Protocol version stamped into every message.
pub const PROTOCOL_VERSION: u16 = 1;

/// How the receive path treats message counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReplayPolicy {
    /// Reject any message whose counter does not exceed the highest counter
    /// already accepted on the session
    #[default]
    Strict,
    /// Record counters but accept out-of-order and repeated messages
    Permissive,
}

/// Encryption configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionConfig {
    /// Symmetric AEAD for messages and stream chunks
    pub algorithm: AeadAlgorithm,
    /// Key agreement for session establishment
    pub key_exchange: KeyExchangeAlgorithm,
    /// Signature scheme for message signatures
    pub signing: SignatureAlgorithm,
    /// How often the rotation scheduler regenerates key pairs
    pub key_rotation_interval: Duration,
    /// Lifetime of a session
    pub session_lifetime: Duration,
    /// Use a fresh ephemeral exchange key for every session initiated
    pub forward_secrecy: bool,
    /// Run plaintexts through the compression strategy
    pub compression: bool,
    /// Sign every message over ciphertext, nonce and metadata
    pub metadata_protection: bool,
    /// Counter enforcement on decryption
    pub replay_policy: ReplayPolicy,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            algorithm: AeadAlgorithm::default(),
            key_exchange: KeyExchangeAlgorithm::default(),
            signing: SignatureAlgorithm::default(),
            key_rotation_interval: DEFAULT_KEY_ROTATION_INTERVAL,
            session_lifetime: DEFAULT_SESSION_LIFETIME,
            forward_secrecy: false,
            compression: false,
            metadata_protection: true,
            replay_policy: ReplayPolicy::default(),
        }
    }
}

impl EncryptionConfig {
    /// Check invariants that the rest of the layer relies on.
    pub fn validate(&self) -> Result<(), EncryptionError> {
        if self.key_rotation_interval.is_zero() {
            return Err(EncryptionError::InvalidConfig {
                reason: "key_rotation_interval must be non-zero".to_string(),
            });
        }
        // expires_at > created_at requires at least one millisecond
        if self.session_lifetime < Duration::from_millis(1) {
            return Err(EncryptionError::InvalidConfig {
                reason: "session_lifetime must be at least 1ms".to_string(),
            });
        }
        Ok(())
    }

    /// Return a copy with every `Some` field of `update` applied.
    ///
    /// The result is validated; `self` is never modified.
    pub fn merged(&self, update: &ConfigUpdate) -> Result<Self, EncryptionError> {
        let merged = Self {
            algorithm: update.algorithm.unwrap_or(self.algorithm),
            key_exchange: update.key_exchange.unwrap_or(self.key_exchange),
            signing: update.signing.unwrap_or(self.signing),
            key_rotation_interval: update
                .key_rotation_interval
                .unwrap_or(self.key_rotation_interval),
            session_lifetime: update.session_lifetime.unwrap_or(self.session_lifetime),
            forward_secrecy: update.forward_secrecy.unwrap_or(self.forward_secrecy),
            compression: update.compression.unwrap_or(self.compression),
            metadata_protection: update.metadata_protection.unwrap_or(self.metadata_protection),
            replay_policy: update.replay_policy.unwrap_or(self.replay_policy),
        };
        merged.validate()?;
        Ok(merged)
    }
}

/// Partial configuration update. `None` fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct ConfigUpdate {
    pub algorithm: Option<AeadAlgorithm>,
    pub key_exchange: Option<KeyExchangeAlgorithm>,
    pub signing: Option<SignatureAlgorithm>,
    pub key_rotation_interval: Option<Duration>,
    pub session_lifetime: Option<Duration>,
    pub forward_secrecy: Option<bool>,
    pub compression: Option<bool>,
    pub metadata_protection: Option<bool>,
    pub replay_policy: Option<ReplayPolicy>,
}
