//! Error types for the session layer.
//!
//! One strongly-typed error for every operation on the public surface.
//! Cryptographic verification failures are never downgraded to empty
//! results, and `DecryptionFailed` deliberately carries no reason so callers
//! cannot build a padding or tag oracle out of it.

use cipherlink_crypto::CryptoError;
use thiserror::Error;

use crate::session::SessionId;

/// Errors returned by the encryption engine and its components.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncryptionError {
    /// Platform lacks a required primitive (self-test failed)
    #[error("cryptographic primitive unavailable: {reason}")]
    CryptoUnavailable {
        /// What failed during the check
        reason: String,
    },

    /// No key generation is loaded. Indicates use before `initialize` or
    /// after `cleanup`
    #[error("key material unavailable")]
    KeyUnavailable,

    /// Session ID is not in the store
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    /// Session lifetime has elapsed
    #[error("session expired: {session_id} (expired at {expires_at_ms} ms)")]
    SessionExpired {
        /// The expired session
        session_id: SessionId,
        /// Expiry timestamp
        expires_at_ms: u64,
    },

    /// Session was replaced after rotation and may only decrypt
    #[error("session {session_id} superseded by {replacement}")]
    SessionSuperseded {
        /// The rotation-due session
        session_id: SessionId,
        /// The session that replaced it
        replacement: SessionId,
    },

    /// Accepting an offer would overwrite a live session
    #[error("session already exists: {0}")]
    SessionExists(SessionId),

    /// Offer targets an exchange key this process no longer holds
    #[error("session offer targets a different exchange key")]
    OfferKeyMismatch,

    /// Signature missing or not produced by the peer's signing key
    #[error("signature invalid")]
    SignatureInvalid,

    /// AEAD decryption failed (tag mismatch, corrupted ciphertext, wrong key,
    /// wrong nonce or tag width)
    #[error("decryption failed")]
    DecryptionFailed,

    /// Stream frame shorter than nonce plus tag
    #[error("malformed frame: {len} bytes, need at least {min}")]
    MalformedFrame {
        /// Frame length received
        len: usize,
        /// Minimum valid frame length
        min: usize,
    },

    /// Message counter did not advance past the last accepted one
    #[error("replayed message: counter {counter} not above {highest_seen}")]
    ReplayDetected {
        /// Counter carried by the message
        counter: u64,
        /// Highest counter accepted so far
        highest_seen: u64,
    },

    /// Inbound stream was already opened on this session
    #[error("replayed stream on session {session_id}")]
    StreamReplayed {
        /// Session the stream arrived on
        session_id: SessionId,
    },

    /// Compression strategy failed or does not match the message
    #[error("compression error: {reason}")]
    CompressionError {
        /// What went wrong
        reason: String,
    },

    /// Peer key bytes could not be parsed
    #[error("invalid key: {reason}")]
    InvalidKey {
        /// What was wrong with the key
        reason: String,
    },

    /// Configuration update rejected
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Which field was rejected
        reason: String,
    },

    /// CBOR encoding or decoding failed
    #[error("codec error: {reason}")]
    Codec {
        /// Underlying serializer message
        reason: String,
    },

    /// Secure storage call failed. Only reported, never returned from an
    /// engine operation
    #[error("secure storage {operation} failed: {reason}")]
    Storage {
        /// Storage operation that failed
        operation: &'static str,
        /// Backend error
        reason: String,
    },

    /// Operation is a documented capability gap
    #[error("not supported: {operation}")]
    Unsupported {
        /// Operation that was attempted
        operation: &'static str,
    },

    /// Engine used before `initialize` completed
    #[error("encryption engine not initialized")]
    NotInitialized,
}

impl EncryptionError {
    /// Returns true if the caller can recover by re-establishing a session.
    ///
    /// Verification failures are never recoverable: the message must be
    /// discarded.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::SessionNotFound(_)
                | Self::SessionExpired { .. }
                | Self::SessionSuperseded { .. }
                | Self::OfferKeyMismatch
        )
    }

    /// Returns true for failures that indicate tampering or forgery.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            Self::SignatureInvalid
                | Self::DecryptionFailed
                | Self::MalformedFrame { .. }
                | Self::ReplayDetected { .. }
                | Self::StreamReplayed { .. }
        )
    }

    /// Text safe to show to end users. Never includes cryptographic detail.
    pub fn user_message(&self) -> &'static str {
        if self.is_recoverable() {
            "Secure connection lost. Reconnecting."
        } else {
            "Secure connection unavailable."
        }
    }
}

impl From<CryptoError> for EncryptionError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::AeadOpen | CryptoError::InvalidLength { .. } => Self::DecryptionFailed,
            CryptoError::SignatureInvalid => Self::SignatureInvalid,
            CryptoError::InvalidKey { reason } => Self::InvalidKey { reason },
            CryptoError::InvalidEncoding { .. } => Self::InvalidKey { reason: err.to_string() },
            CryptoError::AeadSeal | CryptoError::SelfTest { .. } => {
                Self::CryptoUnavailable { reason: err.to_string() }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_errors_are_recoverable() {
        assert!(EncryptionError::SessionNotFound(SessionId::from_u128(1)).is_recoverable());
        assert!(
            EncryptionError::SessionExpired {
                session_id: SessionId::from_u128(1),
                expires_at_ms: 0
            }
            .is_recoverable()
        );
    }

    #[test]
    fn verification_errors_are_not_recoverable() {
        assert!(!EncryptionError::SignatureInvalid.is_recoverable());
        assert!(!EncryptionError::DecryptionFailed.is_recoverable());
        assert!(EncryptionError::DecryptionFailed.is_integrity_failure());
    }

    #[test]
    fn aead_errors_collapse_to_decryption_failed() {
        assert_eq!(EncryptionError::from(CryptoError::AeadOpen), EncryptionError::DecryptionFailed);
        assert_eq!(
            EncryptionError::from(CryptoError::InvalidLength {
                field: "tag",
                expected: 16,
                actual: 15
            }),
            EncryptionError::DecryptionFailed
        );
    }

    #[test]
    fn user_message_hides_detail() {
        let err = EncryptionError::ReplayDetected { counter: 3, highest_seen: 5 };
        assert_eq!(err.user_message(), "Secure connection unavailable.");
    }

    #[test]
    fn error_display() {
        let err = EncryptionError::MalformedFrame { len: 10, min: 28 };
        assert_eq!(err.to_string(), "malformed frame: 10 bytes, need at least 28");
    }
}
