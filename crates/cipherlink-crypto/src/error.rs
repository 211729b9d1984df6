//! Error types for cryptographic primitives

use thiserror::Error;

/// Errors from the primitive layer.
///
/// AEAD failures deliberately carry no detail: a caller must not be able to
/// tell a tag mismatch from a wrong key or a truncated ciphertext.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// AEAD open failed (tag mismatch, wrong key, corrupted input)
    #[error("authenticated decryption failed")]
    AeadOpen,

    /// AEAD seal failed (input exceeds the cipher's limits)
    #[error("authenticated encryption failed")]
    AeadSeal,

    /// Signature did not verify under the given public key
    #[error("signature verification failed")]
    SignatureInvalid,

    /// Key bytes have the wrong length or are not a valid point
    #[error("invalid key material: {reason}")]
    InvalidKey {
        /// What was wrong with the key
        reason: String,
    },

    /// Encoded public key did not carry the expected SPKI prefix
    #[error("invalid public key encoding: expected {expected} bytes, got {actual}")]
    InvalidEncoding {
        /// Expected encoded length
        expected: usize,
        /// Actual encoded length
        actual: usize,
    },

    /// Nonce or tag has the wrong width
    #[error("invalid length for {field}: expected {expected}, got {actual}")]
    InvalidLength {
        /// Field that was the wrong size
        field: &'static str,
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Self-test produced a different plaintext than it sealed
    #[error("self-test failed: {reason}")]
    SelfTest {
        /// Which step failed
        reason: String,
    },
}
