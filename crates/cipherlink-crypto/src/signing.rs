//! Ed25519 message signatures

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::{
    encoding::{KeyKind, RAW_PUBLIC_KEY_SIZE, decode_spki, encode_spki},
    error::CryptoError,
};

/// Ed25519 signature width
pub const SIGNATURE_SIZE: usize = 64;

/// Supported signature algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SignatureAlgorithm {
    /// Edwards-curve signatures over Curve25519 (RFC 8032)
    #[default]
    Ed25519,
}

/// Public verification key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SigningPublicKey(VerifyingKey);

impl SigningPublicKey {
    /// Parse raw key bytes.
    ///
    /// # Errors
    ///
    /// - `InvalidKey` if the bytes are not a valid compressed Edwards point
    pub fn from_bytes(bytes: &[u8; RAW_PUBLIC_KEY_SIZE]) -> Result<Self, CryptoError> {
        VerifyingKey::from_bytes(bytes)
            .map(Self)
            .map_err(|e| CryptoError::InvalidKey { reason: e.to_string() })
    }

    /// Raw key bytes.
    pub fn to_bytes(&self) -> [u8; RAW_PUBLIC_KEY_SIZE] {
        self.0.to_bytes()
    }

    /// Portable SPKI DER encoding.
    pub fn to_spki(&self) -> Vec<u8> {
        encode_spki(KeyKind::Ed25519, &self.0.to_bytes())
    }

    /// Parse an SPKI DER encoding.
    pub fn from_spki(encoded: &[u8]) -> Result<Self, CryptoError> {
        let raw = decode_spki(KeyKind::Ed25519, encoded)?;
        Self::from_bytes(&raw)
    }

    /// Verify `signature` over `message`.
    ///
    /// Uses strict verification (rejects malleable and small-order
    /// signatures).
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
        let signature =
            Signature::from_slice(signature).map_err(|_| CryptoError::SignatureInvalid)?;
        self.0.verify_strict(message, &signature).map_err(|_| CryptoError::SignatureInvalid)
    }
}

/// Ed25519 key pair. The secret key is zeroized on drop by `ed25519-dalek`.
pub struct SigningKeyPair {
    signing_key: SigningKey,
}

impl SigningKeyPair {
    /// Build a key pair from a 32-byte secret seed.
    pub fn from_seed(mut seed: [u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(&seed);
        seed.zeroize();
        Self { signing_key }
    }

    /// Public half.
    pub fn public_key(&self) -> SigningPublicKey {
        SigningPublicKey(self.signing_key.verifying_key())
    }

    /// Sign `message`.
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_SIZE] {
        self.signing_key.sign(message).to_bytes()
    }
}

impl std::fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKeyPair").field("public", &self.public_key()).finish_non_exhaustive()
    }
}
