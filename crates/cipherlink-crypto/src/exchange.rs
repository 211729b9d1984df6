//! X25519 key agreement
//!
//! Long-term and ephemeral exchange keys share one type. The private scalar is
//! zeroized on drop by `x25519-dalek`; shared secrets are wrapped so they are
//! zeroized as well.

use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{
    encoding::{KeyKind, RAW_PUBLIC_KEY_SIZE, decode_spki, encode_spki},
    error::CryptoError,
};

/// Supported key agreement algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum KeyExchangeAlgorithm {
    /// Elliptic-curve Diffie-Hellman over Curve25519 (RFC 7748)
    #[default]
    X25519,
}

/// Public half of an exchange key pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExchangePublicKey([u8; RAW_PUBLIC_KEY_SIZE]);

impl ExchangePublicKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; RAW_PUBLIC_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; RAW_PUBLIC_KEY_SIZE] {
        &self.0
    }

    /// Portable SPKI DER encoding.
    pub fn to_spki(&self) -> Vec<u8> {
        encode_spki(KeyKind::X25519, &self.0)
    }

    /// Parse an SPKI DER encoding.
    pub fn from_spki(encoded: &[u8]) -> Result<Self, CryptoError> {
        decode_spki(KeyKind::X25519, encoded).map(Self)
    }
}

/// Output of a Diffie-Hellman computation. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret([u8; 32]);

impl SharedSecret {
    /// Raw secret bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedSecret(<redacted>)")
    }
}

/// X25519 key pair.
pub struct ExchangeKeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl ExchangeKeyPair {
    /// Build a key pair from 32 bytes of secure randomness.
    ///
    /// The seed is clamped by X25519 itself, so any 32 bytes are valid.
    pub fn from_seed(mut seed: [u8; 32]) -> Self {
        let secret = StaticSecret::from(seed);
        seed.zeroize();
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Public half.
    pub fn public_key(&self) -> ExchangePublicKey {
        ExchangePublicKey(self.public.to_bytes())
    }

    /// Compute the shared secret with a peer's public key.
    ///
    /// # Errors
    ///
    /// - `InvalidKey` if the peer key is a low-order point (the result would
    ///   be all zeros and carry no secret)
    pub fn diffie_hellman(&self, peer: &ExchangePublicKey) -> Result<SharedSecret, CryptoError> {
        let shared = self.secret.diffie_hellman(&PublicKey::from(peer.0));
        if !shared.was_contributory() {
            return Err(CryptoError::InvalidKey {
                reason: "peer exchange key is a low-order point".to_string(),
            });
        }

        Ok(SharedSecret(shared.to_bytes()))
    }
}

impl std::fmt::Debug for ExchangeKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeKeyPair").field("public", &self.public_key()).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_sides_agree() {
        let alice = ExchangeKeyPair::from_seed([1; 32]);
        let bob = ExchangeKeyPair::from_seed([2; 32]);

        let ab = alice.diffie_hellman(&bob.public_key()).unwrap();
        let ba = bob.diffie_hellman(&alice.public_key()).unwrap();

        assert_eq!(ab.as_bytes(), ba.as_bytes());
    }

    #[test]
    fn different_peers_produce_different_secrets() {
        let alice = ExchangeKeyPair::from_seed([1; 32]);
        let bob = ExchangeKeyPair::from_seed([2; 32]);
        let carol = ExchangeKeyPair::from_seed([3; 32]);

        let ab = alice.diffie_hellman(&bob.public_key()).unwrap();
        let ac = alice.diffie_hellman(&carol.public_key()).unwrap();

        assert_ne!(ab.as_bytes(), ac.as_bytes());
    }

    #[test]
    fn low_order_point_rejected() {
        let alice = ExchangeKeyPair::from_seed([1; 32]);
        let identity = ExchangePublicKey::from_bytes([0; 32]);

        assert!(matches!(alice.diffie_hellman(&identity), Err(CryptoError::InvalidKey { .. })));
    }

    #[test]
    fn spki_roundtrip() {
        let pair = ExchangeKeyPair::from_seed([9; 32]);
        let encoded = pair.public_key().to_spki();

        assert_eq!(ExchangePublicKey::from_spki(&encoded).unwrap(), pair.public_key());
    }

    #[test]
    fn same_seed_is_deterministic() {
        let a = ExchangeKeyPair::from_seed([4; 32]);
        let b = ExchangeKeyPair::from_seed([4; 32]);

        assert_eq!(a.public_key(), b.public_key());
    }
}
