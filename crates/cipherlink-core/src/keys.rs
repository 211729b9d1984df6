//! Process key material: the current exchange and signing key pairs.
//!
//! Exactly one [`KeyGeneration`] is current at any time. It bundles the
//! X25519 exchange pair and the Ed25519 signing pair; rotation builds a
//! complete new generation before swapping it in, so there is never a state
//! where one purpose has rotated and the other has not.
//!
//! Sessions hold an `Arc` to the generation that was current when they were
//! created. A rotated-out generation therefore stays alive exactly as long as
//! some session still signs with it, and its private keys are zeroized when
//! the last reference drops.

use std::sync::{Arc, PoisonError, RwLock};

use cipherlink_crypto::{
    AeadAlgorithm, ExchangeKeyPair, ExchangePublicKey, KEY_SIZE, KeyExchangeAlgorithm,
    NONCE_SIZE, SignatureAlgorithm, SigningKeyPair, SigningPublicKey,
};
use serde::{Deserialize, Serialize};

use crate::{
    codec::{from_cbor, to_cbor},
    env::Environment,
    error::EncryptionError,
};

/// What a key pair is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyPurpose {
    /// Key agreement when establishing sessions
    Exchange,
    /// Message signatures
    Signing,
}

impl KeyPurpose {
    /// Stable lowercase name, used as the storage slot name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exchange => "exchange",
            Self::Signing => "signing",
        }
    }
}

/// Operations a key pair may be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyUsage {
    /// Derive a symmetric key from a shared secret
    DeriveKey,
    /// Derive raw shared secret bits
    DeriveBits,
    /// Produce signatures
    Sign,
    /// Check signatures
    Verify,
}

const EXCHANGE_USAGES: &[KeyUsage] = &[KeyUsage::DeriveKey, KeyUsage::DeriveBits];
const SIGNING_USAGES: &[KeyUsage] = &[KeyUsage::Sign, KeyUsage::Verify];

/// A freshly generated asymmetric key pair for one purpose.
#[derive(Debug)]
pub enum KeyPair {
    /// X25519 key agreement pair
    Exchange(ExchangeKeyPair),
    /// Ed25519 signing pair
    Signing(SigningKeyPair),
}

impl KeyPair {
    /// Purpose this pair was generated for.
    pub fn purpose(&self) -> KeyPurpose {
        match self {
            Self::Exchange(_) => KeyPurpose::Exchange,
            Self::Signing(_) => KeyPurpose::Signing,
        }
    }

    /// Algorithm tag.
    pub fn algorithm(&self) -> &'static str {
        match self {
            Self::Exchange(_) => "X25519",
            Self::Signing(_) => "Ed25519",
        }
    }

    /// Allowed usages.
    pub fn usages(&self) -> &'static [KeyUsage] {
        match self {
            Self::Exchange(_) => EXCHANGE_USAGES,
            Self::Signing(_) => SIGNING_USAGES,
        }
    }

    /// Public key as SPKI DER.
    pub fn public_key_spki(&self) -> Vec<u8> {
        match self {
            Self::Exchange(pair) => pair.public_key().to_spki(),
            Self::Signing(pair) => pair.public_key().to_spki(),
        }
    }
}

/// Public halves of a key generation, as handed to peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyBundle {
    /// X25519 public key, SPKI DER
    pub exchange: Vec<u8>,
    /// Ed25519 public key, SPKI DER
    pub signing: Vec<u8>,
}

impl PublicKeyBundle {
    /// Parse the exchange key.
    pub fn exchange_key(&self) -> Result<ExchangePublicKey, EncryptionError> {
        Ok(ExchangePublicKey::from_spki(&self.exchange)?)
    }

    /// Parse the signing key.
    pub fn signing_key(&self) -> Result<SigningPublicKey, EncryptionError> {
        Ok(SigningPublicKey::from_spki(&self.signing)?)
    }

    /// Encode for transport.
    pub fn to_cbor(&self) -> Result<Vec<u8>, EncryptionError> {
        to_cbor(self)
    }

    /// Decode from transport.
    pub fn from_cbor(bytes: &[u8]) -> Result<Self, EncryptionError> {
        from_cbor(bytes)
    }
}

/// One complete set of process key pairs.
#[derive(Debug)]
pub struct KeyGeneration {
    generation: u64,
    created_at_ms: u64,
    exchange: ExchangeKeyPair,
    signing: SigningKeyPair,
}

impl KeyGeneration {
    /// Monotonic generation number, starting at 1.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Wall-clock creation time.
    pub fn created_at_ms(&self) -> u64 {
        self.created_at_ms
    }

    /// Exchange key pair.
    pub fn exchange(&self) -> &ExchangeKeyPair {
        &self.exchange
    }

    /// Signing key pair.
    pub fn signing(&self) -> &SigningKeyPair {
        &self.signing
    }

    /// Public halves as SPKI DER.
    pub fn public_bundle(&self) -> PublicKeyBundle {
        PublicKeyBundle {
            exchange: self.exchange.public_key().to_spki(),
            signing: self.signing.public_key().to_spki(),
        }
    }
}

/// Holder of the process-wide key generation.
///
/// # Invariants
///
/// - At most one generation is current
/// - Generation numbers strictly increase across rotations
/// - Both purposes always belong to the same generation
#[derive(Debug, Default)]
pub struct KeyMaterial {
    current: RwLock<Option<Arc<KeyGeneration>>>,
}

impl KeyMaterial {
    /// Create an empty holder. No keys exist until [`rotate`](Self::rotate).
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a fresh key pair for `purpose` from the environment's RNG.
    pub fn generate_key_pair<E: Environment>(env: &E, purpose: KeyPurpose) -> KeyPair {
        match purpose {
            KeyPurpose::Exchange => KeyPair::Exchange(ExchangeKeyPair::from_seed(env.random_array())),
            KeyPurpose::Signing => KeyPair::Signing(SigningKeyPair::from_seed(env.random_array())),
        }
    }

    /// Verify the symmetric primitive works on this platform.
    ///
    /// Generates a random test key and nonce, seals a known plaintext, and
    /// opens it again.
    ///
    /// # Errors
    ///
    /// - `CryptoUnavailable` if the round trip fails
    pub fn self_test<E: Environment>(env: &E, algorithm: AeadAlgorithm) -> Result<(), EncryptionError> {
        let key: [u8; KEY_SIZE] = env.random_array();
        let nonce: [u8; NONCE_SIZE] = env.random_array();

        cipherlink_crypto::self_test(algorithm, key, nonce).map_err(|e| {
            EncryptionError::CryptoUnavailable { reason: format!("{}: {e}", algorithm.name()) }
        })
    }

    /// Check that a configured asymmetric suite can be generated.
    ///
    /// Exercises key agreement and a sign/verify round trip with throwaway
    /// keys.
    pub fn self_test_asymmetric<E: Environment>(
        env: &E,
        key_exchange: KeyExchangeAlgorithm,
        signing: SignatureAlgorithm,
    ) -> Result<(), EncryptionError> {
        let KeyExchangeAlgorithm::X25519 = key_exchange;
        let SignatureAlgorithm::Ed25519 = signing;

        let a = ExchangeKeyPair::from_seed(env.random_array());
        let b = ExchangeKeyPair::from_seed(env.random_array());
        let ab = a.diffie_hellman(&b.public_key())?;
        let ba = b.diffie_hellman(&a.public_key())?;
        if ab.as_bytes() != ba.as_bytes() {
            return Err(EncryptionError::CryptoUnavailable {
                reason: "X25519 agreement mismatch".to_string(),
            });
        }

        let signer = SigningKeyPair::from_seed(env.random_array());
        let signature = signer.sign(b"cipherlink self-test");
        signer.public_key().verify(b"cipherlink self-test", &signature).map_err(|_| {
            EncryptionError::CryptoUnavailable { reason: "Ed25519 round trip failed".to_string() }
        })
    }

    /// Current generation.
    ///
    /// # Errors
    ///
    /// - `KeyUnavailable` before the first rotation or after [`clear`](Self::clear)
    pub fn current(&self) -> Result<Arc<KeyGeneration>, EncryptionError> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(EncryptionError::KeyUnavailable)
    }

    /// True once a generation has been installed.
    pub fn is_loaded(&self) -> bool {
        self.current.read().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    /// Replace the current generation with a freshly generated one.
    ///
    /// Both pairs are generated before the lock is taken; the swap itself
    /// is a single pointer write. Returns the new generation.
    pub fn rotate<E: Environment>(&self, env: &E) -> Arc<KeyGeneration> {
        let exchange = ExchangeKeyPair::from_seed(env.random_array());
        let signing = SigningKeyPair::from_seed(env.random_array());
        let created_at_ms = env.wall_clock_millis();

        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let generation = current.as_ref().map_or(1, |previous| previous.generation + 1);
        let next = Arc::new(KeyGeneration { generation, created_at_ms, exchange, signing });
        *current = Some(Arc::clone(&next));

        tracing::debug!(generation, "key generation installed");
        next
    }

    /// Public key for `purpose` as SPKI DER.
    pub fn export_public_key(&self, purpose: KeyPurpose) -> Result<Vec<u8>, EncryptionError> {
        let current = self.current()?;
        Ok(match purpose {
            KeyPurpose::Exchange => current.exchange.public_key().to_spki(),
            KeyPurpose::Signing => current.signing.public_key().to_spki(),
        })
    }

    /// Both public keys of the current generation.
    pub fn public_bundle(&self) -> Result<PublicKeyBundle, EncryptionError> {
        Ok(self.current()?.public_bundle())
    }

    /// Drop the current generation.
    ///
    /// Private keys are zeroized once no session references them any more.
    pub fn clear(&self) {
        self.current.write().unwrap_or_else(PoisonError::into_inner).take();
    }
}
