//! Cipherlink Cryptographic Primitives
//!
//! Cryptographic building blocks for the Cipherlink session layer. Pure
//! functions with deterministic outputs. Callers provide random bytes (key
//! seeds, nonces, salts) for deterministic testing.
//!
//! # Key Hierarchy
//!
//! ```text
//! X25519 exchange key pair ──┐
//!                            ├─ ECDH → Shared Secret
//! Peer exchange public key ──┘            │
//!                                         ▼
//!              HKDF(salt = random per session, info = session id)
//!                                         │
//!                                         ▼
//!                                   Session Key
//!                                         │
//!                                         ▼
//!                   AEAD (AES-256-GCM / ChaCha20-Poly1305)
//!
//! Ed25519 signing key pair → signature over SHA-256(ciphertext ‖ nonce ‖ metadata)
//! ```
//!
//! # Security
//!
//! Session Isolation:
//! - Every session draws a fresh random salt, so keys never repeat across
//!   sessions even with the same peer
//! - The raw ECDH output is never used as a key
//!
//! Authenticity:
//! - AEAD tag proves knowledge of the session key
//! - Ed25519 signature proves which key generation produced the message
//! - Failed authentication tag or signature -> reject message
//!
//! Hygiene:
//! - Symmetric keys, shared secrets and private keys zeroize on drop
//! - AEAD failures are opaque (no oracle on the failure reason)

#![forbid(unsafe_code)]

pub mod aead;
pub mod derivation;
pub mod encoding;
pub mod error;
pub mod exchange;
pub mod signing;

pub use aead::{
    AeadAlgorithm, KEY_SIZE, NONCE_SIZE, Sealed, SymmetricKey, TAG_SIZE, open, open_combined,
    seal, seal_combined, self_test,
};
pub use derivation::{SESSION_SALT_SIZE, derive_session_key, signature_digest};
pub use encoding::{KeyKind, SPKI_SIZE};
pub use error::CryptoError;
pub use exchange::{ExchangeKeyPair, ExchangePublicKey, KeyExchangeAlgorithm, SharedSecret};
pub use signing::{SIGNATURE_SIZE, SignatureAlgorithm, SigningKeyPair, SigningPublicKey};
