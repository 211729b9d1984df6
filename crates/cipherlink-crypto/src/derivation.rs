//! Session key derivation and signature digests

use hkdf::Hkdf;
use sha2::{Digest, Sha256};

use crate::{
    aead::{KEY_SIZE, NONCE_SIZE, SymmetricKey},
    exchange::SharedSecret,
};

/// Label used for session key derivation
const SESSION_KEY_LABEL: &[u8] = b"cipherlinkSessionV1";

/// Domain separator for message signature digests
const SIGNATURE_DIGEST_LABEL: &[u8] = b"cipherlinkMessageSigV1";

/// Width of the per-session random salt
pub const SESSION_SALT_SIZE: usize = 32;

/// Derive a session symmetric key from an ECDH shared secret.
///
/// The raw DH output is never used as a key directly. HKDF-SHA256 extracts
/// with a per-session random salt and expands with the session id, so two
/// sessions with the same peer never share a key.
///
/// # Security
///
/// - Different salts produce unrelated keys (session isolation)
/// - Deterministic: both parties derive the same key from the same inputs
pub fn derive_session_key(
    shared_secret: &SharedSecret,
    salt: &[u8; SESSION_SALT_SIZE],
    session_id: u128,
) -> SymmetricKey {
    let hkdf = Hkdf::<Sha256>::new(Some(salt), shared_secret.as_bytes());

    // Capacity: 19 (label) + 16 (session_id) = 35
    let mut info = Vec::with_capacity(SESSION_KEY_LABEL.len() + 16);
    info.extend_from_slice(SESSION_KEY_LABEL);
    info.extend_from_slice(&session_id.to_be_bytes());

    let mut key = [0u8; KEY_SIZE];
    let Ok(()) = hkdf.expand(&info, &mut key) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };

    SymmetricKey::from_bytes(key)
}

/// Digest signed by the sender of a message.
///
/// Covers `ciphertext || nonce || metadata`. The ciphertext length is
/// prefixed so bytes cannot shift between the ciphertext and the metadata.
pub fn signature_digest(ciphertext: &[u8], nonce: &[u8; NONCE_SIZE], metadata: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(SIGNATURE_DIGEST_LABEL);
    hasher.update((ciphertext.len() as u64).to_be_bytes());
    hasher.update(ciphertext);
    hasher.update(nonce);
    hasher.update(metadata);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::ExchangeKeyPair;

    fn shared(seed_a: u8, seed_b: u8) -> SharedSecret {
        let a = ExchangeKeyPair::from_seed([seed_a; 32]);
        let b = ExchangeKeyPair::from_seed([seed_b; 32]);
        a.diffie_hellman(&b.public_key()).unwrap()
    }

    #[test]
    fn derive_is_deterministic() {
        let secret = shared(1, 2);
        let k1 = derive_session_key(&secret, &[9; SESSION_SALT_SIZE], 42);
        let k2 = derive_session_key(&secret, &[9; SESSION_SALT_SIZE], 42);

        assert_eq!(k1.as_bytes(), k2.as_bytes(), "same inputs must produce same output");
    }

    #[test]
    fn both_parties_derive_same_key() {
        let a = ExchangeKeyPair::from_seed([1; 32]);
        let b = ExchangeKeyPair::from_seed([2; 32]);
        let salt = [0x33; SESSION_SALT_SIZE];

        let ka = derive_session_key(&a.diffie_hellman(&b.public_key()).unwrap(), &salt, 7);
        let kb = derive_session_key(&b.diffie_hellman(&a.public_key()).unwrap(), &salt, 7);

        assert_eq!(ka.as_bytes(), kb.as_bytes());
    }

    #[test]
    fn different_salts_produce_different_keys() {
        let secret = shared(1, 2);
        let k1 = derive_session_key(&secret, &[0; SESSION_SALT_SIZE], 1);
        let k2 = derive_session_key(&secret, &[1; SESSION_SALT_SIZE], 1);

        assert_ne!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn different_session_ids_produce_different_keys() {
        let secret = shared(1, 2);
        let k1 = derive_session_key(&secret, &[0; SESSION_SALT_SIZE], 1);
        let k2 = derive_session_key(&secret, &[0; SESSION_SALT_SIZE], 2);

        assert_ne!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn key_differs_from_raw_shared_secret() {
        let secret = shared(1, 2);
        let key = derive_session_key(&secret, &[0; SESSION_SALT_SIZE], 0);

        assert_ne!(key.as_bytes(), secret.as_bytes());
    }

    #[test]
    fn digest_binds_every_field() {
        let base = signature_digest(b"ct", &[0; NONCE_SIZE], b"meta");

        assert_ne!(base, signature_digest(b"cT", &[0; NONCE_SIZE], b"meta"));
        assert_ne!(base, signature_digest(b"ct", &[1; NONCE_SIZE], b"meta"));
        assert_ne!(base, signature_digest(b"ct", &[0; NONCE_SIZE], b"metA"));
    }

    #[test]
    fn digest_is_not_ambiguous_across_boundaries() {
        let nonce = [0; NONCE_SIZE];
        assert_ne!(signature_digest(b"ab", &nonce, b"c"), signature_digest(b"a", &nonce, b"bc"));
    }
}
