//! Property-based tests for the primitive layer
//!
//! These tests verify the invariants the session layer relies on:
//!
//! 1. **Round-trip**: open(seal(m)) == m for all messages and both ciphers
//! 2. **Tamper detection**: any single bit flip in ciphertext, nonce or tag
//!    makes open fail
//! 3. **Agreement**: both ECDH parties derive the same session key
//! 4. **Isolation**: different salts never yield the same session key

use cipherlink_crypto::{
    AeadAlgorithm, ExchangeKeyPair, NONCE_SIZE, SESSION_SALT_SIZE, SymmetricKey, TAG_SIZE,
    derive_session_key, open, seal,
};
use proptest::prelude::*;

fn algorithm() -> impl Strategy<Value = AeadAlgorithm> {
    prop_oneof![Just(AeadAlgorithm::Aes256Gcm), Just(AeadAlgorithm::ChaCha20Poly1305)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_seal_open_roundtrip(
        algorithm in algorithm(),
        plaintext in prop::collection::vec(any::<u8>(), 0..1000),
        key in any::<[u8; 32]>(),
        nonce in any::<[u8; NONCE_SIZE]>(),
        aad in prop::collection::vec(any::<u8>(), 0..64),
    ) {
        let key = SymmetricKey::from_bytes(key);
        let sealed = seal(algorithm, &key, &nonce, &plaintext, &aad).unwrap();

        prop_assert_eq!(sealed.ciphertext.len(), plaintext.len());

        let opened = open(algorithm, &key, &nonce, &sealed.ciphertext, &sealed.tag, &aad).unwrap();
        prop_assert_eq!(opened, plaintext);
    }

    #[test]
    fn prop_single_bit_flip_is_detected(
        algorithm in algorithm(),
        plaintext in prop::collection::vec(any::<u8>(), 1..256),
        key in any::<[u8; 32]>(),
        nonce in any::<[u8; NONCE_SIZE]>(),
        target in 0usize..3,
        position in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let key = SymmetricKey::from_bytes(key);
        let sealed = seal(algorithm, &key, &nonce, &plaintext, &[]).unwrap();

        let mut ciphertext = sealed.ciphertext.clone();
        let mut tag = sealed.tag;
        let mut nonce_flipped = nonce;
        match target {
            0 => {
                let idx = position.index(ciphertext.len());
                ciphertext[idx] ^= 1 << bit;
            }
            1 => nonce_flipped[position.index(NONCE_SIZE)] ^= 1 << bit,
            _ => tag[position.index(TAG_SIZE)] ^= 1 << bit,
        }

        prop_assert!(open(algorithm, &key, &nonce_flipped, &ciphertext, &tag, &[]).is_err());
    }

    #[test]
    fn prop_ecdh_parties_agree(
        seed_a in any::<[u8; 32]>(),
        seed_b in any::<[u8; 32]>(),
        salt in any::<[u8; SESSION_SALT_SIZE]>(),
        session_id in any::<u128>(),
    ) {
        let a = ExchangeKeyPair::from_seed(seed_a);
        let b = ExchangeKeyPair::from_seed(seed_b);

        let (Ok(ab), Ok(ba)) = (a.diffie_hellman(&b.public_key()), b.diffie_hellman(&a.public_key()))
        else {
            return Ok(());
        };

        let ka = derive_session_key(&ab, &salt, session_id);
        let kb = derive_session_key(&ba, &salt, session_id);
        prop_assert_eq!(ka.as_bytes(), kb.as_bytes());
    }

    #[test]
    fn prop_distinct_salts_isolate_sessions(
        salt_a in any::<[u8; SESSION_SALT_SIZE]>(),
        salt_b in any::<[u8; SESSION_SALT_SIZE]>(),
    ) {
        prop_assume!(salt_a != salt_b);

        let a = ExchangeKeyPair::from_seed([1; 32]);
        let b = ExchangeKeyPair::from_seed([2; 32]);
        let shared = a.diffie_hellman(&b.public_key()).unwrap();

        let k1 = derive_session_key(&shared, &salt_a, 1);
        let k2 = derive_session_key(&shared, &salt_b, 1);
        prop_assert_ne!(k1.as_bytes(), k2.as_bytes());
    }
}
