//! Authenticated encryption with AES-256-GCM or ChaCha20-Poly1305
//!
//! Both ciphers use a 12-byte nonce and a 16-byte tag, so the two are
//! interchangeable behind [`AeadAlgorithm`]. All functions are pure: the
//! caller supplies the nonce, which MUST be unique per key.

use aes_gcm::{
    Aes256Gcm,
    aead::{Aead, KeyInit, Payload},
};
use chacha20poly1305::ChaCha20Poly1305;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

/// Nonce width for every supported AEAD (96 bits)
pub const NONCE_SIZE: usize = 12;

/// Authentication tag width for every supported AEAD (128 bits)
pub const TAG_SIZE: usize = 16;

/// Symmetric key width (256 bits)
pub const KEY_SIZE: usize = 32;

/// Plaintext sealed by [`self_test`]
const SELF_TEST_PLAINTEXT: &[u8] = b"cipherlink self-test vector";

/// Supported AEAD constructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AeadAlgorithm {
    /// AES-256 in Galois/Counter Mode
    #[default]
    Aes256Gcm,
    /// ChaCha20 stream cipher with Poly1305 MAC (RFC 8439)
    ChaCha20Poly1305,
}

impl AeadAlgorithm {
    /// Stable name used in logs and metadata.
    pub fn name(self) -> &'static str {
        match self {
            Self::Aes256Gcm => "AES-256-GCM",
            Self::ChaCha20Poly1305 => "ChaCha20-Poly1305",
        }
    }
}

/// 256-bit symmetric key. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_SIZE]);

impl SymmetricKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey(<redacted>)")
    }
}

/// Output of [`seal`] with the tag split off for separate transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    /// Ciphertext, same length as the plaintext
    pub ciphertext: Vec<u8>,
    /// Authentication tag
    pub tag: [u8; TAG_SIZE],
}

/// Encrypt and return `ciphertext || tag` as produced by the AEAD.
pub fn seal_combined(
    algorithm: AeadAlgorithm,
    key: &SymmetricKey,
    nonce: &[u8; NONCE_SIZE],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let payload = Payload { msg: plaintext, aad };
    let sealed = match algorithm {
        AeadAlgorithm::Aes256Gcm => Aes256Gcm::new(key.as_bytes().into())
            .encrypt(aes_gcm::Nonce::from_slice(nonce), payload),
        AeadAlgorithm::ChaCha20Poly1305 => ChaCha20Poly1305::new(key.as_bytes().into())
            .encrypt(chacha20poly1305::Nonce::from_slice(nonce), payload),
    };

    sealed.map_err(|_| CryptoError::AeadSeal)
}

/// Encrypt and split the tag from the ciphertext.
///
/// The returned ciphertext has exactly the plaintext's length.
pub fn seal(
    algorithm: AeadAlgorithm,
    key: &SymmetricKey,
    nonce: &[u8; NONCE_SIZE],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Sealed, CryptoError> {
    let mut ciphertext = seal_combined(algorithm, key, nonce, plaintext, aad)?;
    debug_assert_eq!(ciphertext.len(), plaintext.len() + TAG_SIZE);

    let tag_bytes = ciphertext.split_off(plaintext.len());
    let mut tag = [0u8; TAG_SIZE];
    tag.copy_from_slice(&tag_bytes);

    Ok(Sealed { ciphertext, tag })
}

/// Decrypt `ciphertext || tag`.
///
/// # Errors
///
/// - `AeadOpen` for any failure. Inputs shorter than a tag are reported the
///   same way as a tag mismatch.
pub fn open_combined(
    algorithm: AeadAlgorithm,
    key: &SymmetricKey,
    nonce: &[u8; NONCE_SIZE],
    ciphertext_and_tag: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext_and_tag.len() < TAG_SIZE {
        return Err(CryptoError::AeadOpen);
    }

    let payload = Payload { msg: ciphertext_and_tag, aad };
    let opened = match algorithm {
        AeadAlgorithm::Aes256Gcm => Aes256Gcm::new(key.as_bytes().into())
            .decrypt(aes_gcm::Nonce::from_slice(nonce), payload),
        AeadAlgorithm::ChaCha20Poly1305 => ChaCha20Poly1305::new(key.as_bytes().into())
            .decrypt(chacha20poly1305::Nonce::from_slice(nonce), payload),
    };

    opened.map_err(|_| CryptoError::AeadOpen)
}

/// Decrypt a ciphertext whose tag was transported separately.
pub fn open(
    algorithm: AeadAlgorithm,
    key: &SymmetricKey,
    nonce: &[u8; NONCE_SIZE],
    ciphertext: &[u8],
    tag: &[u8; TAG_SIZE],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let mut combined = Vec::with_capacity(ciphertext.len() + TAG_SIZE);
    combined.extend_from_slice(ciphertext);
    combined.extend_from_slice(tag);

    open_combined(algorithm, key, nonce, &combined, aad)
}

/// Verify the platform primitive with a known-answer round trip.
///
/// Seals a fixed plaintext under `key_bytes` and `nonce`, opens it again, and
/// checks the result matches.
pub fn self_test(
    algorithm: AeadAlgorithm,
    key_bytes: [u8; KEY_SIZE],
    nonce: [u8; NONCE_SIZE],
) -> Result<(), CryptoError> {
    let key = SymmetricKey::from_bytes(key_bytes);

    let sealed = seal(algorithm, &key, &nonce, SELF_TEST_PLAINTEXT, &[])
        .map_err(|e| CryptoError::SelfTest { reason: format!("seal: {e}") })?;
    if sealed.ciphertext == SELF_TEST_PLAINTEXT {
        return Err(CryptoError::SelfTest { reason: "ciphertext equals plaintext".to_string() });
    }

    let opened = open(algorithm, &key, &nonce, &sealed.ciphertext, &sealed.tag, &[])
        .map_err(|e| CryptoError::SelfTest { reason: format!("open: {e}") })?;
    if opened != SELF_TEST_PLAINTEXT {
        return Err(CryptoError::SelfTest { reason: "round trip mismatch".to_string() });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALGORITHMS: [AeadAlgorithm; 2] =
        [AeadAlgorithm::Aes256Gcm, AeadAlgorithm::ChaCha20Poly1305];

    fn test_key(fill: u8) -> SymmetricKey {
        SymmetricKey::from_bytes([fill; KEY_SIZE])
    }

    #[test]
    fn seal_open_roundtrip() {
        for algorithm in ALGORITHMS {
            let key = test_key(0x11);
            let nonce = [0xAB; NONCE_SIZE];

            let sealed = seal(algorithm, &key, &nonce, b"Hello, World!", b"aad").unwrap();
            let opened =
                open(algorithm, &key, &nonce, &sealed.ciphertext, &sealed.tag, b"aad").unwrap();

            assert_eq!(opened, b"Hello, World!");
        }
    }

    #[test]
    fn ciphertext_length_equals_plaintext_length() {
        for algorithm in ALGORITHMS {
            let sealed =
                seal(algorithm, &test_key(1), &[0; NONCE_SIZE], b"twelve bytes", &[]).unwrap();
            assert_eq!(sealed.ciphertext.len(), 12);
        }
    }

    #[test]
    fn empty_plaintext_still_has_tag() {
        for algorithm in ALGORITHMS {
            let combined =
                seal_combined(algorithm, &test_key(2), &[0; NONCE_SIZE], b"", &[]).unwrap();
            assert_eq!(combined.len(), TAG_SIZE);

            let opened =
                open_combined(algorithm, &test_key(2), &[0; NONCE_SIZE], &combined, &[]).unwrap();
            assert!(opened.is_empty());
        }
    }

    #[test]
    fn wrong_key_fails() {
        for algorithm in ALGORITHMS {
            let sealed = seal(algorithm, &test_key(1), &[0; NONCE_SIZE], b"secret", &[]).unwrap();
            let result =
                open(algorithm, &test_key(2), &[0; NONCE_SIZE], &sealed.ciphertext, &sealed.tag, &[]);
            assert_eq!(result, Err(CryptoError::AeadOpen));
        }
    }

    #[test]
    fn wrong_aad_fails() {
        for algorithm in ALGORITHMS {
            let sealed = seal(algorithm, &test_key(1), &[0; NONCE_SIZE], b"secret", b"a").unwrap();
            let result =
                open(algorithm, &test_key(1), &[0; NONCE_SIZE], &sealed.ciphertext, &sealed.tag, b"b");
            assert_eq!(result, Err(CryptoError::AeadOpen));
        }
    }

    #[test]
    fn tampered_tag_fails() {
        for algorithm in ALGORITHMS {
            let mut sealed =
                seal(algorithm, &test_key(1), &[0; NONCE_SIZE], b"original", &[]).unwrap();
            sealed.tag[0] ^= 0x01;

            let result =
                open(algorithm, &test_key(1), &[0; NONCE_SIZE], &sealed.ciphertext, &sealed.tag, &[]);
            assert_eq!(result, Err(CryptoError::AeadOpen));
        }
    }

    #[test]
    fn truncated_input_fails() {
        let result = open_combined(
            AeadAlgorithm::Aes256Gcm,
            &test_key(1),
            &[0; NONCE_SIZE],
            &[0u8; TAG_SIZE - 1],
            &[],
        );
        assert_eq!(result, Err(CryptoError::AeadOpen));
    }

    #[test]
    fn algorithms_produce_different_ciphertexts() {
        let aes = seal(AeadAlgorithm::Aes256Gcm, &test_key(3), &[0; NONCE_SIZE], b"x", &[]).unwrap();
        let chacha =
            seal(AeadAlgorithm::ChaCha20Poly1305, &test_key(3), &[0; NONCE_SIZE], b"x", &[])
                .unwrap();
        assert_ne!(aes, chacha);
    }

    #[test]
    fn self_test_passes() {
        for algorithm in ALGORITHMS {
            self_test(algorithm, [0x42; KEY_SIZE], [0x24; NONCE_SIZE]).unwrap();
        }
    }

    #[test]
    fn debug_redacts_key() {
        assert_eq!(format!("{:?}", test_key(0xFF)), "SymmetricKey(<redacted>)");
    }
}
