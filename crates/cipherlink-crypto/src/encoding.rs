//! SubjectPublicKeyInfo (SPKI) DER encoding for 32-byte curve keys
//!
//! X25519 and Ed25519 public keys have a fixed-size SPKI encoding (RFC 8410):
//! a 12-byte DER header followed by the raw 32-byte key. That makes encode and
//! decode simple prefix operations rather than general ASN.1 parsing.

use crate::error::CryptoError;

/// Raw public key width for both curves
pub const RAW_PUBLIC_KEY_SIZE: usize = 32;

/// SPKI header length
const SPKI_HEADER_SIZE: usize = 12;

/// Total encoded SPKI length
pub const SPKI_SIZE: usize = SPKI_HEADER_SIZE + RAW_PUBLIC_KEY_SIZE;

/// SEQUENCE { SEQUENCE { OID 1.3.101.110 } BIT STRING (33 bytes) }
const X25519_SPKI_HEADER: [u8; SPKI_HEADER_SIZE] =
    [0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x6e, 0x03, 0x21, 0x00];

/// SEQUENCE { SEQUENCE { OID 1.3.101.112 } BIT STRING (33 bytes) }
const ED25519_SPKI_HEADER: [u8; SPKI_HEADER_SIZE] =
    [0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x03, 0x21, 0x00];

/// Curve a public key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    /// X25519 key agreement key
    X25519,
    /// Ed25519 signature verification key
    Ed25519,
}

impl KeyKind {
    fn header(self) -> &'static [u8; SPKI_HEADER_SIZE] {
        match self {
            Self::X25519 => &X25519_SPKI_HEADER,
            Self::Ed25519 => &ED25519_SPKI_HEADER,
        }
    }
}

/// Encode a raw public key as SPKI DER.
pub fn encode_spki(kind: KeyKind, raw: &[u8; RAW_PUBLIC_KEY_SIZE]) -> Vec<u8> {
    let mut out = Vec::with_capacity(SPKI_SIZE);
    out.extend_from_slice(kind.header());
    out.extend_from_slice(raw);
    out
}

/// Decode SPKI DER into a raw public key.
///
/// # Errors
///
/// - `InvalidEncoding` if the length is wrong
/// - `InvalidKey` if the algorithm header does not match `kind`
pub fn decode_spki(kind: KeyKind, encoded: &[u8]) -> Result<[u8; RAW_PUBLIC_KEY_SIZE], CryptoError> {
    if encoded.len() != SPKI_SIZE {
        return Err(CryptoError::InvalidEncoding { expected: SPKI_SIZE, actual: encoded.len() });
    }

    let (header, raw) = encoded.split_at(SPKI_HEADER_SIZE);
    if header != kind.header() {
        return Err(CryptoError::InvalidKey {
            reason: format!("SPKI header is not {kind:?}"),
        });
    }

    let mut out = [0u8; RAW_PUBLIC_KEY_SIZE];
    out.copy_from_slice(raw);
    Ok(out)
}
