//! CBOR encoding helpers for wire records and persisted state.
//!
//! CBOR via `ciborium` is the one serialization format in this crate: it is
//! used for transport records (`EncryptedMessage`, `SessionOffer`,
//! `PublicKeyBundle`), for persisted config and diagnostics, and for the
//! canonical metadata bytes that are signed and bound as associated data.

use serde::{Serialize, de::DeserializeOwned};

use crate::error::EncryptionError;

/// Encode a value as CBOR.
pub fn to_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>, EncryptionError> {
    let mut out = Vec::new();
    ciborium::into_writer(value, &mut out)
        .map_err(|e| EncryptionError::Codec { reason: e.to_string() })?;
    Ok(out)
}

/// Decode a value from CBOR.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, EncryptionError> {
    ciborium::from_reader(bytes).map_err(|e| EncryptionError::Codec { reason: e.to_string() })
}
