//! Pluggable compression applied to plaintext before sealing.
//!
//! No real codec ships with this crate. [`PassthroughCompression`] marks
//! messages as compressed without changing their bytes, so the metadata path
//! and the mismatch checks are exercised end to end. A real codec slots in
//! behind the same trait.

use serde::{Deserialize, Serialize};

use crate::error::EncryptionError;

/// Compression recorded in message metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CompressionKind {
    /// Plaintext was sealed as is
    #[default]
    None,
    /// Plaintext went through [`PassthroughCompression`]
    Passthrough,
}

/// Compression strategy.
pub trait Compression: Send + Sync {
    /// Kind recorded in metadata for payloads this strategy produced.
    fn kind(&self) -> CompressionKind;

    /// Compress a plaintext.
    fn compress(&self, plaintext: &[u8]) -> Result<Vec<u8>, EncryptionError>;

    /// Reverse [`compress`](Self::compress).
    fn decompress(&self, payload: &[u8]) -> Result<Vec<u8>, EncryptionError>;
}

/// Identity strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughCompression;

impl Compression for PassthroughCompression {
    fn kind(&self) -> CompressionKind {
        CompressionKind::Passthrough
    }

    fn compress(&self, plaintext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        Ok(plaintext.to_vec())
    }

    fn decompress(&self, payload: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        Ok(payload.to_vec())
    }
}

/// Undo the compression named in metadata.
///
/// # Errors
///
/// - `CompressionError` if the message was compressed by a strategy other
///   than `strategy`
pub fn decompress_with(
    strategy: &dyn Compression,
    kind: CompressionKind,
    payload: Vec<u8>,
) -> Result<Vec<u8>, EncryptionError> {
    match kind {
        CompressionKind::None => Ok(payload),
        kind if kind == strategy.kind() => strategy.decompress(&payload),
        kind => Err(EncryptionError::CompressionError {
            reason: format!("message compressed with {kind:?}, strategy is {:?}", strategy.kind()),
        }),
    }
}
