//! Discrete message encryption.
//!
//! # Envelope
//!
//! ```text
//! EncryptedMessage {
//!     ciphertext,                 // same length as the (compressed) plaintext
//!     nonce:     12 bytes,        // fresh per message
//!     tag:       16 bytes,        // AEAD tag, transported separately
//!     metadata,                   // CBOR of this record is the AEAD associated data
//!     signature: Option<64 bytes> // Ed25519 over SHA-256(label, ciphertext, nonce, metadata)
//! }
//! ```
//!
//! Two independent checks protect every message. The AEAD tag proves the
//! sender knew the session key. The signature proves which key generation
//! signed it, so a holder of the session key alone cannot forge messages.
//!
//! # Decryption order
//!
//! 1. Session lookup (`SessionNotFound`, `SessionExpired`)
//! 2. Nonce and tag widths, algorithm, protocol version (`DecryptionFailed`)
//! 3. Signature (`SignatureInvalid`)
//! 4. AEAD open (`DecryptionFailed`)
//! 5. Authenticated sender is the session peer (`DecryptionFailed`)
//! 6. Replay check (`ReplayDetected`)
//! 7. Decompression (`CompressionError`)
//!
//! Both directions of a session share one key, so step 5 is what stops a
//! message from being reflected back to its own sender. The counter is only
//! recorded after step 5, so an unauthenticated message can never advance it.

use cipherlink_crypto::{AeadAlgorithm, NONCE_SIZE, TAG_SIZE, signature_digest};
use serde::{Deserialize, Serialize};

use crate::{
    codec::{from_cbor, to_cbor},
    compression::{Compression, CompressionKind, decompress_with},
    config::{EncryptionConfig, PROTOCOL_VERSION},
    env::Environment,
    error::EncryptionError,
    session::{SessionId, SessionStore},
    stats::StatsRecorder,
};

/// Application-level kind of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// Chat text
    Text,
    /// Media payload
    Media,
    /// Stream control
    Stream,
    /// System notice
    System,
}

/// Metadata carried next to the ciphertext.
///
/// The CBOR encoding of this record is both the AEAD associated data and part
/// of the signed digest, so no field can be changed in transit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionMetadata {
    /// AEAD used to seal the message
    pub algorithm: AeadAlgorithm,
    /// Session the message belongs to
    pub key_id: SessionId,
    /// Wall-clock time of encryption, ms since the Unix epoch
    pub timestamp_ms: u64,
    /// Envelope version
    pub version: u16,
    /// Sender's application-level identity
    pub sender_id: String,
    /// Intended recipient
    pub recipient_id: String,
    /// Kind of payload
    pub message_type: MessageType,
    /// Compression applied before sealing
    pub compression: CompressionKind,
    /// Sender's outbound counter for this message (1-based)
    pub counter: u64,
}

/// Encrypted message envelope.
///
/// Field widths are validated on decryption rather than in the type, so a
/// malformed envelope from the wire still decodes and fails with
/// `DecryptionFailed` instead of a codec error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedMessage {
    /// Ciphertext without the tag
    pub ciphertext: Vec<u8>,
    /// AEAD nonce
    pub nonce: Vec<u8>,
    /// AEAD tag
    pub tag: Vec<u8>,
    /// Message metadata
    pub metadata: EncryptionMetadata,
    /// Sender signature, present when metadata protection is on
    pub signature: Option<Vec<u8>>,
}

impl EncryptedMessage {
    /// Encode for transport.
    pub fn to_cbor(&self) -> Result<Vec<u8>, EncryptionError> {
        to_cbor(self)
    }

    /// Decode from transport.
    pub fn from_cbor(bytes: &[u8]) -> Result<Self, EncryptionError> {
        from_cbor(bytes)
    }
}

/// Seals and opens [`EncryptedMessage`]s against a [`SessionStore`].
pub struct MessageCipher<'a, E: Environment> {
    env: &'a E,
    sessions: &'a SessionStore,
    stats: &'a StatsRecorder,
    compression: &'a dyn Compression,
    local_id: &'a str,
}

impl<'a, E: Environment> MessageCipher<'a, E> {
    /// Bind a cipher to the engine's components.
    pub fn new(
        env: &'a E,
        sessions: &'a SessionStore,
        stats: &'a StatsRecorder,
        compression: &'a dyn Compression,
        local_id: &'a str,
    ) -> Self {
        Self { env, sessions, stats, compression, local_id }
    }

    /// Encrypt `plaintext` on a session.
    ///
    /// # Errors
    ///
    /// - `SessionNotFound`, `SessionExpired`, `SessionSuperseded`
    /// - `CompressionError` if the strategy fails
    pub fn encrypt(
        &self,
        config: &EncryptionConfig,
        session_id: SessionId,
        plaintext: &[u8],
        message_type: MessageType,
        recipient_id: &str,
    ) -> Result<EncryptedMessage, EncryptionError> {
        let start = self.env.now();
        let keys = self.sessions.next_outbound(session_id, self.env.wall_clock_millis())?;

        let (payload, compression) = if config.compression {
            (self.compression.compress(plaintext)?, self.compression.kind())
        } else {
            (plaintext.to_vec(), CompressionKind::None)
        };

        let nonce: [u8; NONCE_SIZE] = self.env.random_array();
        let metadata = EncryptionMetadata {
            algorithm: keys.algorithm,
            key_id: session_id,
            timestamp_ms: self.env.wall_clock_millis(),
            version: PROTOCOL_VERSION,
            sender_id: self.local_id.to_string(),
            recipient_id: recipient_id.to_string(),
            message_type,
            compression,
            counter: keys.counter,
        };
        let aad = to_cbor(&metadata)?;

        let sealed =
            cipherlink_crypto::seal(keys.algorithm, &keys.session_key, &nonce, &payload, &aad)?;

        let signature = config.metadata_protection.then(|| {
            let digest = signature_digest(&sealed.ciphertext, &nonce, &aad);
            keys.signing_generation.signing().sign(&digest).to_vec()
        });

        self.stats.record_encryption(plaintext.len(), self.env.now() - start);
        tracing::debug!(
            %session_id,
            counter = keys.counter,
            bytes = plaintext.len(),
            signed = signature.is_some(),
            "message encrypted"
        );

        Ok(EncryptedMessage {
            ciphertext: sealed.ciphertext,
            nonce: nonce.to_vec(),
            tag: sealed.tag.to_vec(),
            metadata,
            signature,
        })
    }

    /// Verify and decrypt a message.
    ///
    /// # Errors
    ///
    /// See the module docs for the order of checks. No plaintext is ever
    /// returned alongside an error.
    pub fn decrypt(
        &self,
        config: &EncryptionConfig,
        message: &EncryptedMessage,
    ) -> Result<Vec<u8>, EncryptionError> {
        let start = self.env.now();
        let metadata = &message.metadata;
        let session_id = metadata.key_id;
        let keys = self.sessions.inbound(session_id, self.env.wall_clock_millis())?;

        let (Ok(nonce), Ok(tag)) = (
            <[u8; NONCE_SIZE]>::try_from(message.nonce.as_slice()),
            <[u8; TAG_SIZE]>::try_from(message.tag.as_slice()),
        ) else {
            tracing::debug!(%session_id, "rejected envelope with wrong nonce or tag width");
            return Err(EncryptionError::DecryptionFailed);
        };
        if metadata.algorithm != keys.algorithm || metadata.version != PROTOCOL_VERSION {
            tracing::debug!(%session_id, "rejected envelope with foreign algorithm or version");
            return Err(EncryptionError::DecryptionFailed);
        }

        let aad = to_cbor(metadata)?;

        match (&message.signature, config.metadata_protection) {
            (Some(signature), _) => {
                let digest = signature_digest(&message.ciphertext, &nonce, &aad);
                keys.peer_signing_key
                    .verify(&digest, signature)
                    .map_err(|_| EncryptionError::SignatureInvalid)?;
            },
            (None, true) => return Err(EncryptionError::SignatureInvalid),
            (None, false) => {},
        }

        let payload = cipherlink_crypto::open(
            keys.algorithm,
            &keys.session_key,
            &nonce,
            &message.ciphertext,
            &tag,
            &aad,
        )
        .map_err(|e| {
            tracing::debug!(%session_id, error = %e, "message failed authentication");
            EncryptionError::DecryptionFailed
        })?;

        if metadata.sender_id != keys.peer_id {
            tracing::debug!(
                %session_id,
                sender_id = %metadata.sender_id,
                "message not from session peer"
            );
            return Err(EncryptionError::DecryptionFailed);
        }

        self.sessions.accept_inbound(session_id, metadata.counter, config.replay_policy)?;

        let plaintext = decompress_with(self.compression, metadata.compression, payload)?;

        self.stats.record_decryption(plaintext.len(), self.env.now() - start);
        tracing::debug!(%session_id, counter = metadata.counter, "message decrypted");

        Ok(plaintext)
    }
}
