//! Session store: creation, lookup, expiry, counters and destruction.
//!
//! A session is the shared symmetric state between this process and one peer.
//! The initiator calls [`SessionStore::create_session`] with the peer's public
//! key bundle and gets back a [`SessionOffer`]; the responder feeds that offer
//! to [`SessionStore::accept_session`]. Both ends then hold a session under the
//! same ID with the same derived key.
//!
//! # Key derivation
//!
//! ```text
//! shared = X25519(our exchange secret, peer exchange public)
//! key    = HKDF-SHA256(ikm = shared, salt = random 32 bytes, info = label || session id)
//! ```
//!
//! The random salt makes every session key independent, even between the
//! same two key pairs.
//!
//! # Concurrency
//!
//! All mutations happen under one mutex. Cryptographic work never runs under
//! it: callers copy the key material out ([`OutboundKeys`], [`InboundKeys`])
//! and encrypt after the lock is released. Destroying a session while such a
//! copy is in flight is safe; the in-flight operation completes with the key
//! it captured.

use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use cipherlink_crypto::{
    AeadAlgorithm, ExchangeKeyPair, ExchangePublicKey, NONCE_SIZE, SESSION_SALT_SIZE,
    SharedSecret, SigningPublicKey, SymmetricKey, derive_session_key,
};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::{
    codec::{from_cbor, to_cbor},
    config::{EncryptionConfig, ReplayPolicy},
    env::Environment,
    error::EncryptionError,
    keys::{KeyGeneration, KeyMaterial, PublicKeyBundle},
};

/// Opaque 128-bit session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(u128);

impl SessionId {
    /// Wrap a raw identifier.
    pub const fn from_u128(raw: u128) -> Self {
        Self(raw)
    }

    /// Raw identifier.
    pub const fn as_u128(self) -> u128 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// Which side established the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionRole {
    /// Created the session with `create_session`
    Initiator,
    /// Joined the session with `accept_session`
    Responder,
}

impl SessionRole {
    /// The role the other end of the session holds.
    pub const fn opposite(self) -> Self {
        match self {
            Self::Initiator => Self::Responder,
            Self::Responder => Self::Initiator,
        }
    }
}

/// Everything the responder needs to derive the initiator's session.
///
/// Contains only public values; safe to send over an untrusted transport.
/// The salt is public as HKDF salts are, the secrecy comes from ECDH.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOffer {
    /// Session ID both ends will use
    pub session_id: SessionId,
    /// Initiator's application-level identity
    pub initiator_id: String,
    /// Exchange key used for this session (ephemeral under forward secrecy)
    /// and the initiator's signing key
    pub initiator_keys: PublicKeyBundle,
    /// Responder exchange key the initiator targeted, SPKI DER
    pub responder_exchange: Vec<u8>,
    /// HKDF salt
    pub salt: [u8; SESSION_SALT_SIZE],
    /// AEAD both ends will use
    pub algorithm: AeadAlgorithm,
    /// Creation time, ms since the Unix epoch
    pub created_at_ms: u64,
    /// Expiry time, ms since the Unix epoch
    pub expires_at_ms: u64,
}

impl SessionOffer {
    /// Encode for transport.
    pub fn to_cbor(&self) -> Result<Vec<u8>, EncryptionError> {
        to_cbor(self)
    }

    /// Decode from transport.
    pub fn from_cbor(bytes: &[u8]) -> Result<Self, EncryptionError> {
        from_cbor(bytes)
    }
}

/// Live session record. Secret fields are zeroized on destroy and on drop.
struct SecureSession {
    id: SessionId,
    peer_id: String,
    role: SessionRole,
    peer_exchange_key: ExchangePublicKey,
    peer_signing_key: SigningPublicKey,
    shared_secret: SharedSecret,
    session_key: SymmetricKey,
    /// Key generation current at creation; signs outbound messages
    signing_generation: Arc<KeyGeneration>,
    algorithm: AeadAlgorithm,
    created_at_ms: u64,
    expires_at_ms: u64,
    message_counter: u64,
    highest_received: u64,
    /// First-frame nonces of inbound streams already opened
    seen_streams: HashSet<[u8; NONCE_SIZE]>,
    rotation_due: bool,
    replaced_by: Option<SessionId>,
}

impl SecureSession {
    fn ensure_live(&self, now_ms: u64) -> Result<(), EncryptionError> {
        if self.expires_at_ms <= now_ms {
            return Err(EncryptionError::SessionExpired {
                session_id: self.id,
                expires_at_ms: self.expires_at_ms,
            });
        }
        Ok(())
    }

    fn wipe(&mut self) {
        self.shared_secret.zeroize();
        self.session_key.zeroize();
    }

    fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id,
            peer_id: self.peer_id.clone(),
            role: self.role,
            peer_exchange_key: self.peer_exchange_key,
            peer_signing_key: self.peer_signing_key,
            key_generation: self.signing_generation.generation(),
            algorithm: self.algorithm,
            created_at_ms: self.created_at_ms,
            expires_at_ms: self.expires_at_ms,
            message_counter: self.message_counter,
            highest_received: self.highest_received,
            rotation_due: self.rotation_due,
            replaced_by: self.replaced_by,
        }
    }
}

/// Non-secret view of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct SessionInfo {
    pub id: SessionId,
    pub peer_id: String,
    pub role: SessionRole,
    pub peer_exchange_key: ExchangePublicKey,
    pub peer_signing_key: SigningPublicKey,
    /// Key generation the session signs with
    pub key_generation: u64,
    pub algorithm: AeadAlgorithm,
    pub created_at_ms: u64,
    pub expires_at_ms: u64,
    /// Messages and stream chunks originated so far
    pub message_counter: u64,
    /// Highest inbound counter accepted
    pub highest_received: u64,
    pub rotation_due: bool,
    pub replaced_by: Option<SessionId>,
}

/// Key material captured for one outbound message or chunk.
pub struct OutboundKeys {
    /// Session key copy
    pub session_key: SymmetricKey,
    /// Session AEAD
    pub algorithm: AeadAlgorithm,
    /// Generation whose signing key signs this message
    pub signing_generation: Arc<KeyGeneration>,
    /// Counter assigned to this message (1-based)
    pub counter: u64,
    /// Peer the session belongs to
    pub peer_id: String,
    /// Our side of the session
    pub role: SessionRole,
}

/// Key material captured for one inbound message or stream.
pub struct InboundKeys {
    /// Session key copy
    pub session_key: SymmetricKey,
    /// Session AEAD
    pub algorithm: AeadAlgorithm,
    /// Key the peer signs with
    pub peer_signing_key: SigningPublicKey,
    /// Identity the peer must send as
    pub peer_id: String,
    /// Our side of the session
    pub role: SessionRole,
}

/// Keyed collection of live sessions.
///
/// # Invariants
///
/// - `expires_at_ms > created_at_ms` for every session
/// - Outbound counters never decrease
/// - Counters are assigned under the store lock, giving a total order per
///   session
#[derive(Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<SessionId, SecureSession>>,
}

impl SessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, SecureSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Establish a new session with a peer (initiator side).
    ///
    /// Under forward secrecy a throwaway exchange key is generated for this
    /// session and dropped once the key is derived; otherwise the current
    /// long-term exchange key is used.
    ///
    /// If a rotation-due session for the same peer is still live, it is
    /// marked as replaced by the new one and may no longer originate
    /// messages.
    ///
    /// # Errors
    ///
    /// - `KeyUnavailable` if no key generation is loaded
    /// - `InvalidKey` if the peer bundle does not parse
    pub fn create_session<E: Environment>(
        &self,
        env: &E,
        material: &KeyMaterial,
        config: &EncryptionConfig,
        local_id: &str,
        peer: &PublicKeyBundle,
        peer_id: &str,
    ) -> Result<(SessionId, SessionOffer), EncryptionError> {
        let generation = material.current()?;
        let peer_exchange_key = peer.exchange_key()?;
        let peer_signing_key = peer.signing_key()?;

        let (shared_secret, our_exchange) = if config.forward_secrecy {
            let ephemeral = ExchangeKeyPair::from_seed(env.random_array());
            (ephemeral.diffie_hellman(&peer_exchange_key)?, ephemeral.public_key())
        } else {
            let long_term = generation.exchange();
            (long_term.diffie_hellman(&peer_exchange_key)?, long_term.public_key())
        };

        let salt: [u8; SESSION_SALT_SIZE] = env.random_array();
        let created_at_ms = env.wall_clock_millis();
        let lifetime_ms = (config.session_lifetime.as_millis() as u64).max(1);
        let expires_at_ms = created_at_ms.saturating_add(lifetime_ms);

        let mut sessions = self.lock();
        let id = loop {
            let candidate = SessionId(env.random_u128());
            if !sessions.contains_key(&candidate) {
                break candidate;
            }
        };
        let session_key = derive_session_key(&shared_secret, &salt, id.as_u128());

        let offer = SessionOffer {
            session_id: id,
            initiator_id: local_id.to_string(),
            initiator_keys: PublicKeyBundle {
                exchange: our_exchange.to_spki(),
                signing: generation.signing().public_key().to_spki(),
            },
            responder_exchange: peer.exchange.clone(),
            salt,
            algorithm: config.algorithm,
            created_at_ms,
            expires_at_ms,
        };

        Self::mark_replaced(&mut sessions, peer_id, id);
        sessions.insert(id, SecureSession {
            id,
            peer_id: peer_id.to_string(),
            role: SessionRole::Initiator,
            peer_exchange_key,
            peer_signing_key,
            shared_secret,
            session_key,
            signing_generation: generation,
            algorithm: config.algorithm,
            created_at_ms,
            expires_at_ms,
            message_counter: 0,
            highest_received: 0,
            seen_streams: HashSet::new(),
            rotation_due: false,
            replaced_by: None,
        });

        tracing::debug!(session_id = %id, peer_id, "session created");
        Ok((id, offer))
    }

    /// Join a session offered by a peer (responder side).
    ///
    /// The lifetime is capped by our own `session_lifetime`, counted from the
    /// offer's creation time or from now if that lies in the future. An
    /// initiator cannot grant itself a longer session than we would.
    ///
    /// # Errors
    ///
    /// - `KeyUnavailable` if no key generation is loaded
    /// - `OfferKeyMismatch` if the offer targets a rotated-out exchange key
    /// - `SessionExpired` if the offer's lifetime has already elapsed
    /// - `SessionExists` if the ID is already live in this store
    pub fn accept_session<E: Environment>(
        &self,
        env: &E,
        material: &KeyMaterial,
        config: &EncryptionConfig,
        offer: &SessionOffer,
    ) -> Result<SessionId, EncryptionError> {
        let generation = material.current()?;
        if offer.responder_exchange != generation.exchange().public_key().to_spki() {
            return Err(EncryptionError::OfferKeyMismatch);
        }

        let now_ms = env.wall_clock_millis();
        if offer.expires_at_ms <= now_ms || offer.expires_at_ms <= offer.created_at_ms {
            return Err(EncryptionError::SessionExpired {
                session_id: offer.session_id,
                expires_at_ms: offer.expires_at_ms,
            });
        }

        let created_at_ms = offer.created_at_ms.min(now_ms);
        let lifetime_ms = (config.session_lifetime.as_millis() as u64).max(1);
        let expires_at_ms = offer.expires_at_ms.min(created_at_ms.saturating_add(lifetime_ms));

        let peer_exchange_key = offer.initiator_keys.exchange_key()?;
        let peer_signing_key = offer.initiator_keys.signing_key()?;
        let shared_secret = generation.exchange().diffie_hellman(&peer_exchange_key)?;
        let session_key =
            derive_session_key(&shared_secret, &offer.salt, offer.session_id.as_u128());

        let id = offer.session_id;
        let mut sessions = self.lock();
        if sessions.contains_key(&id) {
            return Err(EncryptionError::SessionExists(id));
        }

        Self::mark_replaced(&mut sessions, &offer.initiator_id, id);
        sessions.insert(id, SecureSession {
            id,
            peer_id: offer.initiator_id.clone(),
            role: SessionRole::Responder,
            peer_exchange_key,
            peer_signing_key,
            shared_secret,
            session_key,
            signing_generation: generation,
            algorithm: offer.algorithm,
            created_at_ms,
            expires_at_ms,
            message_counter: 0,
            highest_received: 0,
            seen_streams: HashSet::new(),
            rotation_due: false,
            replaced_by: None,
        });

        tracing::debug!(session_id = %id, peer_id = %offer.initiator_id, "session accepted");
        Ok(id)
    }

    fn mark_replaced(
        sessions: &mut HashMap<SessionId, SecureSession>,
        peer_id: &str,
        replacement: SessionId,
    ) {
        for session in sessions.values_mut() {
            if session.peer_id == peer_id && session.rotation_due && session.replaced_by.is_none() {
                session.replaced_by = Some(replacement);
                tracing::debug!(session_id = %session.id, %replacement, "session superseded");
            }
        }
    }

    /// Non-secret view of a session.
    pub fn lookup(&self, id: SessionId) -> Result<SessionInfo, EncryptionError> {
        self.lock().get(&id).map(SecureSession::info).ok_or(EncryptionError::SessionNotFound(id))
    }

    /// Reserve the next outbound counter and capture the sending keys.
    ///
    /// # Errors
    ///
    /// - `SessionNotFound`, `SessionExpired`
    /// - `SessionSuperseded` if a replacement session exists
    pub fn next_outbound(&self, id: SessionId, now_ms: u64) -> Result<OutboundKeys, EncryptionError> {
        let mut sessions = self.lock();
        let session = sessions.get_mut(&id).ok_or(EncryptionError::SessionNotFound(id))?;
        session.ensure_live(now_ms)?;
        if let Some(replacement) = session.replaced_by {
            return Err(EncryptionError::SessionSuperseded { session_id: id, replacement });
        }

        session.message_counter += 1;

        Ok(OutboundKeys {
            session_key: session.session_key.clone(),
            algorithm: session.algorithm,
            signing_generation: Arc::clone(&session.signing_generation),
            counter: session.message_counter,
            peer_id: session.peer_id.clone(),
            role: session.role,
        })
    }

    /// Capture the receiving keys.
    ///
    /// Rotation-due and superseded sessions still decrypt.
    pub fn inbound(&self, id: SessionId, now_ms: u64) -> Result<InboundKeys, EncryptionError> {
        let sessions = self.lock();
        let session = sessions.get(&id).ok_or(EncryptionError::SessionNotFound(id))?;
        session.ensure_live(now_ms)?;

        Ok(InboundKeys {
            session_key: session.session_key.clone(),
            algorithm: session.algorithm,
            peer_signing_key: session.peer_signing_key,
            peer_id: session.peer_id.clone(),
            role: session.role,
        })
    }

    /// Check the session exists and has not expired.
    pub fn ensure_live(&self, id: SessionId, now_ms: u64) -> Result<(), EncryptionError> {
        self.lock().get(&id).ok_or(EncryptionError::SessionNotFound(id))?.ensure_live(now_ms)
    }

    /// Record an authenticated inbound counter.
    ///
    /// Call only after the message has been verified, so forged messages
    /// cannot advance the counter.
    ///
    /// # Errors
    ///
    /// - `ReplayDetected` under [`ReplayPolicy::Strict`] if `counter` does not
    ///   exceed the highest counter already accepted
    pub fn accept_inbound(
        &self,
        id: SessionId,
        counter: u64,
        policy: ReplayPolicy,
    ) -> Result<(), EncryptionError> {
        let mut sessions = self.lock();
        let session = sessions.get_mut(&id).ok_or(EncryptionError::SessionNotFound(id))?;

        match policy {
            ReplayPolicy::Strict if counter <= session.highest_received => {
                Err(EncryptionError::ReplayDetected {
                    counter,
                    highest_seen: session.highest_received,
                })
            },
            ReplayPolicy::Strict | ReplayPolicy::Permissive => {
                session.highest_received = session.highest_received.max(counter);
                Ok(())
            },
        }
    }

    /// Record an authenticated inbound stream by its first-frame nonce.
    ///
    /// # Errors
    ///
    /// - `StreamReplayed` under [`ReplayPolicy::Strict`] if a stream with the
    ///   same first frame was already opened on this session
    pub fn accept_stream(
        &self,
        id: SessionId,
        stream_id: [u8; NONCE_SIZE],
        policy: ReplayPolicy,
    ) -> Result<(), EncryptionError> {
        let mut sessions = self.lock();
        let session = sessions.get_mut(&id).ok_or(EncryptionError::SessionNotFound(id))?;

        let fresh = session.seen_streams.insert(stream_id);
        if !fresh && policy == ReplayPolicy::Strict {
            return Err(EncryptionError::StreamReplayed { session_id: id });
        }
        Ok(())
    }

    /// Remove a session, zeroizing its secrets first.
    pub fn destroy_session(&self, id: SessionId) -> Result<(), EncryptionError> {
        let mut session = self.lock().remove(&id).ok_or(EncryptionError::SessionNotFound(id))?;
        session.wipe();
        tracing::debug!(session_id = %id, "session destroyed");
        Ok(())
    }

    /// Remove every session. Returns how many were destroyed.
    pub fn destroy_all(&self) -> usize {
        let drained: Vec<SecureSession> = self.lock().drain().map(|(_, session)| session).collect();
        let count = drained.len();
        for mut session in drained {
            session.wipe();
        }
        count
    }

    /// Remove sessions whose lifetime has elapsed. Returns how many.
    pub fn purge_expired(&self, now_ms: u64) -> usize {
        let mut sessions = self.lock();
        let expired: Vec<SessionId> = sessions
            .values()
            .filter(|session| session.expires_at_ms <= now_ms)
            .map(|session| session.id)
            .collect();

        for id in &expired {
            if let Some(mut session) = sessions.remove(id) {
                session.wipe();
            }
        }
        expired.len()
    }

    /// Flag every live session as due for rotation. Returns how many.
    pub fn mark_all_rotation_due(&self) -> usize {
        let mut sessions = self.lock();
        for session in sessions.values_mut() {
            session.rotation_due = true;
        }
        sessions.len()
    }

    /// IDs of all live sessions, sorted.
    pub fn active_sessions(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True if no sessions are live.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Durable session persistence.
    ///
    /// Not supported: session keys are never written out, so a restart
    /// requires every session to be re-established.
    pub fn persist(&self) -> Result<(), EncryptionError> {
        Err(EncryptionError::Unsupported { operation: "session persistence" })
    }

    /// Restore sessions from durable storage. Not supported, see
    /// [`persist`](Self::persist).
    pub fn restore(&self) -> Result<usize, EncryptionError> {
        Err(EncryptionError::Unsupported { operation: "session restore" })
    }
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStore").field("sessions", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::sim::SimEnv;

    struct Party {
        env: SimEnv,
        material: KeyMaterial,
        store: SessionStore,
    }

    impl Party {
        fn new(seed: u64) -> Self {
            let env = SimEnv::with_seed(seed);
            let material = KeyMaterial::new();
            material.rotate(&env);
            Self { env, material, store: SessionStore::new() }
        }

        fn bundle(&self) -> PublicKeyBundle {
            self.material.public_bundle().unwrap()
        }

        fn accept(&self, offer: &SessionOffer) -> Result<SessionId, EncryptionError> {
            let config = EncryptionConfig::default();
            self.store.accept_session(&self.env, &self.material, &config, offer)
        }

        fn create(&self, peer: &Party, config: &EncryptionConfig) -> (SessionId, SessionOffer) {
            self.store
                .create_session(&self.env, &self.material, config, "alice", &peer.bundle(), "bob")
                .unwrap()
        }
    }

    fn key_of(store: &SessionStore, id: SessionId) -> [u8; 32] {
        *store.inbound(id, 0).unwrap().session_key.as_bytes()
    }

    #[test]
    fn create_and_accept_derive_same_key() {
        let alice = Party::new(1);
        let bob = Party::new(2);
        let config = EncryptionConfig::default();

        let (id, offer) = alice.create(&bob, &config);
        let accepted = bob.accept(&offer).unwrap();

        assert_eq!(accepted, id);
        assert_eq!(key_of(&alice.store, id), key_of(&bob.store, id));
    }

    #[test]
    fn forward_secrecy_uses_ephemeral_key() {
        let alice = Party::new(1);
        let bob = Party::new(2);
        let config = EncryptionConfig { forward_secrecy: true, ..EncryptionConfig::default() };

        let (id, offer) = alice.create(&bob, &config);
        bob.accept(&offer).unwrap();

        assert_ne!(offer.initiator_keys.exchange, alice.bundle().exchange);
        assert_eq!(offer.initiator_keys.signing, alice.bundle().signing);
        assert_eq!(key_of(&alice.store, id), key_of(&bob.store, id));
    }

    #[test]
    fn sessions_with_same_peer_have_distinct_keys() {
        let alice = Party::new(1);
        let bob = Party::new(2);
        let config = EncryptionConfig::default();

        let (first, _) = alice.create(&bob, &config);
        let (second, _) = alice.create(&bob, &config);

        assert_ne!(first, second);
        assert_ne!(key_of(&alice.store, first), key_of(&alice.store, second));
    }

    #[test]
    fn new_session_has_documented_lifetime_and_zero_counter() {
        let alice = Party::new(1);
        let bob = Party::new(2);

        let (id, _) = alice.create(&bob, &EncryptionConfig::default());
        let info = alice.store.lookup(id).unwrap();

        assert_eq!(info.expires_at_ms - info.created_at_ms, 24 * 60 * 60 * 1000);
        assert_eq!(info.message_counter, 0);
        assert_eq!(info.role, SessionRole::Initiator);
        assert!(!info.rotation_due);
    }

    #[test]
    fn outbound_counter_increments() {
        let alice = Party::new(1);
        let bob = Party::new(2);
        let (id, _) = alice.create(&bob, &EncryptionConfig::default());
        let now = alice.env.wall_clock_millis();

        for expected in 1..=5 {
            assert_eq!(alice.store.next_outbound(id, now).unwrap().counter, expected);
        }
        assert_eq!(alice.store.lookup(id).unwrap().message_counter, 5);
    }

    #[test]
    fn expired_session_rejected_for_both_directions() {
        let alice = Party::new(1);
        let bob = Party::new(2);
        let config = EncryptionConfig {
            session_lifetime: Duration::from_secs(10),
            ..EncryptionConfig::default()
        };
        let (id, _) = alice.create(&bob, &config);
        let expires = alice.store.lookup(id).unwrap().expires_at_ms;

        assert!(alice.store.next_outbound(id, expires - 1).is_ok());
        assert!(matches!(
            alice.store.next_outbound(id, expires),
            Err(EncryptionError::SessionExpired { .. })
        ));
        assert!(matches!(
            alice.store.inbound(id, expires),
            Err(EncryptionError::SessionExpired { .. })
        ));
    }

    #[test]
    fn strict_policy_rejects_replay() {
        let alice = Party::new(1);
        let bob = Party::new(2);
        let (id, _) = alice.create(&bob, &EncryptionConfig::default());

        alice.store.accept_inbound(id, 1, ReplayPolicy::Strict).unwrap();
        alice.store.accept_inbound(id, 3, ReplayPolicy::Strict).unwrap();

        assert_eq!(
            alice.store.accept_inbound(id, 3, ReplayPolicy::Strict),
            Err(EncryptionError::ReplayDetected { counter: 3, highest_seen: 3 })
        );
        assert!(alice.store.accept_inbound(id, 2, ReplayPolicy::Strict).is_err());
    }

    #[test]
    fn permissive_policy_accepts_out_of_order() {
        let alice = Party::new(1);
        let bob = Party::new(2);
        let (id, _) = alice.create(&bob, &EncryptionConfig::default());

        alice.store.accept_inbound(id, 5, ReplayPolicy::Permissive).unwrap();
        alice.store.accept_inbound(id, 2, ReplayPolicy::Permissive).unwrap();
        alice.store.accept_inbound(id, 5, ReplayPolicy::Permissive).unwrap();

        assert_eq!(alice.store.lookup(id).unwrap().highest_received, 5);
    }

    #[test]
    fn destroy_removes_session() {
        let alice = Party::new(1);
        let bob = Party::new(2);
        let (id, _) = alice.create(&bob, &EncryptionConfig::default());

        alice.store.destroy_session(id).unwrap();

        assert!(alice.store.is_empty());
        assert_eq!(alice.store.lookup(id), Err(EncryptionError::SessionNotFound(id)));
        assert_eq!(alice.store.destroy_session(id), Err(EncryptionError::SessionNotFound(id)));
    }

    #[test]
    fn captured_keys_survive_destroy() {
        let alice = Party::new(1);
        let bob = Party::new(2);
        let (id, _) = alice.create(&bob, &EncryptionConfig::default());
        let before = key_of(&alice.store, id);

        let captured = alice.store.inbound(id, 0).unwrap();
        alice.store.destroy_session(id).unwrap();

        assert_eq!(captured.session_key.as_bytes(), &before);
    }

    #[test]
    fn rotation_due_session_is_superseded_by_new_session_for_same_peer() {
        let alice = Party::new(1);
        let bob = Party::new(2);
        let config = EncryptionConfig::default();
        let (old, _) = alice.create(&bob, &config);

        assert_eq!(alice.store.mark_all_rotation_due(), 1);
        let (new, _) = alice.create(&bob, &config);

        assert_eq!(alice.store.lookup(old).unwrap().replaced_by, Some(new));
        assert!(matches!(
            alice.store.next_outbound(old, 0),
            Err(EncryptionError::SessionSuperseded { replacement, .. }) if replacement == new
        ));
        assert!(alice.store.inbound(old, 0).is_ok());
        assert!(alice.store.next_outbound(new, 0).is_ok());
    }

    #[test]
    fn accept_rejects_duplicate_and_stale_offers() {
        let alice = Party::new(1);
        let bob = Party::new(2);
        let (_, offer) = alice.create(&bob, &EncryptionConfig::default());

        bob.accept(&offer).unwrap();
        assert!(matches!(
            bob.accept(&offer),
            Err(EncryptionError::SessionExists(_))
        ));

        let stale_bundle = bob.bundle();
        bob.material.rotate(&bob.env);
        let (_, second) = alice
            .store
            .create_session(
                &alice.env,
                &alice.material,
                &EncryptionConfig::default(),
                "alice",
                &stale_bundle,
                "bob",
            )
            .unwrap();
        assert_eq!(
            bob.accept(&second),
            Err(EncryptionError::OfferKeyMismatch)
        );
    }

    #[test]
    fn accept_rejects_expired_offer() {
        let alice = Party::new(1);
        let bob = Party::new(2);
        let config = EncryptionConfig {
            session_lifetime: Duration::from_secs(1),
            ..EncryptionConfig::default()
        };
        let (_, offer) = alice.create(&bob, &config);

        bob.env.advance(Duration::from_secs(2));

        assert!(matches!(
            bob.accept(&offer),
            Err(EncryptionError::SessionExpired { .. })
        ));
    }

    #[test]
    fn accept_caps_lifetime_at_own_config() {
        let alice = Party::new(1);
        let bob = Party::new(2);
        let generous = EncryptionConfig {
            session_lifetime: Duration::from_secs(365 * 24 * 60 * 60),
            ..EncryptionConfig::default()
        };
        let strict = EncryptionConfig {
            session_lifetime: Duration::from_secs(60),
            ..EncryptionConfig::default()
        };
        let (id, offer) = alice.create(&bob, &generous);

        bob.store.accept_session(&bob.env, &bob.material, &strict, &offer).unwrap();
        let info = bob.store.lookup(id).unwrap();

        assert_eq!(info.expires_at_ms, offer.created_at_ms + 60_000);
        assert!(bob.store.inbound(id, info.expires_at_ms).is_err());
    }

    #[test]
    fn accept_ignores_future_creation_time() {
        let alice = Party::new(1);
        let bob = Party::new(2);
        let (id, mut offer) = alice.create(&bob, &EncryptionConfig::default());
        offer.created_at_ms = u64::MAX - 1;
        offer.expires_at_ms = u64::MAX;

        bob.accept(&offer).unwrap();
        let info = bob.store.lookup(id).unwrap();

        let now = bob.env.wall_clock_millis();
        assert_eq!(info.created_at_ms, now);
        assert_eq!(info.expires_at_ms, now + 24 * 60 * 60 * 1000);
    }

    #[test]
    fn strict_policy_rejects_repeated_stream() {
        let alice = Party::new(1);
        let bob = Party::new(2);
        let (id, _) = alice.create(&bob, &EncryptionConfig::default());

        alice.store.accept_stream(id, [1; NONCE_SIZE], ReplayPolicy::Strict).unwrap();
        alice.store.accept_stream(id, [2; NONCE_SIZE], ReplayPolicy::Strict).unwrap();

        assert_eq!(
            alice.store.accept_stream(id, [1; NONCE_SIZE], ReplayPolicy::Strict),
            Err(EncryptionError::StreamReplayed { session_id: id })
        );
        assert!(alice.store.accept_stream(id, [1; NONCE_SIZE], ReplayPolicy::Permissive).is_ok());
    }

    #[test]
    fn create_without_keys_fails() {
        let env = SimEnv::with_seed(1);
        let empty = KeyMaterial::new();
        let bob = Party::new(2);

        let result = SessionStore::new().create_session(
            &env,
            &empty,
            &EncryptionConfig::default(),
            "alice",
            &bob.bundle(),
            "bob",
        );
        assert!(matches!(result, Err(EncryptionError::KeyUnavailable)));
    }

    #[test]
    fn purge_removes_only_expired() {
        let alice = Party::new(1);
        let bob = Party::new(2);
        let short = EncryptionConfig {
            session_lifetime: Duration::from_secs(1),
            ..EncryptionConfig::default()
        };
        alice.create(&bob, &short);
        let (long, _) = alice.create(&bob, &EncryptionConfig::default());

        let later = alice.env.wall_clock_millis() + 5_000;
        assert_eq!(alice.store.purge_expired(later), 1);
        assert_eq!(alice.store.active_sessions(), vec![long]);
    }

    #[test]
    fn persistence_is_explicitly_unsupported() {
        let store = SessionStore::new();

        assert!(matches!(store.persist(), Err(EncryptionError::Unsupported { .. })));
        assert!(matches!(store.restore(), Err(EncryptionError::Unsupported { .. })));
    }

    #[test]
    fn offer_cbor_roundtrip() {
        let alice = Party::new(1);
        let bob = Party::new(2);
        let (_, offer) = alice.create(&bob, &EncryptionConfig::default());

        assert_eq!(SessionOffer::from_cbor(&offer.to_cbor().unwrap()).unwrap(), offer);
    }

    #[test]
    fn session_id_displays_as_hex() {
        assert_eq!(SessionId::from_u128(0xAB).to_string(), format!("{:032x}", 0xABu128));
    }
}
