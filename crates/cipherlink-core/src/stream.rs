//! Chunked encryption of continuous streams.
//!
//! Both directions are lazy iterator adapters: a chunk is sealed or opened
//! only when the consumer pulls it, and order is preserved.
//!
//! # Frame format
//!
//! ```text
//! +------------+----------------------+------------+
//! | nonce (12) | ciphertext (n bytes) | tag (16)   |
//! +------------+----------------------+------------+
//! ```
//!
//! # Associated data
//!
//! ```text
//! aad = "cipherlinkStreamV1" || session_id (16 BE) || sender role (1)
//!       || stream_id (12) || chunk_index (8 BE) || final (1)
//! ```
//!
//! `stream_id` is the nonce of the stream's first frame, so every stream on a
//! session has its own identity. With it:
//!
//! - Reordered frames, and frames spliced in from another stream or another
//!   session, fail authentication.
//! - A stream cut short fails at its new last frame, which was not sealed as
//!   final. Frames appended after the final one fail the same way.
//! - Frames cannot be reflected back to the side that sealed them.
//! - Under [`ReplayPolicy::Strict`] a stream whose first frame was already
//!   opened on the session fails with `StreamReplayed`.
//!
//! To know whether a chunk is the last, both adapters look one item ahead:
//! the encryptor pulls the next source chunk before yielding a frame, the
//! decryptor pulls the next frame before yielding a chunk.
//!
//! An empty stream has no frames, so a stream dropped in its entirety cannot
//! be detected here. Chunks yielded before an error are authentic, but the
//! stream as a whole must be treated as failed.
//!
//! Both adapters are fused: after the first error they yield `None`. That
//! error is also sent to the [`ErrorReporter`] at `High` severity.

use std::iter::Peekable;

use cipherlink_crypto::{NONCE_SIZE, TAG_SIZE};

use crate::{
    config::ReplayPolicy,
    env::Environment,
    error::EncryptionError,
    report::{ErrorReporter, Severity},
    session::{InboundKeys, SessionId, SessionRole, SessionStore},
    stats::StatsRecorder,
};

/// Smallest valid frame: nonce plus tag around an empty chunk.
pub const MIN_FRAME_SIZE: usize = NONCE_SIZE + TAG_SIZE;

const STREAM_AAD_LABEL: &[u8] = b"cipherlinkStreamV1";

fn chunk_aad(
    session_id: SessionId,
    sender: SessionRole,
    stream_id: &[u8; NONCE_SIZE],
    index: u64,
    last: bool,
) -> Vec<u8> {
    let mut aad = Vec::with_capacity(STREAM_AAD_LABEL.len() + 16 + 1 + NONCE_SIZE + 8 + 1);
    aad.extend_from_slice(STREAM_AAD_LABEL);
    aad.extend_from_slice(&session_id.as_u128().to_be_bytes());
    aad.push(match sender {
        SessionRole::Initiator => 0,
        SessionRole::Responder => 1,
    });
    aad.extend_from_slice(stream_id);
    aad.extend_from_slice(&index.to_be_bytes());
    aad.push(u8::from(last));
    aad
}

/// Builds stream adapters over a [`SessionStore`].
pub struct StreamCipher<'a, E: Environment> {
    env: &'a E,
    sessions: &'a SessionStore,
    stats: &'a StatsRecorder,
    reporter: &'a dyn ErrorReporter,
    replay_policy: ReplayPolicy,
}

impl<'a, E: Environment> StreamCipher<'a, E> {
    /// Bind a stream cipher to the engine's components.
    pub fn new(
        env: &'a E,
        sessions: &'a SessionStore,
        stats: &'a StatsRecorder,
        reporter: &'a dyn ErrorReporter,
    ) -> Self {
        Self { env, sessions, stats, reporter, replay_policy: ReplayPolicy::default() }
    }

    /// Policy for streams opened twice. Strict unless set.
    #[must_use]
    pub fn with_replay_policy(mut self, policy: ReplayPolicy) -> Self {
        self.replay_policy = policy;
        self
    }

    /// Seal every chunk of `source` into a frame.
    pub fn encrypt_stream<I>(
        &self,
        session_id: SessionId,
        source: I,
    ) -> EncryptStream<'a, E, I::IntoIter>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        EncryptStream {
            env: self.env,
            sessions: self.sessions,
            stats: self.stats,
            reporter: self.reporter,
            session_id,
            source: source.into_iter().peekable(),
            stream_id: None,
            index: 0,
            done: false,
        }
    }

    /// Open every frame of `frames` back into its chunk.
    pub fn decrypt_stream<I>(
        &self,
        session_id: SessionId,
        frames: I,
    ) -> DecryptStream<'a, E, I::IntoIter>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        DecryptStream {
            env: self.env,
            sessions: self.sessions,
            stats: self.stats,
            reporter: self.reporter,
            replay_policy: self.replay_policy,
            session_id,
            frames: frames.into_iter().peekable(),
            keys: None,
            stream_id: None,
            index: 0,
            done: false,
        }
    }
}

/// Iterator of sealed frames. See [`StreamCipher::encrypt_stream`].
pub struct EncryptStream<'a, E: Environment, I: Iterator> {
    env: &'a E,
    sessions: &'a SessionStore,
    stats: &'a StatsRecorder,
    reporter: &'a dyn ErrorReporter,
    session_id: SessionId,
    source: Peekable<I>,
    stream_id: Option<[u8; NONCE_SIZE]>,
    index: u64,
    done: bool,
}

impl<E: Environment, I: Iterator> EncryptStream<'_, E, I> {
    fn seal_chunk(&mut self, chunk: &[u8], last: bool) -> Result<Vec<u8>, EncryptionError> {
        // Reserving a counter per chunk re-checks the session, so destroying
        // or expiring it stops the stream at the next chunk.
        let keys = self.sessions.next_outbound(self.session_id, self.env.wall_clock_millis())?;
        let nonce: [u8; NONCE_SIZE] = self.env.random_array();
        let stream_id = *self.stream_id.get_or_insert(nonce);
        let aad = chunk_aad(self.session_id, keys.role, &stream_id, self.index, last);

        let sealed = cipherlink_crypto::seal_combined(
            keys.algorithm,
            &keys.session_key,
            &nonce,
            chunk,
            &aad,
        )?;

        let mut frame = Vec::with_capacity(NONCE_SIZE + sealed.len());
        frame.extend_from_slice(&nonce);
        frame.extend_from_slice(&sealed);
        Ok(frame)
    }
}

impl<E, I> Iterator for EncryptStream<'_, E, I>
where
    E: Environment,
    I: Iterator,
    I::Item: AsRef<[u8]>,
{
    type Item = Result<Vec<u8>, EncryptionError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let Some(chunk) = self.source.next() else {
            self.done = true;
            return None;
        };
        let last = self.source.peek().is_none();
        let chunk = chunk.as_ref();

        match self.seal_chunk(chunk, last) {
            Ok(frame) => {
                self.stats.record_stream_chunk_encrypted(chunk.len());
                self.index += 1;
                Some(Ok(frame))
            },
            Err(e) => {
                tracing::debug!(
                    session_id = %self.session_id,
                    chunk = self.index,
                    error = %e,
                    "stream encryption stopped"
                );
                self.reporter.report(&e, Severity::High, "encrypt_stream");
                self.done = true;
                Some(Err(e))
            },
        }
    }
}

/// Iterator of opened chunks. See [`StreamCipher::decrypt_stream`].
pub struct DecryptStream<'a, E: Environment, I: Iterator> {
    env: &'a E,
    sessions: &'a SessionStore,
    stats: &'a StatsRecorder,
    reporter: &'a dyn ErrorReporter,
    replay_policy: ReplayPolicy,
    session_id: SessionId,
    frames: Peekable<I>,
    /// Captured on the first frame; the key is static for the whole stream
    keys: Option<InboundKeys>,
    /// Nonce of the first frame, set once it authenticates
    stream_id: Option<[u8; NONCE_SIZE]>,
    index: u64,
    done: bool,
}

impl<E: Environment, I: Iterator> DecryptStream<'_, E, I> {
    fn open_frame(&mut self, frame: &[u8], last: bool) -> Result<Vec<u8>, EncryptionError> {
        let now_ms = self.env.wall_clock_millis();
        let keys = match self.keys.take() {
            Some(keys) => {
                self.sessions.ensure_live(self.session_id, now_ms)?;
                keys
            },
            None => self.sessions.inbound(self.session_id, now_ms)?,
        };

        if frame.len() < MIN_FRAME_SIZE {
            return Err(EncryptionError::MalformedFrame { len: frame.len(), min: MIN_FRAME_SIZE });
        }
        let (nonce, sealed) = frame.split_at(NONCE_SIZE);
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        nonce_bytes.copy_from_slice(nonce);
        let stream_id = self.stream_id.unwrap_or(nonce_bytes);
        let aad = chunk_aad(self.session_id, keys.role.opposite(), &stream_id, self.index, last);

        let opened = cipherlink_crypto::open_combined(
            keys.algorithm,
            &keys.session_key,
            &nonce_bytes,
            sealed,
            &aad,
        )
        .map_err(|_| EncryptionError::DecryptionFailed)?;

        if self.stream_id.is_none() {
            self.sessions.accept_stream(self.session_id, stream_id, self.replay_policy)?;
            self.stream_id = Some(stream_id);
        }
        self.keys = Some(keys);
        Ok(opened)
    }
}

impl<E, I> Iterator for DecryptStream<'_, E, I>
where
    E: Environment,
    I: Iterator,
    I::Item: AsRef<[u8]>,
{
    type Item = Result<Vec<u8>, EncryptionError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let Some(frame) = self.frames.next() else {
            self.done = true;
            return None;
        };
        let last = self.frames.peek().is_none();

        match self.open_frame(frame.as_ref(), last) {
            Ok(chunk) => {
                self.stats.record_stream_chunk_decrypted(chunk.len());
                self.index += 1;
                Some(Ok(chunk))
            },
            Err(e) => {
                tracing::debug!(
                    session_id = %self.session_id,
                    chunk = self.index,
                    error = %e,
                    "stream decryption stopped"
                );
                self.reporter.report(&e, Severity::High, "decrypt_stream");
                self.done = true;
                self.keys = None;
                Some(Err(e))
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::EncryptionConfig, keys::KeyMaterial, report::RecordingReporter, sim::SimEnv,
    };

    struct Party {
        env: SimEnv,
        material: KeyMaterial,
        sessions: SessionStore,
        stats: StatsRecorder,
        reporter: RecordingReporter,
    }

    impl Party {
        fn new(seed: u64) -> Self {
            let env = SimEnv::with_seed(seed);
            let material = KeyMaterial::new();
            material.rotate(&env);
            Self {
                env,
                material,
                sessions: SessionStore::new(),
                stats: StatsRecorder::new(),
                reporter: RecordingReporter::new(),
            }
        }

        fn cipher(&self) -> StreamCipher<'_, SimEnv> {
            StreamCipher::new(&self.env, &self.sessions, &self.stats, &self.reporter)
        }

        fn seal(&self, id: SessionId, chunks: &[&[u8]]) -> Vec<Vec<u8>> {
            self.cipher().encrypt_stream(id, chunks).collect::<Result<_, _>>().unwrap()
        }

        fn open(&self, id: SessionId, frames: &[Vec<u8>]) -> Result<Vec<Vec<u8>>, EncryptionError> {
            self.cipher().decrypt_stream(id, frames).collect()
        }
    }

    fn connected() -> (Party, Party, SessionId) {
        let alice = Party::new(3);
        let bob = Party::new(4);
        let config = EncryptionConfig::default();
        let (id, offer) = alice
            .sessions
            .create_session(
                &alice.env,
                &alice.material,
                &config,
                "alice",
                &bob.material.public_bundle().unwrap(),
                "bob",
            )
            .unwrap();
        bob.sessions.accept_session(&bob.env, &bob.material, &config, &offer).unwrap();
        (alice, bob, id)
    }

    #[test]
    fn frames_have_nonce_and_tag_overhead() {
        let (alice, _bob, id) = connected();
        let frames = alice.seal(id, &[b"abc", b""]);

        assert_eq!(frames[0].len(), 3 + MIN_FRAME_SIZE);
        assert_eq!(frames[1].len(), MIN_FRAME_SIZE);
    }

    #[test]
    fn roundtrip_preserves_order_both_ways() {
        let (alice, bob, id) = connected();
        let chunks: Vec<Vec<u8>> = (0u8..20).map(|i| vec![i; i as usize]).collect();

        let frames: Vec<Vec<u8>> =
            alice.cipher().encrypt_stream(id, &chunks).collect::<Result<_, _>>().unwrap();
        assert_eq!(bob.open(id, &frames).unwrap(), chunks);

        let frames: Vec<Vec<u8>> =
            bob.cipher().encrypt_stream(id, &chunks).collect::<Result<_, _>>().unwrap();
        assert_eq!(alice.open(id, &frames).unwrap(), chunks);
    }

    #[test]
    fn short_frame_is_malformed_and_fuses() {
        let (_alice, bob, id) = connected();
        let frames = vec![vec![0u8; MIN_FRAME_SIZE - 1], vec![0u8; 64]];

        let mut stream = bob.cipher().decrypt_stream(id, frames);

        assert_eq!(
            stream.next(),
            Some(Err(EncryptionError::MalformedFrame { len: 27, min: 28 }))
        );
        assert_eq!(stream.next(), None);
    }

    #[test]
    fn reordered_frames_fail() {
        let (alice, bob, id) = connected();
        let mut frames = alice.seal(id, &[b"one", b"two"]);
        frames.swap(0, 1);

        let first = bob.cipher().decrypt_stream(id, &frames).next();
        assert_eq!(first, Some(Err(EncryptionError::DecryptionFailed)));
    }

    #[test]
    fn truncated_stream_fails_at_new_last_frame() {
        let (alice, bob, id) = connected();
        let frames = alice.seal(id, &[b"one", b"two", b"three"]);

        let mut stream = bob.cipher().decrypt_stream(id, &frames[..2]);

        assert_eq!(stream.next(), Some(Ok(b"one".to_vec())));
        assert_eq!(stream.next(), Some(Err(EncryptionError::DecryptionFailed)));
        assert_eq!(stream.next(), None);
    }

    #[test]
    fn frames_after_final_fail() {
        let (alice, bob, id) = connected();
        let mut frames = alice.seal(id, &[b"one"]);
        frames.extend(alice.seal(id, &[b"extra"]));

        assert_eq!(bob.open(id, &frames), Err(EncryptionError::DecryptionFailed));
    }

    #[test]
    fn frame_from_another_stream_fails() {
        let (alice, bob, id) = connected();
        let mut frames = alice.seal(id, &[b"one", b"two", b"three"]);
        let other = alice.seal(id, &[b"evil", b"evil", b"evil"]);
        frames[1] = other[1].clone();

        assert_eq!(bob.open(id, &frames), Err(EncryptionError::DecryptionFailed));
    }

    #[test]
    fn reflected_frames_fail() {
        let (alice, _bob, id) = connected();
        let frames = alice.seal(id, &[b"mine"]);

        assert_eq!(alice.open(id, &frames), Err(EncryptionError::DecryptionFailed));
    }

    #[test]
    fn replayed_stream_fails_under_strict_policy() {
        let (alice, bob, id) = connected();
        let frames = alice.seal(id, &[b"once"]);

        assert_eq!(bob.open(id, &frames).unwrap(), vec![b"once".to_vec()]);
        assert_eq!(bob.open(id, &frames), Err(EncryptionError::StreamReplayed { session_id: id }));

        let permissive = bob.cipher().with_replay_policy(ReplayPolicy::Permissive);
        let again: Result<Vec<_>, _> = permissive.decrypt_stream(id, &frames).collect();
        assert_eq!(again.unwrap(), vec![b"once".to_vec()]);
    }

    #[test]
    fn forged_first_frame_does_not_burn_stream_id() {
        let (alice, bob, id) = connected();
        let frames = alice.seal(id, &[b"real"]);
        let mut forged = frames.clone();
        forged[0][NONCE_SIZE] ^= 1;

        assert_eq!(bob.open(id, &forged), Err(EncryptionError::DecryptionFailed));
        assert_eq!(bob.open(id, &frames).unwrap(), vec![b"real".to_vec()]);
    }

    #[test]
    fn destroy_cancels_between_chunks() {
        let (alice, _bob, id) = connected();
        let chunks: [&[u8]; 3] = [b"a", b"b", b"c"];
        let mut stream = alice.cipher().encrypt_stream(id, chunks);

        assert!(matches!(stream.next(), Some(Ok(_))));
        alice.sessions.destroy_session(id).unwrap();

        assert_eq!(stream.next(), Some(Err(EncryptionError::SessionNotFound(id))));
        assert_eq!(stream.next(), None);
    }

    #[test]
    fn first_error_is_reported_once() {
        let (alice, bob, id) = connected();
        let mut frames = alice.seal(id, &[b"a", b"b"]);
        frames[0].truncate(5);

        let results: Vec<_> = bob.cipher().decrypt_stream(id, &frames).collect();

        assert_eq!(results.len(), 1);
        let reports = bob.reporter.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].0, EncryptionError::MalformedFrame { len: 5, min: MIN_FRAME_SIZE });
        assert_eq!(reports[0].1, Severity::High);
        assert_eq!(reports[0].2, "decrypt_stream");
    }

    #[test]
    fn each_chunk_reserves_a_counter() {
        let (alice, _bob, id) = connected();
        let count = alice.cipher().encrypt_stream(id, vec![vec![1u8]; 5]).count();

        assert_eq!(count, 5);
        assert_eq!(alice.sessions.lookup(id).unwrap().message_counter, 5);
        assert_eq!(alice.stats.snapshot().stream_chunks_encrypted, 5);
    }
}
