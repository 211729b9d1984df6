//! Fuzz target for stream frame decryption
//!
//! # Strategy
//!
//! - Genuine frames interleaved with arbitrary byte frames
//! - Truncated genuine frames
//!
//! # Invariants
//!
//! - Decryption never panics
//! - Every chunk yielded before the first error matches the sealed chunk
//! - The stream is fused after an error

#![no_main]

use arbitrary::Arbitrary;
use cipherlink_core::{EncryptionEngine, MemoryStorage, SimEnv};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Clone, Arbitrary)]
struct Scenario {
    chunks: Vec<Vec<u8>>,
    injected: Vec<(usize, Vec<u8>)>,
    truncate: Option<(usize, usize)>,
}

fuzz_target!(|scenario: Scenario| {
    let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
    let (alice, bob, session) = runtime.block_on(async {
        let alice = EncryptionEngine::new("alice", SimEnv::with_seed(1), MemoryStorage::new());
        let bob = EncryptionEngine::new("bob", SimEnv::with_seed(2), MemoryStorage::new());
        alice.initialize().await.unwrap();
        bob.initialize().await.unwrap();
        let (session, offer) = alice.create_session(&bob.public_keys().unwrap(), "bob").unwrap();
        bob.accept_session(&offer).unwrap();
        (alice, bob, session)
    });

    let mut frames: Vec<Vec<u8>> = alice
        .encrypt_stream(session, &scenario.chunks)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    let genuine = frames.len();
    for (at, frame) in scenario.injected {
        let at = at % (frames.len() + 1);
        frames.insert(at, frame);
    }
    if let Some((index, keep)) = scenario.truncate {
        if !frames.is_empty() {
            let len = frames.len();
            frames[index % len].truncate(keep);
        }
    }

    let mut stream = bob.decrypt_stream(session, &frames).unwrap();
    let mut opened = Vec::new();
    for item in stream.by_ref() {
        match item {
            Ok(chunk) => opened.push(chunk),
            Err(_) => break,
        }
    }

    assert!(opened.len() <= genuine);
    assert_eq!(opened[..], scenario.chunks[..opened.len()]);
    assert!(stream.next().is_none(), "stream must stay closed after an error");
});
