//! Fuzz target for inbound message decoding and decryption
//!
//! # Strategy
//!
//! - Raw bytes: arbitrary CBOR through `EncryptedMessage::from_cbor`
//! - Mutations: a genuine message with one field corrupted
//!
//! # Invariants
//!
//! - Decoding and decryption never panic
//! - A mutated message never decrypts to anything but the original plaintext
//! - Rejections are integrity failures or session lookups, never internal errors

#![no_main]

use arbitrary::Arbitrary;
use cipherlink_core::{
    EncryptedMessage, EncryptionEngine, EncryptionError, MemoryStorage, MessageType, SessionId,
    SimEnv,
};
use libfuzzer_sys::fuzz_target;

type Engine = EncryptionEngine<SimEnv, MemoryStorage>;

#[derive(Debug, Clone, Arbitrary)]
enum Input {
    Raw(Vec<u8>),
    Mutated { plaintext: Vec<u8>, mutation: Mutation },
}

#[derive(Debug, Clone, Arbitrary)]
enum Mutation {
    FlipCiphertext { index: usize, mask: u8 },
    FlipNonce { index: usize, mask: u8 },
    ReplaceTag(Vec<u8>),
    DropSignature,
    Counter(u64),
    KeyId(u128),
}

fn connected() -> (Engine, Engine, SessionId) {
    let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
    runtime.block_on(async {
        let alice = EncryptionEngine::new("alice", SimEnv::with_seed(1), MemoryStorage::new());
        let bob = EncryptionEngine::new("bob", SimEnv::with_seed(2), MemoryStorage::new());
        alice.initialize().await.unwrap();
        bob.initialize().await.unwrap();
        let (session, offer) = alice.create_session(&bob.public_keys().unwrap(), "bob").unwrap();
        bob.accept_session(&offer).unwrap();
        (alice, bob, session)
    })
}

fn mutate(message: &mut EncryptedMessage, mutation: Mutation) {
    match mutation {
        Mutation::FlipCiphertext { index, mask } => {
            if let Some(byte) = message.ciphertext.get_mut(index) {
                *byte ^= mask;
            }
        },
        Mutation::FlipNonce { index, mask } => {
            if !message.nonce.is_empty() {
                let len = message.nonce.len();
                message.nonce[index % len] ^= mask;
            }
        },
        Mutation::ReplaceTag(tag) => message.tag = tag,
        Mutation::DropSignature => message.signature = None,
        Mutation::Counter(counter) => message.metadata.counter = counter,
        Mutation::KeyId(id) => message.metadata.key_id = SessionId::from_u128(id),
    }
}

fuzz_target!(|input: Input| {
    let (alice, bob, session) = connected();

    match input {
        Input::Raw(bytes) => {
            if let Ok(message) = EncryptedMessage::from_cbor(&bytes) {
                let _ = bob.decrypt_message(&message);
            }
        },
        Input::Mutated { plaintext, mutation } => {
            let mut message =
                alice.encrypt_message(session, &plaintext, MessageType::Text, "bob").unwrap();
            mutate(&mut message, mutation);

            match bob.decrypt_message(&message) {
                // Identity mutations (zero mask, same counter) still decrypt
                Ok(opened) => assert_eq!(opened, plaintext),
                Err(e) => assert!(
                    e.is_integrity_failure() || matches!(e, EncryptionError::SessionNotFound(_)),
                    "unexpected rejection: {e:?}"
                ),
            }
        },
    }
});
