//! Cipherlink operator tool.
//!
//! Library half of the `cipherlink` binary: the file-backed
//! [`SecureStorage`](cipherlink_core::SecureStorage) implementation and the
//! subcommands, kept out of `main.rs` so they can be tested directly.

#![forbid(unsafe_code)]

pub mod commands;
mod file_storage;

pub use commands::{CliError, DemoOptions, DemoReport, KeygenReport, demo, keygen, self_test};
pub use file_storage::FileStorage;
