//! Cipherlink operator binary.
//!
//! # Usage
//!
//! ```bash
//! # Check the platform primitives
//! cipherlink self-test --algorithm chacha20-poly1305
//!
//! # Generate keys and write the public bundle to ./keys/bundle.cbor
//! cipherlink keygen --dir ./keys
//!
//! # Run an in-process two-party exchange with rotation
//! cipherlink demo --messages 16 --chunks 256
//! ```

use std::path::PathBuf;

use cipherlink_cli::{DemoOptions, demo, keygen, self_test};
use cipherlink_crypto::AeadAlgorithm;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Cipherlink end-to-end encryption tool
#[derive(Parser, Debug)]
#[command(name = "cipherlink")]
#[command(about = "End-to-end encryption session layer tool")]
#[command(version)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the primitive self-tests and a loopback message
    SelfTest {
        /// AEAD to test
        #[arg(long, value_enum, default_value_t = Algorithm::Aes256Gcm)]
        algorithm: Algorithm,
    },

    /// Generate a key generation and write its public bundle
    Keygen {
        /// Directory for keys, config and the bundle
        #[arg(short, long)]
        dir: PathBuf,

        /// AEAD recorded in the stored config
        #[arg(long, value_enum, default_value_t = Algorithm::Aes256Gcm)]
        algorithm: Algorithm,
    },

    /// Exchange messages and a stream between two in-process parties
    Demo {
        /// Messages sent by the initiator
        #[arg(long, default_value = "8")]
        messages: usize,

        /// Stream chunks sent by the initiator
        #[arg(long, default_value = "64")]
        chunks: usize,

        /// Bytes per stream chunk
        #[arg(long, default_value = "1024")]
        chunk_size: usize,

        /// Skip the mid-run key rotation
        #[arg(long)]
        no_rotate: bool,

        /// AEAD for both parties
        #[arg(long, value_enum, default_value_t = Algorithm::Aes256Gcm)]
        algorithm: Algorithm,

        /// Persist the initiator's config and diagnostics here
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Algorithm {
    Aes256Gcm,
    Chacha20Poly1305,
}

impl From<Algorithm> for AeadAlgorithm {
    fn from(algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::Aes256Gcm => Self::Aes256Gcm,
            Algorithm::Chacha20Poly1305 => Self::ChaCha20Poly1305,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    match args.command {
        Command::SelfTest { algorithm } => self_test(algorithm.into()).await?,
        Command::Keygen { dir, algorithm } => {
            let report = keygen(&dir, algorithm.into()).await?;
            tracing::info!(bundle = %report.bundle_path.display(), "keygen complete");
        },
        Command::Demo { messages, chunks, chunk_size, no_rotate, algorithm, dir } => {
            let options = DemoOptions {
                messages,
                chunks,
                chunk_size,
                rotate: !no_rotate,
                algorithm: algorithm.into(),
            };
            let report = demo(&options, dir.as_deref()).await?;
            tracing::info!(
                messages = report.messages_delivered,
                chunks = report.chunks_delivered,
                "demo finished"
            );
        },
    }

    Ok(())
}
