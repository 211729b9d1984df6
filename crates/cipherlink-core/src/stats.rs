//! Encryption statistics.

use std::{
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use serde::{Deserialize, Serialize};

/// Accumulated counters. Exposed as a snapshot copy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EncryptionStats {
    /// Messages sealed
    pub messages_encrypted: u64,
    /// Messages opened
    pub messages_decrypted: u64,
    /// Plaintext bytes sealed (messages and stream chunks)
    pub bytes_encrypted: u64,
    /// Plaintext bytes recovered (messages and stream chunks)
    pub bytes_decrypted: u64,
    /// Stream chunks sealed
    pub stream_chunks_encrypted: u64,
    /// Stream chunks opened
    pub stream_chunks_decrypted: u64,
    /// Completed key rotations
    pub key_rotations: u64,
    /// Sessions created or accepted
    pub sessions_created: u64,
    /// Live sessions at the last update
    pub active_sessions: u64,
    /// Wall-clock time of the last rotation, ms since the Unix epoch
    pub last_rotation_ms: Option<u64>,
    /// Running mean of message encryption time, microseconds
    pub avg_encryption_micros: f64,
    /// Running mean of message decryption time, microseconds
    pub avg_decryption_micros: f64,
}

/// Thread-safe owner of [`EncryptionStats`].
#[derive(Debug, Default)]
pub struct StatsRecorder {
    stats: Mutex<EncryptionStats>,
}

fn running_mean(mean: f64, count: u64, sample: Duration) -> f64 {
    // count already includes the new sample
    mean + (sample.as_secs_f64() * 1e6 - mean) / count as f64
}

impl StatsRecorder {
    /// Start from zero.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, EncryptionStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count one sealed message of `bytes` plaintext bytes.
    pub fn record_encryption(&self, bytes: usize, elapsed: Duration) {
        let mut stats = self.lock();
        stats.messages_encrypted += 1;
        stats.bytes_encrypted += bytes as u64;
        stats.avg_encryption_micros =
            running_mean(stats.avg_encryption_micros, stats.messages_encrypted, elapsed);
    }

    /// Count one opened message of `bytes` plaintext bytes.
    pub fn record_decryption(&self, bytes: usize, elapsed: Duration) {
        let mut stats = self.lock();
        stats.messages_decrypted += 1;
        stats.bytes_decrypted += bytes as u64;
        stats.avg_decryption_micros =
            running_mean(stats.avg_decryption_micros, stats.messages_decrypted, elapsed);
    }

    /// Count one sealed stream chunk.
    pub fn record_stream_chunk_encrypted(&self, bytes: usize) {
        let mut stats = self.lock();
        stats.stream_chunks_encrypted += 1;
        stats.bytes_encrypted += bytes as u64;
    }

    /// Count one opened stream chunk.
    pub fn record_stream_chunk_decrypted(&self, bytes: usize) {
        let mut stats = self.lock();
        stats.stream_chunks_decrypted += 1;
        stats.bytes_decrypted += bytes as u64;
    }

    /// Count a completed rotation.
    pub fn record_rotation(&self, at_ms: u64) {
        let mut stats = self.lock();
        stats.key_rotations += 1;
        stats.last_rotation_ms = Some(at_ms);
    }

    /// Count a new session and update the live count.
    pub fn record_session_created(&self, active: usize) {
        let mut stats = self.lock();
        stats.sessions_created += 1;
        stats.active_sessions = active as u64;
    }

    /// Update the live session count.
    pub fn set_active_sessions(&self, active: usize) {
        self.lock().active_sessions = active as u64;
    }

    /// Copy of the current counters.
    pub fn snapshot(&self) -> EncryptionStats {
        self.lock().clone()
    }

    /// Replace the counters, e.g. from a persisted diagnostics snapshot.
    ///
    /// The live session count is kept: restored sessions never survive a
    /// restart.
    pub fn restore(&self, restored: EncryptionStats) {
        let mut stats = self.lock();
        let active_sessions = stats.active_sessions;
        *stats = EncryptionStats { active_sessions, ..restored };
    }
}
