//! Periodic key rotation.
//!
//! [`KeyRotationScheduler`] owns the rotation state machine:
//!
//! ```text
//! Idle --rotate_now--> Rotating --ok/err--> Idle
//! ```
//!
//! A rotation checks the configured asymmetric suite, installs a new key
//! generation, flags every live session as rotation-due and records the
//! rotation in stats. If the check fails nothing changes: the previous
//! generation stays current.
//!
//! Sessions keep the generation they were created with, so messages on
//! pre-rotation sessions still sign and verify. Rotation-due sessions are
//! superseded once the application creates a replacement session for the
//! same peer.
//!
//! The periodic loop ([`run`]) sleeps through the [`Environment`], so under
//! `SimEnv` rotations happen in virtual time.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use tokio::{sync::watch, task::JoinHandle};

use crate::{
    config::EncryptionConfig,
    engine::EncryptionEngine,
    env::Environment,
    error::EncryptionError,
    keys::{KeyGeneration, KeyMaterial},
    session::SessionStore,
    stats::StatsRecorder,
    storage::SecureStorage,
};

/// Where the scheduler is in a rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RotationState {
    /// Waiting for the next rotation
    #[default]
    Idle,
    /// Generating and installing keys
    Rotating,
}

/// Serializes rotations and tracks their state.
#[derive(Debug, Default)]
pub struct KeyRotationScheduler {
    state: Mutex<RotationState>,
    /// Held for the whole rotation so concurrent callers queue up
    gate: Mutex<()>,
}

impl KeyRotationScheduler {
    /// Create an idle scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    pub fn state(&self) -> RotationState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: RotationState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Rotate immediately.
    ///
    /// # Errors
    ///
    /// - `CryptoUnavailable` if the configured suite fails its self-test. The
    ///   previous generation stays current and no session is touched.
    pub fn rotate_now<E: Environment>(
        &self,
        env: &E,
        config: &EncryptionConfig,
        material: &KeyMaterial,
        sessions: &SessionStore,
        stats: &StatsRecorder,
    ) -> Result<Arc<KeyGeneration>, EncryptionError> {
        let _gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        self.set_state(RotationState::Rotating);

        let result = KeyMaterial::self_test_asymmetric(env, config.key_exchange, config.signing)
            .map(|()| {
                let generation = material.rotate(env);
                let flagged = sessions.mark_all_rotation_due();
                stats.record_rotation(env.wall_clock_millis());
                tracing::info!(
                    generation = generation.generation(),
                    sessions_flagged = flagged,
                    "keys rotated"
                );
                generation
            });

        self.set_state(RotationState::Idle);
        result
    }
}

/// Stops a rotation loop started with [`EncryptionEngine::spawn_rotation`].
pub struct RotationHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RotationHandle {
    pub(crate) fn new(shutdown: watch::Sender<bool>, task: JoinHandle<()>) -> Self {
        Self { shutdown, task }
    }

    /// Signal the loop to stop and wait for it to exit.
    pub async fn stop(self) {
        // Err means the loop already exited
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "rotation task ended abnormally");
        }
    }

    /// True once the loop has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Rotate every `key_rotation_interval` until `shutdown` is set.
///
/// The interval is re-read from the engine's config before every sleep, so
/// config updates take effect at the next tick. Failed rotations are
/// reported by the engine and the loop carries on, except after
/// [`EncryptionEngine::cleanup`], which ends it.
pub async fn run<E, S>(engine: Arc<EncryptionEngine<E, S>>, mut shutdown: watch::Receiver<bool>)
where
    E: Environment,
    S: SecureStorage,
{
    tracing::info!("key rotation loop started");

    loop {
        let interval: Duration = engine.config().key_rotation_interval;

        tokio::select! {
            () = engine.env().sleep(interval) => {},
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            },
        }

        if *shutdown.borrow() {
            break;
        }

        // Rotation failures are reported inside rotate_keys
        if let Err(EncryptionError::NotInitialized) = engine.rotate_keys().await {
            tracing::info!("engine cleaned up, leaving rotation loop");
            break;
        }
    }

    tracing::info!("key rotation loop stopped");
}
