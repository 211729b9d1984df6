//! Error reporting hook.
//!
//! The engine returns every error to its caller, and also hands failures to
//! an [`ErrorReporter`] so the surrounding application can feed them into
//! crash reporting or alerting. Reports never contain key material or
//! plaintext.

use std::{
    fmt,
    sync::{Mutex, PoisonError},
};

use crate::error::EncryptionError;

/// How bad a reported failure is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// Degraded but working (e.g. storage unavailable)
    Low,
    /// A single operation failed
    High,
    /// The encryption subsystem could not start
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Low => "low",
            Self::High => "high",
            Self::Critical => "critical",
        })
    }
}

/// Receives failures from the engine.
pub trait ErrorReporter: Send + Sync + 'static {
    /// Report `error`. `context` names the failing operation.
    fn report(&self, error: &EncryptionError, severity: Severity, context: &str);
}

/// Default reporter: logs through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, error: &EncryptionError, severity: Severity, context: &str) {
        match severity {
            Severity::Critical | Severity::High => {
                tracing::error!(%severity, context, error = %error, "encryption failure");
            },
            Severity::Low => tracing::warn!(%severity, context, error = %error, "encryption degraded"),
        }
    }
}

/// Reporter that keeps every report in memory. For tests and diagnostics.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    reports: Mutex<Vec<(EncryptionError, Severity, String)>>,
}

impl RecordingReporter {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every report received so far, oldest first.
    pub fn reports(&self) -> Vec<(EncryptionError, Severity, String)> {
        self.reports.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl ErrorReporter for RecordingReporter {
    fn report(&self, error: &EncryptionError, severity: Severity, context: &str) {
        self.reports.lock().unwrap_or_else(PoisonError::into_inner).push((
            error.clone(),
            severity,
            context.to_string(),
        ));
    }
}
