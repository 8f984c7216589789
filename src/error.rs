//! # Errors raised by the supervisor runtime.
//!
//! Everything that can go wrong inside the event loop is recorded in the
//! event journal and absorbed by restart policy; [`RuntimeError`] covers the
//! few failures that must surface to the caller instead: a configuration the
//! loop cannot start from, and commands sent to a loop that already
//! finished.
//!
//! Invariant violations (a close or error event with no listen outstanding)
//! are not errors. They indicate a defect in the socket layer and abort.

use thiserror::Error;

/// Errors surfaced to the embedder of the supervisor.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The supervisor loop already finished; the command was not delivered.
    #[error("supervisor is gone; command channel closed")]
    Closed,

    /// The configuration cannot describe a runnable fleet.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// What was rejected.
        reason: String,
    },
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::Closed => "runtime_closed",
            RuntimeError::InvalidConfig { .. } => "runtime_invalid_config",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_stable() {
        assert_eq!(RuntimeError::Closed.as_label(), "runtime_closed");
        let err = RuntimeError::InvalidConfig {
            reason: "worker_count is 0".into(),
        };
        assert_eq!(err.as_label(), "runtime_invalid_config");
        assert!(err.to_string().contains("worker_count"));
    }
}
