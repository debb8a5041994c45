// src/infra/errors.rs — Error types for ephemera

use thiserror::Error;

use crate::compute::ComputeError;
use crate::parse::ParseError;
use crate::session::SessionId;

#[derive(Error, Debug)]
pub enum SessionError {
    // Lookup errors
    #[error("Session '{0}' not found")]
    NotFound(SessionId),

    #[error("Session '{0}' has expired")]
    Expired(SessionId),

    #[error("Session '{0}' was invalidated; upload the file again")]
    Invalidated(SessionId),

    #[error("Session '{id}' exhausted its retry budget ({budget} failed attempts); upload the file again")]
    TooManyRetries { id: SessionId, budget: u32 },

    // Contention
    #[error("Session '{0}' is busy with another job, retry later")]
    Busy(SessionId),

    // Request errors (never charged to the retry budget)
    #[error("Operation '{operation}' is not valid for a {kind} session")]
    WrongKind {
        operation: &'static str,
        kind: String,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Sweep bound n={n} outside [2, {max}]")]
    InvalidSweep { n: i64, max: usize },

    #[error("Could not parse upload: {0}")]
    Parse(#[from] ParseError),

    // Backend errors (charged to the retry budget)
    #[error("Compute backend failed: {0}")]
    Backend(#[from] ComputeError),

    // Guard discipline was bypassed somewhere
    #[error("Session store invariant violated: {0}")]
    Invariant(String),
}

impl SessionError {
    /// Whether the caller may reasonably retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SessionError::Busy(_) | SessionError::Backend(_))
    }

    /// Whether the error means the session can never be used again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionError::Expired(_)
                | SessionError::Invalidated(_)
                | SessionError::TooManyRetries { .. }
        )
    }
}
