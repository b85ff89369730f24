use thiserror::Error;

use crate::models::SafetyCheckResult;

/// Engine-wide error taxonomy (spec error-handling design, §7).
///
/// Each variant maps to exactly one category. Callers match on the
/// discriminant, not the message, to decide whether to retry: only
/// `Unavailable` is meant to be retried, and only with bounded backoff.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed caller input (blank SQL, unknown fix type, ...). Not retried.
    #[error("invalid input: {0}")]
    Input(String),

    /// Entity id unknown.
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    /// Unique-constraint violation or state-machine violation.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Target engine lacks a required view/privilege (e.g. `pg_stat_statements`
    /// disabled). Logged; the caller may continue with a degraded flow.
    #[error("capability unavailable: {0}")]
    Capability(String),

    /// Transient I/O talking to a target DB or the store.
    #[error("temporarily unavailable: {0}")]
    Unavailable(String),

    /// An applicator safety gate rejected the fix.
    #[error("safety check failed: {0:?}")]
    SafetyCheckFailed(SafetyCheckResult),

    /// CompletionService failure. The orchestrator records this on the
    /// Optimization row and never lets it propagate past itself.
    #[error("upstream completion service error: {0}")]
    Upstream(String),

    /// Data corruption or programmer bug. Surfaces, terminates the work unit.
    #[error("fatal: {0}")]
    Fatal(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    pub fn input(message: impl Into<String>) -> Self {
        Self::Input(message.into())
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { kind, id: id.into() }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn capability(message: impl Into<String>) -> Self {
        Self::Capability(message.into())
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream(message.into())
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    /// Only `Unavailable` is retried automatically per the propagation policy.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
