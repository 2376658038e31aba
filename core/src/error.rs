//! Structured error types for the orchestration core
//!
//! One taxonomy for everything the store, resolver, supervisor and
//! feedback controller can surface, with helpers for the retry policy.

use std::time::Duration;
use thiserror::Error;

use crate::session::id::ParseSessionIdError;
use crate::session::SessionState;

/// Primary error type for orchestration operations
#[derive(Error, Debug)]
pub enum OverseerError {
    // =========================================================================
    // Session Identity / Lookup Errors
    // =========================================================================
    /// Session id or alias does not resolve to a known session
    #[error("session not found: {session_id}")]
    NotFound { session_id: String },

    /// Alias already names a live session
    #[error("alias already in use: {alias}")]
    AliasTaken { alias: String },

    /// Alias that would shadow the id namespace
    #[error("invalid alias {alias:?}: {reason}")]
    InvalidAlias { alias: String, reason: String },

    /// Malformed hierarchical session id
    #[error(transparent)]
    InvalidSessionId(#[from] ParseSessionIdError),

    // =========================================================================
    // Lifecycle Errors
    // =========================================================================
    /// Mutation requested a state change outside the allowed edges
    #[error("invalid transition for {session_id}: {from} -> {to}")]
    InvalidTransition {
        session_id: String,
        from: SessionState,
        to: SessionState,
    },

    /// Result is write-once per session
    #[error("result already recorded for {session_id}")]
    ResultAlreadySet { session_id: String },

    // =========================================================================
    // Dependency / Composition Errors
    // =========================================================================
    /// Contract composition attempted before a referenced predecessor
    /// produced its result
    #[error("missing dependency result for {session_id}: predecessor {predecessor} has no result yet")]
    MissingDependencyResult {
        session_id: String,
        predecessor: String,
    },

    /// Dependency rule that can never be satisfied, detected at creation
    /// (runtime unsatisfiability resolves to `skipped`, it never raises)
    #[error("unsatisfiable dependency for {session_id}: {reason}")]
    UnsatisfiableDependency { session_id: String, reason: String },

    // =========================================================================
    // Worker / Checker Errors
    // =========================================================================
    /// External worker process could not be started
    #[error("worker launch failed for {session_id}: {message}")]
    WorkerLaunchFailure { session_id: String, message: String },

    /// The checker itself could not run; retry-eligible, never an ACCEPT
    #[error("verification failed for {session_id}: {message}")]
    VerificationFailure { session_id: String, message: String },

    /// Pass/fail classification of a predecessor result could not be obtained
    #[error("classification failed for {session_id}: {message}")]
    ClassificationFailure { session_id: String, message: String },

    /// Configuration value that cannot be used as-is
    #[error("configuration error: {message}")]
    Config { message: String },

    // =========================================================================
    // Persistence Errors
    // =========================================================================
    /// Session record on disk could not be decoded
    #[error("corrupt session record at {path}: {message}")]
    CorruptRecord { path: String, message: String },

    // =========================================================================
    // External Error Wrappers
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(String),

    /// Internal system error
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl OverseerError {
    /// Check if the error is transient enough for the supervisor to retry
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::WorkerLaunchFailure { .. } => true,
            Self::VerificationFailure { .. } => true,

            // IO errors - some are retryable
            Self::Io(io_err) => matches!(
                io_err.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::TimedOut
            ),

            // Never retry these
            Self::NotFound { .. }
            | Self::AliasTaken { .. }
            | Self::InvalidAlias { .. }
            | Self::InvalidSessionId(_)
            | Self::InvalidTransition { .. }
            | Self::ResultAlreadySet { .. }
            | Self::MissingDependencyResult { .. }
            | Self::UnsatisfiableDependency { .. }
            | Self::ClassificationFailure { .. }
            | Self::Config { .. }
            | Self::CorruptRecord { .. }
            | Self::Json(_)
            | Self::Internal { .. } => false,
        }
    }

    /// Suggested delay before retrying a retryable error
    pub fn retry_delay(&self) -> Option<Duration> {
        match self {
            Self::WorkerLaunchFailure { .. } => Some(Duration::from_millis(500)),
            Self::Io(_) => Some(Duration::from_millis(200)),
            _ => None,
        }
    }

    /// True when the error describes a condition the caller must fix
    /// (bad reference, bad request) rather than a runtime fault
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::AliasTaken { .. }
                | Self::InvalidAlias { .. }
                | Self::InvalidSessionId(_)
                | Self::UnsatisfiableDependency { .. }
        )
    }
}

/// Convert from anyhow::Error, used at the store's filesystem plumbing edge
impl From<anyhow::Error> for OverseerError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(io_err) = err.downcast_ref::<std::io::Error>() {
            return Self::Io(std::io::Error::new(io_err.kind(), err.to_string()));
        }

        Self::Internal {
            message: format!("{:#}", err),
        }
    }
}

impl From<serde_json::Error> for OverseerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

/// Result type alias using OverseerError
pub type Result<T> = std::result::Result<T, OverseerError>;
