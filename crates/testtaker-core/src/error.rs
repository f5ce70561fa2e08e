//! Error taxonomy for the attempt engine.
//!
//! `BackendError` describes a failed backend call. The remaining types
//! classify failures by the operation that saw them, which decides how
//! they surface: start and submission errors propagate to the caller,
//! save errors are absorbed into a warning, navigation errors leave the
//! current question in place.

use thiserror::Error;

use crate::model::{OptionId, QuestionId, SessionStatus};

/// Errors returned by a test-taking backend.
///
/// Cloneable so a single outstanding completion call can be shared by
/// every caller waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The backend refused the operation (attempt limit reached, test closed, ...).
    #[error("rejected by backend: {0}")]
    Rejected(String),

    /// Credentials were missing or refused.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The attempt or question does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The backend asked us to slow down.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Any other error response.
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// The request timed out.
    #[error("request timed out after {0}s")]
    Timeout(u64),

    /// A transport-level failure.
    #[error("network error: {0}")]
    Network(String),

    /// The response could not be understood.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl BackendError {
    /// Returns `true` if retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::RateLimited { .. }
            | BackendError::Timeout(_)
            | BackendError::Network(_) => true,
            BackendError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Starting or resuming an attempt failed. Never retried automatically.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("attempt already started")]
    AlreadyStarted,

    #[error("attempt could not be started: {0}")]
    Backend(#[from] BackendError),

    #[error("attempt session was disposed")]
    Disposed,
}

/// A single answer could not be persisted. Absorbed by the controller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("answer to question {question_id} not saved: {source}")]
pub struct SaveError {
    pub question_id: QuestionId,
    #[source]
    pub source: BackendError,
}

/// Navigation failed; the current question is unchanged.
#[derive(Debug, Error)]
pub enum NavigationError {
    #[error("cannot navigate while attempt is {0}")]
    NotInProgress(SessionStatus),

    #[error("attempt session was disposed")]
    Disposed,

    #[error("question {requested} is out of range (1..={total})")]
    OutOfRange { requested: u32, total: u32 },

    #[error("question could not be loaded: {0}")]
    Backend(#[from] BackendError),
}

/// An edit was refused. The cache is unchanged.
#[derive(Debug, Error)]
pub enum EditError {
    #[error("cannot edit while attempt is {0}")]
    NotInProgress(SessionStatus),

    #[error("attempt session was disposed")]
    Disposed,

    #[error("option {0} does not belong to the current question")]
    UnknownOption(OptionId),

    #[error("question {0} does not accept {1}")]
    WrongKind(QuestionId, &'static str),
}

/// Finalizing the attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmissionError {
    #[error("cannot submit while attempt is {0}")]
    NotInProgress(SessionStatus),

    #[error("attempt session was disposed")]
    Disposed,

    #[error("submission failed: {0}")]
    Backend(#[from] BackendError),

    #[error("submission interrupted before the backend answered")]
    Interrupted,
}

impl SubmissionError {
    /// A failed completion call leaves the attempt resubmittable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SubmissionError::Backend(_) | SubmissionError::Interrupted
        )
    }
}

/// Umbrella error for controller operations.
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error(transparent)]
    Start(#[from] StartError),

    #[error(transparent)]
    Navigation(#[from] NavigationError),

    #[error(transparent)]
    Edit(#[from] EditError),

    #[error(transparent)]
    Submission(#[from] SubmissionError),
}
