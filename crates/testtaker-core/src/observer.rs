//! Session event reporting.
//!
//! The controller reports things the student should see but that do not
//! interrupt them: question changes, clock ticks, absorbed failures.

use crate::error::{SaveError, SubmissionError};
use crate::model::Question;
use crate::traits::AttemptResult;

/// A non-blocking problem surfaced to the student.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionWarning {
    /// An answer could not be saved; it will be retried at the next flush.
    SaveFailed(SaveError),
    /// A submission nobody was waiting on (the forced one at expiry) failed.
    SubmissionFailed(SubmissionError),
}

impl std::fmt::Display for SessionWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionWarning::SaveFailed(e) => write!(f, "{e}"),
            SessionWarning::SubmissionFailed(e) => write!(f, "automatic submission failed: {e}"),
        }
    }
}

/// Receives session events. Called outside of any controller lock.
pub trait SessionObserver: Send + Sync {
    fn on_question(&self, question_number: u32, question: &Question);
    fn on_warning(&self, warning: &SessionWarning);
    fn on_tick(&self, remaining_secs: u64);
    fn on_expired(&self);
    fn on_completed(&self, result: &AttemptResult);
}

/// Observer that ignores everything.
pub struct NoopObserver;

impl SessionObserver for NoopObserver {
    fn on_question(&self, _: u32, _: &Question) {}
    fn on_warning(&self, _: &SessionWarning) {}
    fn on_tick(&self, _: u64) {}
    fn on_expired(&self) {}
    fn on_completed(&self, _: &AttemptResult) {}
}
