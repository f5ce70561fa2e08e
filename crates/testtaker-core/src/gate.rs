//! Exactly-once attempt finalization.
//!
//! The gate decides whether a submission needs the student's confirmation
//! and makes sure only one completion call is outstanding at a time: later
//! callers join the call already in progress instead of issuing their own.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};

use crate::error::SubmissionError;
use crate::traits::AttemptResult;

/// How a submission was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitMode {
    /// The student has not yet seen the unanswered list.
    Unconfirmed,
    /// The student confirmed despite unanswered questions.
    Confirmed,
    /// The time limit ran out; confirmation is skipped.
    Forced,
}

impl SubmitMode {
    /// Whether this submission must stop and ask about `unanswered`.
    pub fn needs_confirmation(self, unanswered: &[u32]) -> bool {
        self == SubmitMode::Unconfirmed && !unanswered.is_empty()
    }
}

/// What a submit request led to.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Nothing was sent; these questions are unanswered.
    ConfirmationRequired { unanswered: Vec<u32> },
    Completed(AttemptResult),
}

/// A completion call every submitter can await.
pub type CompletionHandle = Shared<BoxFuture<'static, Result<AttemptResult, SubmissionError>>>;

/// Re-entrancy guard around the backend's completion call.
#[derive(Default)]
pub struct SubmissionGate {
    outstanding: Arc<Mutex<Option<CompletionHandle>>>,
}

impl SubmissionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` while a completion call has not settled.
    pub fn is_outstanding(&self) -> bool {
        lock(&self.outstanding).is_some()
    }

    /// The call currently outstanding, if any.
    pub fn outstanding(&self) -> Option<CompletionHandle> {
        lock(&self.outstanding).clone()
    }

    /// Run `completion` unless a call is already outstanding, in which case
    /// the outstanding call is returned and `completion` is dropped unpolled.
    ///
    /// The call runs on its own task, so it settles even if every caller
    /// stops waiting. `settled` runs on that task once the slot is free
    /// again, so state changes it makes cannot send a new submitter back to
    /// the call that just finished. The second tuple element is `true` for
    /// a new call.
    pub fn enter<F, S>(&self, completion: F, settled: S) -> (CompletionHandle, bool)
    where
        F: Future<Output = Result<AttemptResult, SubmissionError>> + Send + 'static,
        S: FnOnce(&Result<AttemptResult, SubmissionError>) + Send + 'static,
    {
        let mut slot = lock(&self.outstanding);
        if let Some(existing) = slot.as_ref() {
            tracing::debug!("joining outstanding submission");
            return (existing.clone(), false);
        }

        let release = Arc::clone(&self.outstanding);
        let task = tokio::spawn(async move {
            let result = completion.await;
            lock(&release).take();
            settled(&result);
            result
        });
        let handle = async move { task.await.unwrap_or(Err(SubmissionError::Interrupted)) }
            .boxed()
            .shared();
        *slot = Some(handle.clone());
        (handle, true)
    }
}

fn lock(
    slot: &Mutex<Option<CompletionHandle>>,
) -> MutexGuard<'_, Option<CompletionHandle>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}
