//! Coalescing answer persistence.
//!
//! At most one save batch is in flight per attempt. Requests that arrive
//! while a batch is in flight are merged into a single pending slot, keeping
//! only the newest revision of each answer, and that slot is sent as soon as
//! the in-flight batch settles. Whichever caller finds the scheduler idle
//! drives the queue until it drains; everyone else just waits for the batch
//! that carries their answers.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::{oneshot, Notify};

use crate::cache::PendingAnswer;
use crate::error::SaveError;
use crate::model::QuestionId;
use crate::traits::AttemptBackend;

/// An answer the backend acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedAnswer {
    pub question_id: QuestionId,
    pub revision: u64,
    pub saved_at: DateTime<Utc>,
}

/// An answer the backend did not accept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedSave {
    pub revision: u64,
    pub error: SaveError,
}

/// Result of one settled batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveOutcome {
    /// Sequence number of the newest request merged into the batch.
    pub seq: u64,
    pub saved: Vec<SavedAnswer>,
    pub failed: Vec<FailedSave>,
}

impl SaveOutcome {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Default)]
struct PendingBatch {
    seq: u64,
    answers: BTreeMap<QuestionId, PendingAnswer>,
    waiters: Vec<oneshot::Sender<SaveOutcome>>,
}

impl PendingBatch {
    fn merge(&mut self, seq: u64, answers: Vec<PendingAnswer>) {
        self.seq = seq;
        for answer in answers {
            let question_id = answer.payload.question_id;
            match self.answers.get(&question_id) {
                Some(existing) if existing.revision > answer.revision => {}
                Some(existing) => {
                    tracing::debug!(
                        question_id,
                        replaced = existing.revision,
                        revision = answer.revision,
                        "coalescing pending save"
                    );
                    self.answers.insert(question_id, answer);
                }
                None => {
                    self.answers.insert(question_id, answer);
                }
            }
        }
    }
}

#[derive(Default)]
struct Slot {
    pending: Option<PendingBatch>,
    closed: bool,
}

/// Single-slot save queue for one attempt.
pub struct AutosaveScheduler {
    backend: Arc<dyn AttemptBackend>,
    attempt_id: String,
    in_flight: AtomicBool,
    next_seq: AtomicU64,
    slot: Mutex<Slot>,
    /// Woken whenever the in-flight flag is released.
    idle: Notify,
}

impl AutosaveScheduler {
    pub fn new(backend: Arc<dyn AttemptBackend>, attempt_id: impl Into<String>) -> Self {
        Self {
            backend,
            attempt_id: attempt_id.into(),
            in_flight: AtomicBool::new(false),
            next_seq: AtomicU64::new(1),
            slot: Mutex::new(Slot::default()),
            idle: Notify::new(),
        }
    }

    /// `true` while a batch is being sent.
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// `true` if requests are waiting behind the in-flight batch.
    pub fn has_pending(&self) -> bool {
        self.lock().pending.is_some()
    }

    /// Persist `answers` and wait for the batch carrying them to settle.
    ///
    /// Returns `None` if the scheduler was closed before the batch was sent.
    pub async fn save(&self, answers: Vec<PendingAnswer>) -> Option<SaveOutcome> {
        if answers.is_empty() {
            return Some(SaveOutcome::default());
        }

        let (tx, rx) = oneshot::channel();
        let queued = {
            let mut slot = self.lock();
            if slot.closed {
                return None;
            }
            let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
            let batch = slot.pending.get_or_insert_with(PendingBatch::default);
            batch.merge(seq, answers);
            batch.waiters.push(tx);
            self.in_flight.swap(true, Ordering::AcqRel)
        };

        if queued {
            tracing::debug!("save queued behind in-flight batch");
            return rx.await.ok();
        }

        self.drive().await;
        rx.await.ok()
    }

    /// Run `op` while holding the in-flight flag, once any batch already
    /// being sent has settled.
    ///
    /// For backend calls that persist an answer outside of `save`. Saves
    /// requested while `op` runs are queued and sent after it returns, so
    /// they reach the backend after the answer `op` carried.
    pub async fn exclusive<F: Future>(&self, op: F) -> F::Output {
        self.acquire().await;
        let mut guard = DriveGuard {
            scheduler: self,
            finished: false,
        };
        let output = op.await;
        guard.finished = true;
        drop(guard);
        self.drive().await;
        output
    }

    async fn acquire(&self) {
        loop {
            let idle = self.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();
            {
                let _slot = self.lock();
                if !self.in_flight.swap(true, Ordering::AcqRel) {
                    return;
                }
            }
            tracing::debug!("waiting for in-flight save to settle");
            idle.await;
        }
    }

    /// Drop any queued batch and refuse further requests. A batch already in
    /// flight is left to finish.
    pub fn close(&self) {
        let mut slot = self.lock();
        slot.closed = true;
        if let Some(batch) = slot.pending.take() {
            tracing::debug!(
                answers = batch.answers.len(),
                "discarding queued saves on close"
            );
        }
    }

    async fn drive(&self) {
        let mut guard = DriveGuard {
            scheduler: self,
            finished: false,
        };
        loop {
            let batch = {
                let mut slot = self.lock();
                match slot.pending.take() {
                    Some(batch) => batch,
                    None => {
                        self.in_flight.store(false, Ordering::Release);
                        self.idle.notify_waiters();
                        break;
                    }
                }
            };

            let outcome = self.send(batch.seq, batch.answers).await;
            for waiter in batch.waiters {
                let _ = waiter.send(outcome.clone());
            }
        }
        guard.finished = true;
    }

    async fn send(&self, seq: u64, answers: BTreeMap<QuestionId, PendingAnswer>) -> SaveOutcome {
        let mut outcome = SaveOutcome {
            seq,
            ..Default::default()
        };
        for (question_id, answer) in answers {
            match self
                .backend
                .save_answer(&self.attempt_id, &answer.payload)
                .await
            {
                Ok(ack) => outcome.saved.push(SavedAnswer {
                    question_id,
                    revision: answer.revision,
                    saved_at: ack.saved_at.unwrap_or_else(Utc::now),
                }),
                Err(source) => {
                    tracing::warn!(
                        attempt_id = %self.attempt_id,
                        question_id,
                        "answer save failed: {source}"
                    );
                    outcome.failed.push(FailedSave {
                        revision: answer.revision,
                        error: SaveError {
                            question_id,
                            source,
                        },
                    });
                }
            }
        }
        outcome
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Releases the in-flight flag if the driving future is dropped mid-send.
/// Queued waiters are dropped with it and see the batch as cancelled.
struct DriveGuard<'a> {
    scheduler: &'a AutosaveScheduler,
    finished: bool,
}

impl Drop for DriveGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut slot = self.scheduler.lock();
        slot.pending = None;
        self.scheduler.in_flight.store(false, Ordering::Release);
        self.scheduler.idle.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::error::BackendError;
    use crate::mock::MockBackend;
    use crate::model::AnswerPayload;

    fn pending(question_id: QuestionId, text: &str, revision: u64) -> PendingAnswer {
        PendingAnswer {
            payload: AnswerPayload {
                question_id,
                selected_option_ids: vec![],
                answer_text: text.into(),
            },
            revision,
        }
    }

    async fn scheduler(backend: &Arc<MockBackend>) -> Arc<AutosaveScheduler> {
        let started = backend.start_attempt("t").await.unwrap();
        let backend: Arc<dyn AttemptBackend> = backend.clone();
        Arc::new(AutosaveScheduler::new(backend, started.attempt_id))
    }

    #[tokio::test]
    async fn saves_single_answer() {
        let backend = Arc::new(MockBackend::sample(3));
        let scheduler = scheduler(&backend).await;

        let outcome = scheduler.save(vec![pending(1, "a", 1)]).await.unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.saved[0].revision, 1);
        assert_eq!(backend.save_calls(), 1);
        assert!(!scheduler.is_in_flight());
    }

    #[tokio::test(start_paused = true)]
    async fn coalesces_while_in_flight() {
        let backend = Arc::new(MockBackend::sample(3));
        backend.set_save_latency(Duration::from_millis(100));
        let scheduler = scheduler(&backend).await;

        let first = tokio::spawn({
            let scheduler = Arc::clone(&scheduler);
            async move { scheduler.save(vec![pending(1, "one", 1)]).await }
        });
        tokio::task::yield_now().await;
        assert!(scheduler.is_in_flight());

        let second = tokio::spawn({
            let scheduler = Arc::clone(&scheduler);
            async move { scheduler.save(vec![pending(1, "two", 2)]).await }
        });
        let third = tokio::spawn({
            let scheduler = Arc::clone(&scheduler);
            async move { scheduler.save(vec![pending(1, "three", 3)]).await }
        });
        tokio::task::yield_now().await;
        assert!(scheduler.has_pending());

        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();
        let third = third.await.unwrap().unwrap();

        assert_eq!(first.saved[0].revision, 1);
        // Both queued callers share the merged batch.
        assert_eq!(second, third);
        assert_eq!(second.saved[0].revision, 3);
        assert_eq!(backend.save_calls(), 2);
        assert_eq!(backend.saved_answer(1).unwrap().answer_text, "three");
    }

    #[test]
    fn older_revision_does_not_replace_newer_pending() {
        let mut batch = PendingBatch::default();
        batch.merge(1, vec![pending(1, "new", 5)]);
        batch.merge(2, vec![pending(1, "old", 4)]);
        assert_eq!(batch.answers[&1].payload.answer_text, "new");
        assert_eq!(batch.seq, 2);
    }

    #[tokio::test]
    async fn failures_are_reported_not_raised() {
        let backend = Arc::new(MockBackend::sample(3));
        backend.fail_saves(1, BackendError::Network("offline".into()));
        let scheduler = scheduler(&backend).await;

        let outcome = scheduler
            .save(vec![pending(1, "a", 1), pending(2, "b", 1)])
            .await
            .unwrap();
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].error.question_id, 1);
        assert_eq!(outcome.saved.len(), 1);
        assert_eq!(outcome.saved[0].question_id, 2);
    }

    #[tokio::test]
    async fn closed_scheduler_refuses_work() {
        let backend = Arc::new(MockBackend::sample(3));
        let scheduler = scheduler(&backend).await;
        scheduler.close();
        assert!(scheduler.save(vec![pending(1, "a", 1)]).await.is_none());
        assert_eq!(backend.save_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn saves_queue_behind_exclusive_call() {
        let backend = Arc::new(MockBackend::sample(3));
        let scheduler = scheduler(&backend).await;
        let order = Arc::new(Mutex::new(Vec::new()));

        let step = tokio::spawn({
            let scheduler = Arc::clone(&scheduler);
            let order = Arc::clone(&order);
            async move {
                scheduler
                    .exclusive(async {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        order.lock().unwrap().push("step");
                    })
                    .await
            }
        });
        tokio::task::yield_now().await;
        assert!(scheduler.is_in_flight());

        let outcome = scheduler.save(vec![pending(1, "later", 2)]).await.unwrap();
        order.lock().unwrap().push("save");
        assert!(outcome.is_success());
        step.await.unwrap();

        assert_eq!(*order.lock().unwrap(), vec!["step", "save"]);
        assert!(!scheduler.is_in_flight());
    }

    #[tokio::test(start_paused = true)]
    async fn exclusive_call_waits_for_in_flight_save() {
        let backend = Arc::new(MockBackend::sample(3));
        backend.set_save_latency(Duration::from_millis(100));
        let scheduler = scheduler(&backend).await;

        let save = tokio::spawn({
            let scheduler = Arc::clone(&scheduler);
            async move { scheduler.save(vec![pending(1, "first", 1)]).await }
        });
        tokio::task::yield_now().await;
        assert!(scheduler.is_in_flight());

        let seen = scheduler.exclusive(async { backend.saved_answer(1) }).await;
        assert_eq!(seen.unwrap().answer_text, "first");
        assert!(save.await.unwrap().unwrap().is_success());
        assert!(!scheduler.is_in_flight());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_driver_releases_flag() {
        let backend = Arc::new(MockBackend::sample(3));
        backend.set_save_latency(Duration::from_secs(10));
        let scheduler = scheduler(&backend).await;

        let driver = tokio::spawn({
            let scheduler = Arc::clone(&scheduler);
            async move { scheduler.save(vec![pending(1, "a", 1)]).await }
        });
        tokio::task::yield_now().await;
        assert!(scheduler.is_in_flight());

        driver.abort();
        let _ = driver.await;
        assert!(!scheduler.is_in_flight());
    }
}
