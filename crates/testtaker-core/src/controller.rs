//! Attempt session controller.
//!
//! [`AttemptController`] owns one student's attempt from `start` to
//! `dispose`. It is the only writer of the answer cache and the session
//! status, and it wires the autosave scheduler, countdown timer and
//! submission gate together.
//!
//! All state sits behind a single mutex that is never held across an await.
//! Background work (edit saves, the countdown, the forced submission at
//! expiry) holds only a weak reference, so dropping the last controller
//! handle tears the session down.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::autosave::{AutosaveScheduler, SaveOutcome};
use crate::cache::{AnswerCache, PendingAnswer};
use crate::error::{BackendError, EditError, NavigationError, StartError, SubmissionError};
use crate::gate::{CompletionHandle, SubmissionGate, SubmitMode, SubmitOutcome};
use crate::model::{
    Answer, AttemptSession, NavTarget, NavigationState, OptionId, Question, SessionStatus,
};
use crate::navigation::{NavigationPolicy, DEFAULT_PAGE_SIZE};
use crate::observer::{SessionObserver, SessionWarning};
use crate::timer::CountdownTimer;
use crate::traits::{
    AttemptBackend, AttemptResult, AttemptStatusSnapshot, QuestionView, ResumeStore,
};

/// Tunables for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Questions per page.
    pub page_size: u32,
    /// Length of one countdown unit. One second in production.
    pub tick_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            tick_interval: Duration::from_secs(1),
        }
    }
}

/// What a navigation request did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationOutcome {
    /// Boundary step or jump to the current question; nothing was sent.
    Unchanged,
    Moved { from: u32, to: u32 },
    /// A newer navigation (or a submission) overtook this one and its
    /// response was dropped.
    Discarded,
}

/// Read-only view of the session for rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub test_id: Option<String>,
    pub attempt_id: Option<String>,
    pub status: SessionStatus,
    /// The attempt was picked up from the resume store rather than started.
    pub resumed: bool,
    pub current_question_number: u32,
    pub total_questions: u32,
    pub page: u32,
    pub page_count: u32,
    pub question: Option<Question>,
    pub answer: Option<Answer>,
    pub answered: Vec<u32>,
    pub unanswered: Vec<u32>,
    /// Units left on the countdown; `None` when untimed or finished.
    pub remaining_seconds: Option<u64>,
    pub expires_at: Option<DateTime<Utc>>,
    pub result: Option<AttemptResult>,
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

struct SessionState {
    test_id: Option<String>,
    session: Option<AttemptSession>,
    question: Option<Question>,
    navigation: NavigationState,
    policy: NavigationPolicy,
    cache: AnswerCache,
    /// Answered question numbers reported by the backend on resume. Only
    /// consulted for questions the cache has not seen yet.
    remote_answered: BTreeSet<u32>,
    scheduler: Option<Arc<AutosaveScheduler>>,
    nav_seq: u64,
    result: Option<AttemptResult>,
    resumed: bool,
    starting: bool,
    disposed: bool,
}

impl SessionState {
    fn new(config: &SessionConfig) -> Self {
        Self {
            test_id: None,
            session: None,
            question: None,
            navigation: NavigationState::default(),
            policy: NavigationPolicy::new(0, config.page_size),
            cache: AnswerCache::new(),
            remote_answered: BTreeSet::new(),
            scheduler: None,
            nav_seq: 0,
            result: None,
            resumed: false,
            starting: false,
            disposed: false,
        }
    }

    fn status(&self) -> SessionStatus {
        self.session
            .as_ref()
            .map_or(SessionStatus::NotStarted, |s| s.status)
    }

    fn attempt_id(&self) -> Option<String> {
        self.session.as_ref().map(|s| s.id.clone())
    }

    fn transition(&mut self, next: SessionStatus) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        if !session.status.can_transition_to(next) {
            warn!(from = %session.status, to = %next, "rejected status transition");
            return false;
        }
        debug!(attempt_id = %session.id, from = %session.status, to = %next, "status change");
        session.status = next;
        true
    }

    fn apply_view(&mut self, view: &QuestionView) {
        let question = &view.question;
        let number = view.current_question_number;
        self.cache.ensure(number, question);
        if let Some(answer) = &view.current_answer {
            self.cache.adopt_remote(number, answer);
        }
        self.navigation.current_question_number = view.current_question_number;
        self.question = Some(question.clone());
        self.refresh_answered();
    }

    fn refresh_answered(&mut self) {
        let known = self.cache.known_numbers();
        let mut answered = self.cache.answered_numbers();
        answered.extend(
            self.remote_answered
                .iter()
                .filter(|n| !known.contains(n))
                .copied(),
        );
        self.navigation.answered_set = answered;
    }

    fn close_scheduler(&mut self) {
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.close();
        }
    }
}

struct Inner {
    backend: Arc<dyn AttemptBackend>,
    store: Arc<dyn ResumeStore>,
    observer: Arc<dyn SessionObserver>,
    config: SessionConfig,
    state: Mutex<SessionState>,
    gate: SubmissionGate,
    timer: Mutex<Option<CountdownTimer>>,
    watchers: Mutex<Vec<JoinHandle<()>>>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        lock(&self.state)
    }

    fn snapshot_of(&self, state: &SessionState) -> SessionSnapshot {
        let current = state.navigation.current_question_number;
        let answered = &state.navigation.answered_set;
        SessionSnapshot {
            test_id: state.test_id.clone(),
            attempt_id: state.attempt_id(),
            status: state.status(),
            resumed: state.resumed,
            current_question_number: current,
            total_questions: state.policy.total_questions(),
            page: if current == 0 { 0 } else { state.policy.page_of(current) },
            page_count: state.policy.page_count(),
            answer: state
                .question
                .as_ref()
                .and_then(|q| state.cache.get(q.id).cloned()),
            question: state.question.clone(),
            answered: answered.iter().copied().collect(),
            unanswered: if state.session.is_some() {
                state.policy.unanswered(answered)
            } else {
                Vec::new()
            },
            remaining_seconds: lock(&self.timer).as_ref().map(CountdownTimer::remaining),
            expires_at: state.session.as_ref().and_then(|s| s.expires_at),
            result: state.result.clone(),
        }
    }

    fn apply_save_outcome(&self, outcome: &SaveOutcome) {
        let warnings: Vec<SessionWarning> = {
            let mut state = self.lock();
            for saved in &outcome.saved {
                state
                    .cache
                    .mark_synced(saved.question_id, saved.revision, saved.saved_at);
            }
            let warnings = outcome
                .failed
                .iter()
                .filter(|failed| state.cache.mark_failed(failed.error.question_id))
                .map(|failed| SessionWarning::SaveFailed(failed.error.clone()))
                .collect();
            state.refresh_answered();
            warnings
        };
        for warning in &warnings {
            self.observer.on_warning(warning);
        }
    }

    /// Send every dirty answer and wait for the batch to settle.
    async fn flush(&self) -> Option<SaveOutcome> {
        let (dirty, scheduler) = {
            let state = self.lock();
            (state.cache.dirty(), state.scheduler.clone())
        };
        if dirty.is_empty() {
            return None;
        }
        debug!(answers = dirty.len(), "flushing dirty answers");
        let outcome = scheduler?.save(dirty).await?;
        self.apply_save_outcome(&outcome);
        Some(outcome)
    }

    async fn finish_submission(&self, attempt_id: String) -> Result<AttemptResult, SubmissionError> {
        match self.backend.complete_attempt(&attempt_id).await {
            Ok(result) => {
                let test_id = {
                    let mut state = self.lock();
                    state.transition(SessionStatus::Completed);
                    state.result = Some(result.clone());
                    state.close_scheduler();
                    state.test_id.clone()
                };
                self.clear_pointer(test_id.as_deref());
                self.release_timer();
                info!(
                    %attempt_id,
                    answered = result.answered_questions,
                    total = result.total_questions,
                    "attempt submitted"
                );
                self.observer.on_completed(&result);
                Ok(result)
            }
            Err(err) => {
                warn!(%attempt_id, "submission failed: {err}");
                Err(err.into())
            }
        }
    }

    fn clear_pointer(&self, test_id: Option<&str>) {
        let Some(test_id) = test_id else { return };
        if let Err(e) = self.store.clear(test_id) {
            warn!(test_id, "could not clear resume pointer: {e:#}");
        }
    }

    fn release_timer(&self) {
        let timer = lock(&self.timer).take();
        if let Some(timer) = timer {
            timer.stop();
        }
    }

    fn release(&self) {
        let scheduler = {
            let mut state = self.lock();
            if state.disposed {
                return;
            }
            state.disposed = true;
            state.scheduler.take()
        };
        if let Some(scheduler) = scheduler {
            scheduler.close();
        }
        self.release_timer();
        for handle in lock(&self.watchers).drain(..) {
            handle.abort();
        }
        debug!("session disposed");
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.release();
    }
}

/// Resets the `starting` flag however `start` exits.
struct StartGuard<'a>(&'a Inner);

impl Drop for StartGuard<'_> {
    fn drop(&mut self) {
        self.0.lock().starting = false;
    }
}

/// An attempt obtained from the backend, before it is installed.
struct Opened {
    attempt_id: String,
    view: QuestionView,
    total_questions: u32,
    remaining_seconds: Option<u64>,
    remote_answered: Vec<u32>,
    resumed: bool,
}

enum SubmitStep {
    Flush,
    Join(Option<CompletionHandle>),
    Done(Option<AttemptResult>),
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Handle to one attempt session. Cheap to clone; clones share the session.
///
/// Edits spawn background saves and so must be made from within a tokio
/// runtime.
#[derive(Clone)]
pub struct AttemptController {
    inner: Arc<Inner>,
}

impl AttemptController {
    pub fn new(
        backend: Arc<dyn AttemptBackend>,
        store: Arc<dyn ResumeStore>,
        observer: Arc<dyn SessionObserver>,
        config: SessionConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                store,
                observer,
                state: Mutex::new(SessionState::new(&config)),
                config,
                gate: SubmissionGate::new(),
                timer: Mutex::new(None),
                watchers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Start an attempt at `test_id`, or resume the one recorded in the
    /// resume store if the backend still has it open.
    #[instrument(skip(self))]
    pub async fn start(&self, test_id: &str) -> Result<SessionSnapshot, StartError> {
        {
            let mut state = self.inner.lock();
            if state.disposed {
                return Err(StartError::Disposed);
            }
            if state.starting || state.session.is_some() {
                return Err(StartError::AlreadyStarted);
            }
            state.starting = true;
        }
        let _guard = StartGuard(&self.inner);

        let opened = match self.try_resume(test_id).await {
            Some(opened) => opened,
            None => self.open_new(test_id).await?,
        };

        let attempt_id = opened.attempt_id.clone();
        let scheduler = Arc::new(AutosaveScheduler::new(
            Arc::clone(&self.inner.backend),
            attempt_id.clone(),
        ));
        let snapshot = {
            let mut state = self.inner.lock();
            if state.disposed {
                return Err(StartError::Disposed);
            }
            state.test_id = Some(test_id.to_string());
            state.session = Some(AttemptSession {
                id: attempt_id.clone(),
                test_id: test_id.to_string(),
                status: SessionStatus::NotStarted,
                expires_at: opened
                    .remaining_seconds
                    .and_then(|secs| i64::try_from(secs).ok())
                    .and_then(chrono::TimeDelta::try_seconds)
                    .and_then(|left| Utc::now().checked_add_signed(left)),
                total_questions: opened.total_questions,
            });
            state.policy = NavigationPolicy::new(opened.total_questions, self.inner.config.page_size);
            state.remote_answered = opened.remote_answered.into_iter().collect();
            state.scheduler = Some(scheduler);
            state.resumed = opened.resumed;
            state.transition(SessionStatus::InProgress);
            state.apply_view(&opened.view);
            self.inner.snapshot_of(&state)
        };

        if let Err(e) = self.inner.store.set(test_id, &attempt_id) {
            warn!(test_id, "could not persist resume pointer: {e:#}");
        }
        match opened.remaining_seconds {
            Some(remaining) => self.start_timer(remaining),
            None => debug!("untimed attempt"),
        }
        info!(
            %attempt_id,
            resumed = opened.resumed,
            total = opened.total_questions,
            "attempt in progress"
        );
        self.inner
            .observer
            .on_question(opened.view.current_question_number, &opened.view.question);

        // The timer may already have run out while we were rendering.
        Ok(SessionSnapshot {
            remaining_seconds: lock(&self.inner.timer).as_ref().map(CountdownTimer::remaining),
            ..snapshot
        })
    }

    async fn try_resume(&self, test_id: &str) -> Option<Opened> {
        let attempt_id = match self.inner.store.get(test_id) {
            Ok(Some(id)) => id,
            Ok(None) => return None,
            Err(e) => {
                warn!(test_id, "could not read resume pointer: {e:#}");
                return None;
            }
        };

        let backend = &self.inner.backend;
        let status = match backend.attempt_status(&attempt_id).await {
            Ok(status) if status.status.is_open() => status,
            Ok(status) => {
                info!(%attempt_id, remote = ?status.status, "stored attempt is closed");
                self.inner.clear_pointer(Some(test_id));
                return None;
            }
            Err(BackendError::NotFound(_)) => {
                info!(%attempt_id, "stored attempt no longer exists");
                self.inner.clear_pointer(Some(test_id));
                return None;
            }
            Err(e) => {
                warn!(%attempt_id, "could not check stored attempt: {e}");
                return None;
            }
        };

        let number = status.current_question_number.max(1);
        match backend.get_question(&attempt_id, number).await {
            Ok(view) => Some(Opened {
                attempt_id,
                remaining_seconds: status.time_remaining_seconds.or(view.time_remaining_seconds),
                view,
                total_questions: status.total_questions,
                remote_answered: status.answered_questions,
                resumed: true,
            }),
            Err(e) => {
                warn!(%attempt_id, number, "could not load question to resume: {e}");
                None
            }
        }
    }

    async fn open_new(&self, test_id: &str) -> Result<Opened, StartError> {
        let started = self
            .inner
            .backend
            .start_attempt(test_id)
            .await
            .inspect_err(|e| warn!(test_id, "attempt could not be started: {e}"))?;
        Ok(Opened {
            remaining_seconds: started.initial_remaining_seconds(),
            total_questions: started.total_questions,
            view: QuestionView {
                question: started.question,
                current_question_number: started.current_question_number,
                current_answer: started.current_answer,
                time_remaining_seconds: started.time_remaining_seconds,
            },
            attempt_id: started.attempt_id,
            remote_answered: Vec::new(),
            resumed: false,
        })
    }

    fn start_timer(&self, remaining: u64) {
        let weak = Arc::downgrade(&self.inner);
        let observer = Arc::clone(&self.inner.observer);
        let timer = CountdownTimer::with_tick_hook(
            self.inner.config.tick_interval,
            move || on_time_expired(&weak),
            move |left| observer.on_tick(left),
        );
        timer.seed(remaining);
        *lock(&self.inner.timer) = Some(timer);
    }

    /// Toggle `option_id` on the current question.
    pub fn select_option(&self, option_id: OptionId) -> Result<(), EditError> {
        self.edit(|cache, question| cache.toggle_option(question, option_id))
    }

    /// Replace the free-text answer to the current question.
    pub fn set_text(&self, text: &str) -> Result<(), EditError> {
        self.edit(|cache, question| cache.set_text(question, text))
    }

    fn edit(
        &self,
        apply: impl FnOnce(&mut AnswerCache, &Question) -> Result<Option<PendingAnswer>, EditError>,
    ) -> Result<(), EditError> {
        {
            let mut guard = self.inner.lock();
            let state = &mut *guard;
            if state.disposed {
                return Err(EditError::Disposed);
            }
            let status = state.status();
            if status != SessionStatus::InProgress {
                return Err(EditError::NotInProgress(status));
            }
            let Some(question) = state.question.as_ref() else {
                return Err(EditError::NotInProgress(status));
            };
            if apply(&mut state.cache, question)?.is_none() {
                return Ok(());
            }
            state.refresh_answered();
        }
        self.spawn_flush();
        Ok(())
    }

    /// Save whatever is dirty once the current task yields. Rapid edits
    /// collapse into one request carrying the latest contents.
    fn spawn_flush(&self) {
        let weak = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            if let Some(inner) = weak.upgrade() {
                inner.flush().await;
            }
        });
        let mut watchers = lock(&self.inner.watchers);
        watchers.retain(|h| !h.is_finished());
        watchers.push(handle);
    }

    /// Move to another question.
    ///
    /// Dirty answers are flushed first. A failed flush is reported as a
    /// warning and does not block the move.
    #[instrument(skip(self))]
    pub async fn navigate(&self, target: NavTarget) -> Result<NavigationOutcome, NavigationError> {
        let (from, to, seq) = {
            let mut state = self.inner.lock();
            if state.disposed {
                return Err(NavigationError::Disposed);
            }
            let status = state.status();
            if status != SessionStatus::InProgress {
                return Err(NavigationError::NotInProgress(status));
            }
            let from = state.navigation.current_question_number;
            let Some(to) = state.policy.resolve(from, target)? else {
                debug!(from, "navigation is a no-op");
                return Ok(NavigationOutcome::Unchanged);
            };
            state.nav_seq += 1;
            (from, to, state.nav_seq)
        };

        self.inner.flush().await;

        let (attempt_id, scheduler) = {
            let state = self.inner.lock();
            if state.nav_seq != seq || state.status() != SessionStatus::InProgress {
                return Ok(NavigationOutcome::Discarded);
            }
            let Some(attempt_id) = state.attempt_id() else {
                return Ok(NavigationOutcome::Discarded);
            };
            (attempt_id, state.scheduler.clone())
        };

        let backend = &self.inner.backend;
        let request = async {
            // Taken once no save is in flight, so the step carries the
            // newest contents of the question being left.
            let carried = {
                let state = self.inner.lock();
                state
                    .question
                    .as_ref()
                    .and_then(|q| state.cache.snapshot(q.id))
            };
            match (target, carried) {
                (NavTarget::Next, Some(answer)) => (
                    backend.next_question(&attempt_id, from, &answer.payload).await,
                    Some(answer),
                ),
                (NavTarget::Previous, Some(answer)) => (
                    backend
                        .previous_question(&attempt_id, from, &answer.payload)
                        .await,
                    Some(answer),
                ),
                _ => (backend.get_question(&attempt_id, to).await, None),
            }
        };
        // The step persists an answer, so it counts as the in-flight save.
        let (response, carried) = match scheduler {
            Some(scheduler) => scheduler.exclusive(request).await,
            None => request.await,
        };

        let (outcome, resave) = {
            let mut state = self.inner.lock();
            let view = match response {
                Ok(view) => view,
                Err(err) => {
                    if state.nav_seq != seq {
                        return Ok(NavigationOutcome::Discarded);
                    }
                    warn!(from, "question could not be loaded: {err}");
                    return Err(err.into());
                }
            };
            // An edit made while the step was in flight is newer than what
            // the step carried and still has to be sent.
            let resave = carried.is_some_and(|answer| {
                !state
                    .cache
                    .mark_synced(answer.payload.question_id, answer.revision, Utc::now())
            });
            if state.nav_seq != seq || state.status() != SessionStatus::InProgress {
                debug!(from, "dropping superseded navigation response");
                state.refresh_answered();
                (None, resave)
            } else {
                state.apply_view(&view);
                (Some(view), resave)
            }
        };
        if resave {
            self.spawn_flush();
        }

        let Some(question) = outcome else {
            return Ok(NavigationOutcome::Discarded);
        };
        self.inner
            .observer
            .on_question(question.current_question_number, &question.question);
        Ok(NavigationOutcome::Moved {
            from,
            to: question.current_question_number,
        })
    }

    /// Submit the attempt. Without `confirmed`, unanswered questions stop
    /// the submission and are returned for the student to confirm.
    pub async fn submit(&self, confirmed: bool) -> Result<SubmitOutcome, SubmissionError> {
        let mode = if confirmed {
            SubmitMode::Confirmed
        } else {
            SubmitMode::Unconfirmed
        };
        self.submit_with(mode).await
    }

    /// Submit without asking, as done when time runs out.
    pub async fn force_submit(&self) -> Result<SubmitOutcome, SubmissionError> {
        self.submit_with(SubmitMode::Forced).await
    }

    #[instrument(skip(self))]
    async fn submit_with(&self, mode: SubmitMode) -> Result<SubmitOutcome, SubmissionError> {
        let mut flushed = false;
        loop {
            let step = {
                let mut state = self.inner.lock();
                match state.status() {
                    SessionStatus::Completed => SubmitStep::Done(state.result.clone()),
                    SessionStatus::Submitting => SubmitStep::Join(self.inner.gate.outstanding()),
                    _ if state.disposed => return Err(SubmissionError::Disposed),
                    SessionStatus::InProgress if !flushed => SubmitStep::Flush,
                    SessionStatus::InProgress => {
                        let unanswered = state.policy.unanswered(&state.navigation.answered_set);
                        if mode.needs_confirmation(&unanswered) {
                            debug!(?unanswered, "submission needs confirmation");
                            return Ok(SubmitOutcome::ConfirmationRequired { unanswered });
                        }
                        let Some(attempt_id) = state.attempt_id() else {
                            return Err(SubmissionError::NotInProgress(state.status()));
                        };
                        state.transition(SessionStatus::Submitting);
                        info!(%attempt_id, ?mode, unanswered = unanswered.len(), "submitting attempt");
                        let inner = Arc::clone(&self.inner);
                        let weak = Arc::downgrade(&self.inner);
                        let (handle, _) = self.inner.gate.enter(
                            async move { inner.finish_submission(attempt_id).await },
                            move |result| {
                                // Failed submissions can be retried.
                                if let (Err(_), Some(inner)) = (result, weak.upgrade()) {
                                    inner.lock().transition(SessionStatus::InProgress);
                                }
                            },
                        );
                        SubmitStep::Join(Some(handle))
                    }
                    status => return Err(SubmissionError::NotInProgress(status)),
                }
            };

            match step {
                SubmitStep::Flush => {
                    self.inner.flush().await;
                    flushed = true;
                }
                SubmitStep::Join(Some(handle)) => {
                    return handle.await.map(SubmitOutcome::Completed);
                }
                // The outstanding call is settling; look again.
                SubmitStep::Join(None) => tokio::task::yield_now().await,
                SubmitStep::Done(Some(result)) => return Ok(SubmitOutcome::Completed(result)),
                SubmitStep::Done(None) => {
                    return Err(SubmissionError::NotInProgress(SessionStatus::Completed))
                }
            }
        }
    }

    /// Re-read the attempt from the backend, e.g. after reconnecting.
    ///
    /// An attempt the backend has closed is marked completed locally. An
    /// open one re-seeds the countdown from the server's remaining time.
    /// Returns `None` if there is no live attempt to check.
    #[instrument(skip(self))]
    pub async fn refresh_status(&self) -> Result<Option<AttemptStatusSnapshot>, BackendError> {
        let attempt_id = {
            let state = self.inner.lock();
            if state.disposed || state.status() != SessionStatus::InProgress {
                return Ok(None);
            }
            match state.attempt_id() {
                Some(id) => id,
                None => return Ok(None),
            }
        };

        let status = self.inner.backend.attempt_status(&attempt_id).await?;
        let closed_test = {
            let mut state = self.inner.lock();
            state.remote_answered = status.answered_questions.iter().copied().collect();
            state.refresh_answered();
            if !status.status.is_open() && state.status() == SessionStatus::InProgress {
                state.transition(SessionStatus::Submitting);
                state.transition(SessionStatus::Completed);
                state.close_scheduler();
                Some(state.test_id.clone())
            } else {
                None
            }
        };

        match closed_test {
            Some(test_id) => {
                info!(%attempt_id, remote = ?status.status, "attempt closed by backend");
                self.inner.clear_pointer(test_id.as_deref());
                self.inner.release_timer();
            }
            None => {
                if let Some(remaining) = status.time_remaining_seconds {
                    let reseeded = lock(&self.inner.timer)
                        .as_ref()
                        .map(|timer| timer.seed(remaining));
                    if reseeded.is_none() {
                        self.start_timer(remaining);
                    }
                }
            }
        }
        Ok(Some(status))
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.inner.lock();
        self.inner.snapshot_of(&state)
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.lock().status()
    }

    /// `true` while a completion call is outstanding.
    pub fn is_submitting(&self) -> bool {
        self.inner.gate.is_outstanding()
    }

    /// Give up on the attempt: forget the resume pointer and dispose.
    pub fn abandon(&self) {
        let test_id = self.inner.lock().test_id.clone();
        info!(test_id = test_id.as_deref().unwrap_or("-"), "attempt abandoned");
        self.inner.clear_pointer(test_id.as_deref());
        self.dispose();
    }

    /// Stop the countdown, drop queued saves and cancel background tasks.
    ///
    /// Unsaved edits are not flushed. Idempotent; also runs when the last
    /// handle is dropped.
    pub fn dispose(&self) {
        self.inner.release();
    }
}

fn on_time_expired(weak: &Weak<Inner>) {
    let Some(inner) = weak.upgrade() else {
        return;
    };
    inner.observer.on_expired();
    tokio::spawn(async move {
        let controller = AttemptController { inner };
        if let Err(err) = controller.force_submit().await {
            warn!("automatic submission failed: {err}");
            controller
                .inner
                .observer
                .on_warning(&SessionWarning::SubmissionFailed(err));
        }
    });
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
