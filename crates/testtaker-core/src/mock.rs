//! In-memory collaborators for tests and offline demos.
//!
//! [`MockBackend`] simulates a test-taking backend with call counters,
//! injectable failures, and optional latency. [`MemoryResumeStore`] and
//! [`RecordingObserver`] stand in for the durable pointer store and the UI.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::error::BackendError;
use crate::model::{Answer, AnswerPayload, Question, QuestionId, QuestionOption, QuestionType};
use crate::observer::{SessionObserver, SessionWarning};
use crate::traits::{
    AttemptBackend, AttemptResult, AttemptStatusSnapshot, QuestionView, RemoteStatus, ResumeStore,
    SaveAck, StartedAttempt,
};

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Failures {
    start: Option<BackendError>,
    saves: Option<(u32, BackendError)>,
    completes: Option<(u32, BackendError)>,
    navigation: Option<(u32, BackendError)>,
}

impl Failures {
    fn take(slot: &mut Option<(u32, BackendError)>) -> Option<BackendError> {
        let (left, err) = slot.as_mut()?;
        let err = err.clone();
        *left -= 1;
        if *left == 0 {
            *slot = None;
        }
        Some(err)
    }
}

struct AttemptRecord {
    id: String,
    status: RemoteStatus,
    current: u32,
    answers: HashMap<QuestionId, AnswerPayload>,
}

/// A single-student backend held in memory.
pub struct MockBackend {
    questions: Vec<Question>,
    time_remaining_seconds: Option<u64>,
    duration_minutes: Option<u64>,
    attempt: Mutex<Option<AttemptRecord>>,
    failures: Mutex<Failures>,
    save_latency: Mutex<Duration>,
    step_latency: Mutex<Duration>,
    complete_latency: Mutex<Duration>,
    save_log: Mutex<Vec<AnswerPayload>>,
    start_calls: AtomicU32,
    question_calls: AtomicU32,
    save_calls: AtomicU32,
    complete_calls: AtomicU32,
    status_calls: AtomicU32,
}

impl MockBackend {
    /// A backend serving `questions`, numbered by their position.
    pub fn new(questions: Vec<Question>) -> Self {
        Self {
            questions,
            time_remaining_seconds: None,
            duration_minutes: None,
            attempt: Mutex::new(None),
            failures: Mutex::new(Failures::default()),
            save_latency: Mutex::new(Duration::ZERO),
            step_latency: Mutex::new(Duration::ZERO),
            complete_latency: Mutex::new(Duration::ZERO),
            save_log: Mutex::new(Vec::new()),
            start_calls: AtomicU32::new(0),
            question_calls: AtomicU32::new(0),
            save_calls: AtomicU32::new(0),
            complete_calls: AtomicU32::new(0),
            status_calls: AtomicU32::new(0),
        }
    }

    /// `count` questions cycling through single choice, multiple choice
    /// and text. Choice questions have options 1 to 4; question ids are
    /// `ordinal * 10`.
    pub fn sample(count: u32) -> Self {
        let kinds = [
            QuestionType::SingleChoice,
            QuestionType::MultipleChoice,
            QuestionType::Text,
        ];
        let questions = (1..=count)
            .map(|ordinal| {
                let kind = kinds[(ordinal as usize - 1) % kinds.len()];
                let options = if kind == QuestionType::Text {
                    vec![]
                } else {
                    (1..=4)
                        .map(|id| QuestionOption {
                            id,
                            text: format!("option {id}"),
                        })
                        .collect()
                };
                Question {
                    id: u64::from(ordinal) * 10,
                    ordinal,
                    kind,
                    text: format!("Question {ordinal}"),
                    options,
                }
            })
            .collect();
        Self::new(questions)
    }

    pub fn with_time_remaining(mut self, seconds: u64) -> Self {
        self.time_remaining_seconds = Some(seconds);
        self
    }

    pub fn with_duration_minutes(mut self, minutes: u64) -> Self {
        self.duration_minutes = Some(minutes);
        self
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    /// Refuse every start request with `err`.
    pub fn reject_start(&self, err: BackendError) {
        lock(&self.failures).start = Some(err);
    }

    /// Fail the next `count` save calls with `err`.
    pub fn fail_saves(&self, count: u32, err: BackendError) {
        lock(&self.failures).saves = (count > 0).then_some((count, err));
    }

    /// Fail the next `count` completion calls with `err`.
    pub fn fail_completes(&self, count: u32, err: BackendError) {
        lock(&self.failures).completes = (count > 0).then_some((count, err));
    }

    /// Fail the next `count` question loads (get, next, previous) with `err`.
    pub fn fail_navigation(&self, count: u32, err: BackendError) {
        lock(&self.failures).navigation = (count > 0).then_some((count, err));
    }

    pub fn set_save_latency(&self, latency: Duration) {
        *lock(&self.save_latency) = latency;
    }

    /// Delay applied to `next_question` and `previous_question`.
    pub fn set_step_latency(&self, latency: Duration) {
        *lock(&self.step_latency) = latency;
    }

    pub fn set_complete_latency(&self, latency: Duration) {
        *lock(&self.complete_latency) = latency;
    }

    /// Pretend the student already answered a question in an earlier session.
    pub fn preload_answer(&self, answer: AnswerPayload) {
        let mut attempt = lock(&self.attempt);
        let record = attempt.get_or_insert_with(Self::fresh_attempt);
        record.answers.insert(answer.question_id, answer);
    }

    /// Force the server-side status, e.g. to simulate expiry while offline.
    pub fn set_remote_status(&self, status: RemoteStatus) {
        if let Some(record) = lock(&self.attempt).as_mut() {
            record.status = status;
        }
    }

    pub fn attempt_id(&self) -> Option<String> {
        lock(&self.attempt).as_ref().map(|r| r.id.clone())
    }

    pub fn remote_status(&self) -> Option<RemoteStatus> {
        lock(&self.attempt).as_ref().map(|r| r.status)
    }

    /// The answer the backend currently holds for a question.
    pub fn saved_answer(&self, question_id: QuestionId) -> Option<AnswerPayload> {
        lock(&self.attempt)
            .as_ref()
            .and_then(|r| r.answers.get(&question_id).cloned())
    }

    /// Every payload accepted by `save_answer`, in arrival order.
    pub fn save_log(&self) -> Vec<AnswerPayload> {
        lock(&self.save_log).clone()
    }

    pub fn start_calls(&self) -> u32 {
        self.start_calls.load(Ordering::Relaxed)
    }

    /// Calls to `get_question`, `next_question` and `previous_question`.
    pub fn question_calls(&self) -> u32 {
        self.question_calls.load(Ordering::Relaxed)
    }

    pub fn save_calls(&self) -> u32 {
        self.save_calls.load(Ordering::Relaxed)
    }

    pub fn complete_calls(&self) -> u32 {
        self.complete_calls.load(Ordering::Relaxed)
    }

    pub fn status_calls(&self) -> u32 {
        self.status_calls.load(Ordering::Relaxed)
    }

    fn fresh_attempt() -> AttemptRecord {
        AttemptRecord {
            id: Uuid::new_v4().to_string(),
            status: RemoteStatus::InProgress,
            current: 1,
            answers: HashMap::new(),
        }
    }

    fn total(&self) -> u32 {
        self.questions.len() as u32
    }

    fn view(&self, record: &AttemptRecord) -> Result<QuestionView, BackendError> {
        let question = self
            .questions
            .get(record.current.saturating_sub(1) as usize)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("question {}", record.current)))?;
        Ok(QuestionView {
            current_answer: record.answers.get(&question.id).cloned(),
            question,
            current_question_number: record.current,
            time_remaining_seconds: self.time_remaining_seconds,
        })
    }

    /// Look up the open attempt `attempt_id` and apply `f` to it.
    fn with_open_attempt<T>(
        &self,
        attempt_id: &str,
        f: impl FnOnce(&mut AttemptRecord) -> Result<T, BackendError>,
    ) -> Result<T, BackendError> {
        let mut attempt = lock(&self.attempt);
        let record = attempt
            .as_mut()
            .filter(|r| r.id == attempt_id)
            .ok_or_else(|| BackendError::NotFound(format!("attempt {attempt_id}")))?;
        if !record.status.is_open() {
            return Err(BackendError::Rejected(format!(
                "attempt {attempt_id} is no longer open"
            )));
        }
        f(record)
    }

    async fn step_delay(&self) {
        let latency = *lock(&self.step_latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn step(
        &self,
        attempt_id: &str,
        current: u32,
        answer: &AnswerPayload,
        forward: bool,
    ) -> Result<QuestionView, BackendError> {
        self.question_calls.fetch_add(1, Ordering::Relaxed);
        if let Some(err) = Failures::take(&mut lock(&self.failures).navigation) {
            return Err(err);
        }
        let total = self.total();
        self.with_open_attempt(attempt_id, |record| {
            record.answers.insert(answer.question_id, answer.clone());
            record.current = if forward {
                (current + 1).min(total)
            } else {
                current.saturating_sub(1).max(1)
            };
            self.view(record)
        })
    }
}

#[async_trait]
impl AttemptBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn start_attempt(&self, test_id: &str) -> Result<StartedAttempt, BackendError> {
        self.start_calls.fetch_add(1, Ordering::Relaxed);
        if let Some(err) = lock(&self.failures).start.clone() {
            return Err(err);
        }

        let mut attempt = lock(&self.attempt);
        let reusable = attempt.as_ref().is_some_and(|r| r.status.is_open());
        if !reusable {
            *attempt = Some(Self::fresh_attempt());
        }
        let Some(record) = attempt.as_ref() else {
            return Err(BackendError::InvalidResponse("no attempt".into()));
        };
        tracing::debug!(test_id, attempt_id = %record.id, "mock attempt opened");
        let view = self.view(record)?;
        Ok(StartedAttempt {
            attempt_id: record.id.clone(),
            question: view.question,
            current_question_number: view.current_question_number,
            total_questions: self.total(),
            current_answer: view.current_answer,
            time_remaining_seconds: self.time_remaining_seconds,
            duration_minutes: self.duration_minutes,
        })
    }

    async fn get_question(
        &self,
        attempt_id: &str,
        question_number: u32,
    ) -> Result<QuestionView, BackendError> {
        self.question_calls.fetch_add(1, Ordering::Relaxed);
        if let Some(err) = Failures::take(&mut lock(&self.failures).navigation) {
            return Err(err);
        }
        let total = self.total();
        self.with_open_attempt(attempt_id, |record| {
            if !(1..=total).contains(&question_number) {
                return Err(BackendError::NotFound(format!("question {question_number}")));
            }
            record.current = question_number;
            self.view(record)
        })
    }

    async fn save_answer(
        &self,
        attempt_id: &str,
        answer: &AnswerPayload,
    ) -> Result<SaveAck, BackendError> {
        self.save_calls.fetch_add(1, Ordering::Relaxed);
        let latency = *lock(&self.save_latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if let Some(err) = Failures::take(&mut lock(&self.failures).saves) {
            return Err(err);
        }
        self.with_open_attempt(attempt_id, |record| {
            record.answers.insert(answer.question_id, answer.clone());
            Ok(())
        })?;
        lock(&self.save_log).push(answer.clone());
        Ok(SaveAck {
            question_id: answer.question_id,
            saved_at: Some(Utc::now()),
        })
    }

    async fn next_question(
        &self,
        attempt_id: &str,
        current_question_number: u32,
        answer: &AnswerPayload,
    ) -> Result<QuestionView, BackendError> {
        self.step_delay().await;
        self.step(attempt_id, current_question_number, answer, true)
    }

    async fn previous_question(
        &self,
        attempt_id: &str,
        current_question_number: u32,
        answer: &AnswerPayload,
    ) -> Result<QuestionView, BackendError> {
        self.step_delay().await;
        self.step(attempt_id, current_question_number, answer, false)
    }

    async fn complete_attempt(&self, attempt_id: &str) -> Result<AttemptResult, BackendError> {
        self.complete_calls.fetch_add(1, Ordering::Relaxed);
        let latency = *lock(&self.complete_latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if let Some(err) = Failures::take(&mut lock(&self.failures).completes) {
            return Err(err);
        }
        let total = self.total();
        let questions = &self.questions;
        self.with_open_attempt(attempt_id, |record| {
            record.status = RemoteStatus::Completed;
            let answered = questions
                .iter()
                .filter(|q| record.answers.get(&q.id).is_some_and(is_answered))
                .count() as u32;
            Ok(AttemptResult {
                attempt_id: record.id.clone(),
                score: None,
                max_score: None,
                answered_questions: answered,
                total_questions: total,
                submitted_at: Some(Utc::now()),
            })
        })
    }

    async fn attempt_status(
        &self,
        attempt_id: &str,
    ) -> Result<AttemptStatusSnapshot, BackendError> {
        self.status_calls.fetch_add(1, Ordering::Relaxed);
        let attempt = lock(&self.attempt);
        let record = attempt
            .as_ref()
            .filter(|r| r.id == attempt_id)
            .ok_or_else(|| BackendError::NotFound(format!("attempt {attempt_id}")))?;
        let mut answered: Vec<u32> = self
            .questions
            .iter()
            .filter(|q| record.answers.get(&q.id).is_some_and(is_answered))
            .map(|q| q.ordinal)
            .collect();
        answered.sort_unstable();
        Ok(AttemptStatusSnapshot {
            attempt_id: record.id.clone(),
            status: record.status,
            current_question_number: record.current,
            total_questions: self.total(),
            time_remaining_seconds: self.time_remaining_seconds,
            answered_questions: answered,
        })
    }
}

// ---------------------------------------------------------------------------
// Resume store
// ---------------------------------------------------------------------------

/// Resume pointers kept in memory; lost when the process exits.
#[derive(Default)]
pub struct MemoryResumeStore {
    pointers: Mutex<HashMap<String, String>>,
}

impl MemoryResumeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResumeStore for MemoryResumeStore {
    fn get(&self, test_id: &str) -> anyhow::Result<Option<String>> {
        Ok(lock(&self.pointers).get(test_id).cloned())
    }

    fn set(&self, test_id: &str, attempt_id: &str) -> anyhow::Result<()> {
        lock(&self.pointers).insert(test_id.to_string(), attempt_id.to_string());
        Ok(())
    }

    fn clear(&self, test_id: &str) -> anyhow::Result<()> {
        lock(&self.pointers).remove(test_id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Observer
// ---------------------------------------------------------------------------

/// Observer that records everything it is told.
#[derive(Default)]
pub struct RecordingObserver {
    questions: Mutex<Vec<u32>>,
    warnings: Mutex<Vec<SessionWarning>>,
    ticks: Mutex<Vec<u64>>,
    expired: AtomicU32,
    completed: Mutex<Vec<AttemptResult>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Question numbers shown, in order.
    pub fn questions(&self) -> Vec<u32> {
        lock(&self.questions).clone()
    }

    pub fn warnings(&self) -> Vec<SessionWarning> {
        lock(&self.warnings).clone()
    }

    pub fn ticks(&self) -> Vec<u64> {
        lock(&self.ticks).clone()
    }

    pub fn expired_count(&self) -> u32 {
        self.expired.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> Vec<AttemptResult> {
        lock(&self.completed).clone()
    }
}

impl SessionObserver for RecordingObserver {
    fn on_question(&self, question_number: u32, _: &Question) {
        lock(&self.questions).push(question_number);
    }

    fn on_warning(&self, warning: &SessionWarning) {
        lock(&self.warnings).push(warning.clone());
    }

    fn on_tick(&self, remaining_secs: u64) {
        lock(&self.ticks).push(remaining_secs);
    }

    fn on_expired(&self) {
        self.expired.fetch_add(1, Ordering::SeqCst);
    }

    fn on_completed(&self, result: &AttemptResult) {
        lock(&self.completed).push(result.clone());
    }
}

fn is_answered(payload: &AnswerPayload) -> bool {
    Answer::from_payload(payload).is_answered()
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
