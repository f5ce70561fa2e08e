//! Ports to the outside world: the remote test-taking backend and the
//! durable resumption pointer store.
//!
//! `testtaker-backend` implements [`AttemptBackend`] over HTTP and
//! `testtaker-store` implements [`ResumeStore`] on disk.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BackendError;
use crate::model::{AnswerPayload, Question, QuestionId};

// ---------------------------------------------------------------------------
// Backend trait
// ---------------------------------------------------------------------------

/// Remote test-taking backend. The single source of truth for an attempt.
#[async_trait]
pub trait AttemptBackend: Send + Sync {
    /// Human-readable backend name (e.g. "http").
    fn name(&self) -> &str;

    /// Start a new attempt, or resume the student's open one.
    async fn start_attempt(&self, test_id: &str) -> Result<StartedAttempt, BackendError>;

    /// Load the question at `question_number` (1-indexed).
    async fn get_question(
        &self,
        attempt_id: &str,
        question_number: u32,
    ) -> Result<QuestionView, BackendError>;

    /// Persist one answer.
    async fn save_answer(
        &self,
        attempt_id: &str,
        answer: &AnswerPayload,
    ) -> Result<SaveAck, BackendError>;

    /// Save `answer` and advance past `current_question_number` atomically.
    async fn next_question(
        &self,
        attempt_id: &str,
        current_question_number: u32,
        answer: &AnswerPayload,
    ) -> Result<QuestionView, BackendError>;

    /// Save `answer` and step back from `current_question_number` atomically.
    async fn previous_question(
        &self,
        attempt_id: &str,
        current_question_number: u32,
        answer: &AnswerPayload,
    ) -> Result<QuestionView, BackendError>;

    /// Finalize the attempt.
    async fn complete_attempt(&self, attempt_id: &str) -> Result<AttemptResult, BackendError>;

    /// Current server-side view of the attempt, used after reconnecting.
    async fn attempt_status(&self, attempt_id: &str)
        -> Result<AttemptStatusSnapshot, BackendError>;
}

/// Response to [`AttemptBackend::start_attempt`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedAttempt {
    pub attempt_id: String,
    pub question: Question,
    pub current_question_number: u32,
    pub total_questions: u32,
    #[serde(default)]
    pub current_answer: Option<AnswerPayload>,
    #[serde(default)]
    pub time_remaining_seconds: Option<u64>,
    #[serde(default)]
    pub duration_minutes: Option<u64>,
}

impl StartedAttempt {
    /// Seconds left on the clock. An explicit remaining value wins over the
    /// nominal duration; `None` means the test is untimed.
    pub fn initial_remaining_seconds(&self) -> Option<u64> {
        self.time_remaining_seconds
            .or_else(|| self.duration_minutes.map(|m| m.saturating_mul(60)))
    }
}

/// A question together with the attempt's position and saved answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionView {
    pub question: Question,
    pub current_question_number: u32,
    #[serde(default)]
    pub current_answer: Option<AnswerPayload>,
    #[serde(default)]
    pub time_remaining_seconds: Option<u64>,
}

/// Acknowledgement of a saved answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveAck {
    pub question_id: QuestionId,
    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,
}

/// Summary returned once an attempt is finalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptResult {
    pub attempt_id: String,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub max_score: Option<f64>,
    #[serde(default)]
    pub answered_questions: u32,
    pub total_questions: u32,
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
}

/// Server-side attempt state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemoteStatus {
    InProgress,
    Completed,
    Expired,
    Abandoned,
}

impl RemoteStatus {
    /// `true` if the attempt can still be worked on.
    pub fn is_open(self) -> bool {
        self == RemoteStatus::InProgress
    }
}

/// Response to [`AttemptBackend::attempt_status`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptStatusSnapshot {
    pub attempt_id: String,
    pub status: RemoteStatus,
    pub current_question_number: u32,
    pub total_questions: u32,
    #[serde(default)]
    pub time_remaining_seconds: Option<u64>,
    #[serde(default)]
    pub answered_questions: Vec<u32>,
}

// ---------------------------------------------------------------------------
// Resume store trait
// ---------------------------------------------------------------------------

/// Durable mapping from test id to the attempt id that can be resumed after
/// a reload. Cleared once the attempt completes or is abandoned.
pub trait ResumeStore: Send + Sync {
    fn get(&self, test_id: &str) -> anyhow::Result<Option<String>>;

    fn set(&self, test_id: &str, attempt_id: &str) -> anyhow::Result<()>;

    fn clear(&self, test_id: &str) -> anyhow::Result<()>;
}
