//! Core data model types for testtaker.
//!
//! These are the types the attempt engine passes between the controller,
//! the answer cache, and the backend: sessions, questions, and answers.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Backend identifier of a question.
pub type QuestionId = u64;
/// Backend identifier of a question option.
pub type OptionId = u64;

/// Lifecycle status of an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    NotStarted,
    InProgress,
    Submitting,
    Completed,
}

impl SessionStatus {
    /// Whether moving from `self` to `next` is allowed.
    ///
    /// Status only moves forward, except that a failed submission drops
    /// `Submitting` back to `InProgress`.
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (NotStarted, InProgress)
                | (InProgress, Submitting)
                | (Submitting, Completed)
                | (Submitting, InProgress)
        )
    }

    /// `true` once the attempt can no longer be edited.
    pub fn is_terminal(self) -> bool {
        self == SessionStatus::Completed
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::NotStarted => write!(f, "not started"),
            SessionStatus::InProgress => write!(f, "in progress"),
            SessionStatus::Submitting => write!(f, "submitting"),
            SessionStatus::Completed => write!(f, "completed"),
        }
    }
}

/// An attempt owned by the session controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptSession {
    /// Attempt identifier issued by the backend.
    pub id: String,
    /// Test this attempt belongs to.
    pub test_id: String,
    pub status: SessionStatus,
    /// Deadline derived from the server-reported remaining time at start.
    /// `None` for untimed tests.
    pub expires_at: Option<DateTime<Utc>>,
    pub total_questions: u32,
}

/// Supported question kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestionType {
    SingleChoice,
    MultipleChoice,
    Text,
}

impl fmt::Display for QuestionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuestionType::SingleChoice => write!(f, "single_choice"),
            QuestionType::MultipleChoice => write!(f, "multiple_choice"),
            QuestionType::Text => write!(f, "text"),
        }
    }
}

impl FromStr for QuestionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "single_choice" | "single" => Ok(QuestionType::SingleChoice),
            "multiple_choice" | "multiple" | "multi" => Ok(QuestionType::MultipleChoice),
            "text" | "free_text" => Ok(QuestionType::Text),
            other => Err(format!("unknown question type: {other}")),
        }
    }
}

/// One selectable option of a choice question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub id: OptionId,
    pub text: String,
}

/// A question as delivered by the backend. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: QuestionId,
    /// 1-indexed position of the question in the attempt.
    pub ordinal: u32,
    #[serde(rename = "type")]
    pub kind: QuestionType,
    /// Prompt shown to the student.
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub options: Vec<QuestionOption>,
}

impl Question {
    pub fn has_option(&self, option_id: OptionId) -> bool {
        self.options.iter().any(|o| o.id == option_id)
    }
}

/// The editable answer for one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub question_id: QuestionId,
    pub selected_option_ids: BTreeSet<OptionId>,
    pub answer_text: String,
    /// Edited locally but not yet confirmed persisted.
    pub dirty: bool,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl Answer {
    /// An empty, clean answer.
    pub fn empty(question_id: QuestionId) -> Self {
        Self {
            question_id,
            selected_option_ids: BTreeSet::new(),
            answer_text: String::new(),
            dirty: false,
            last_synced_at: None,
        }
    }

    /// A clean answer adopted from the backend's copy.
    pub fn from_payload(payload: &AnswerPayload) -> Self {
        Self {
            question_id: payload.question_id,
            selected_option_ids: payload.selected_option_ids.iter().copied().collect(),
            answer_text: payload.answer_text.clone(),
            dirty: false,
            last_synced_at: None,
        }
    }

    /// An answer counts as answered when any option is selected or the
    /// text is non-blank.
    pub fn is_answered(&self) -> bool {
        !self.selected_option_ids.is_empty() || !self.answer_text.trim().is_empty()
    }

    /// The wire form of this answer.
    pub fn to_payload(&self) -> AnswerPayload {
        AnswerPayload {
            question_id: self.question_id,
            selected_option_ids: self.selected_option_ids.iter().copied().collect(),
            answer_text: self.answer_text.clone(),
        }
    }
}

/// Answer contents as exchanged with the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerPayload {
    pub question_id: QuestionId,
    #[serde(default)]
    pub selected_option_ids: Vec<OptionId>,
    #[serde(default)]
    pub answer_text: String,
}

/// Which question is shown and which ones have an answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationState {
    pub current_question_number: u32,
    pub answered_set: BTreeSet<u32>,
}

/// Where a navigation request wants to go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavTarget {
    Next,
    Previous,
    Jump(u32),
}

impl fmt::Display for NavTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NavTarget::Next => write!(f, "next"),
            NavTarget::Previous => write!(f, "previous"),
            NavTarget::Jump(n) => write!(f, "question {n}"),
        }
    }
}
