//! In-memory answer buffer.
//!
//! Holds exactly one [`Answer`] per question, tracks which answers are dirty,
//! and stamps every edit with a revision so late acknowledgements for older
//! contents can be told apart from the current one.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use crate::error::EditError;
use crate::model::{Answer, AnswerPayload, OptionId, Question, QuestionId, QuestionType};

/// A snapshot of an answer handed to the autosave scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAnswer {
    pub payload: AnswerPayload,
    /// Cache revision the payload was taken at.
    pub revision: u64,
}

#[derive(Debug, Clone)]
struct Entry {
    /// Position the question was last shown at. Drives the answered set,
    /// so it follows the attempt's numbering rather than `Question::ordinal`.
    number: u32,
    answer: Answer,
    revision: u64,
    sync_failed: bool,
}

/// Answers for every question seen in this attempt.
#[derive(Debug, Default)]
pub struct AnswerCache {
    entries: BTreeMap<QuestionId, Entry>,
}

impl AnswerCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sure `question`, shown at `number`, has an answer slot. An
    /// existing slot keeps its answer, so a freshly fetched question cannot
    /// clobber local edits.
    pub fn ensure(&mut self, number: u32, question: &Question) -> &Answer {
        let entry = self.slot(question);
        entry.number = number;
        &entry.answer
    }

    /// Adopt the backend's copy of an answer unless a local edit is still
    /// unsaved. Returns `true` if the remote copy was taken.
    pub fn adopt_remote(&mut self, number: u32, payload: &AnswerPayload) -> bool {
        match self.entries.get_mut(&payload.question_id) {
            Some(entry) if entry.answer.dirty => {
                entry.number = number;
                false
            }
            Some(entry) => {
                entry.number = number;
                let synced_at = entry.answer.last_synced_at;
                entry.answer = Answer::from_payload(payload);
                entry.answer.last_synced_at = synced_at;
                true
            }
            None => {
                self.entries.insert(
                    payload.question_id,
                    Entry {
                        number,
                        answer: Answer::from_payload(payload),
                        revision: 0,
                        sync_failed: false,
                    },
                );
                true
            }
        }
    }

    /// Select or deselect an option.
    ///
    /// Single-choice questions replace the selection; multiple-choice
    /// questions toggle membership. Returns `None` if nothing changed.
    pub fn toggle_option(
        &mut self,
        question: &Question,
        option_id: OptionId,
    ) -> Result<Option<PendingAnswer>, EditError> {
        if question.kind == QuestionType::Text {
            return Err(EditError::WrongKind(question.id, "option selections"));
        }
        if !question.has_option(option_id) {
            return Err(EditError::UnknownOption(option_id));
        }

        let entry = self.slot(question);
        let selected = &mut entry.answer.selected_option_ids;
        match question.kind {
            QuestionType::SingleChoice => {
                if selected.len() == 1 && selected.contains(&option_id) {
                    return Ok(None);
                }
                selected.clear();
                selected.insert(option_id);
            }
            _ => {
                if !selected.remove(&option_id) {
                    selected.insert(option_id);
                }
            }
        }
        Ok(Some(Self::touch(entry)))
    }

    /// Replace the free-text answer. Returns `None` if the text is unchanged.
    pub fn set_text(
        &mut self,
        question: &Question,
        text: &str,
    ) -> Result<Option<PendingAnswer>, EditError> {
        if question.kind != QuestionType::Text {
            return Err(EditError::WrongKind(question.id, "free text"));
        }

        let entry = self.slot(question);
        if entry.answer.answer_text == text {
            return Ok(None);
        }
        entry.answer.answer_text = text.to_string();
        Ok(Some(Self::touch(entry)))
    }

    pub fn get(&self, question_id: QuestionId) -> Option<&Answer> {
        self.entries.get(&question_id).map(|e| &e.answer)
    }

    /// Current contents of an answer, dirty or not.
    pub fn snapshot(&self, question_id: QuestionId) -> Option<PendingAnswer> {
        self.entries.get(&question_id).map(|e| PendingAnswer {
            payload: e.answer.to_payload(),
            revision: e.revision,
        })
    }

    /// Every answer with unsaved edits, in question order.
    pub fn dirty(&self) -> Vec<PendingAnswer> {
        let mut pending: Vec<(u32, PendingAnswer)> = self
            .entries
            .values()
            .filter(|e| e.answer.dirty)
            .map(|e| {
                (
                    e.number,
                    PendingAnswer {
                        payload: e.answer.to_payload(),
                        revision: e.revision,
                    },
                )
            })
            .collect();
        pending.sort_by_key(|(number, _)| *number);
        pending.into_iter().map(|(_, p)| p).collect()
    }

    /// Record a successful save of `revision`.
    ///
    /// Acknowledgements for an older revision are stale and leave the answer
    /// dirty. Returns `true` if the answer is now clean.
    pub fn mark_synced(
        &mut self,
        question_id: QuestionId,
        revision: u64,
        at: DateTime<Utc>,
    ) -> bool {
        let Some(entry) = self.entries.get_mut(&question_id) else {
            return false;
        };
        if entry.revision != revision {
            tracing::debug!(
                question_id,
                acked = revision,
                current = entry.revision,
                "discarding stale save acknowledgement"
            );
            return false;
        }
        entry.answer.dirty = false;
        entry.answer.last_synced_at = Some(at);
        entry.sync_failed = false;
        true
    }

    /// Record a failed save. Returns `true` the first time an answer starts
    /// failing, so the failure is reported once rather than on every retry.
    pub fn mark_failed(&mut self, question_id: QuestionId) -> bool {
        let Some(entry) = self.entries.get_mut(&question_id) else {
            return false;
        };
        if !entry.answer.dirty {
            return false;
        }
        let newly_failing = !entry.sync_failed;
        entry.sync_failed = true;
        newly_failing
    }

    /// Question numbers whose answers count as answered.
    pub fn answered_numbers(&self) -> BTreeSet<u32> {
        self.entries
            .values()
            .filter(|e| e.answer.is_answered())
            .map(|e| e.number)
            .collect()
    }

    /// Question numbers with a local answer slot, answered or not.
    pub fn known_numbers(&self) -> BTreeSet<u32> {
        self.entries.values().map(|e| e.number).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn slot(&mut self, question: &Question) -> &mut Entry {
        self.entries.entry(question.id).or_insert_with(|| Entry {
            number: question.ordinal,
            answer: Answer::empty(question.id),
            revision: 0,
            sync_failed: false,
        })
    }

    fn touch(entry: &mut Entry) -> PendingAnswer {
        entry.revision += 1;
        entry.answer.dirty = true;
        PendingAnswer {
            payload: entry.answer.to_payload(),
            revision: entry.revision,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::QuestionOption;

    fn question(id: QuestionId, ordinal: u32, kind: QuestionType) -> Question {
        Question {
            id,
            ordinal,
            kind,
            text: format!("question {ordinal}"),
            options: (1..=4)
                .map(|i| QuestionOption {
                    id: i,
                    text: format!("option {i}"),
                })
                .collect(),
        }
    }

    #[test]
    fn single_choice_replaces_selection() {
        let q = question(10, 1, QuestionType::SingleChoice);
        let mut cache = AnswerCache::new();
        cache.toggle_option(&q, 1).unwrap();
        let pending = cache.toggle_option(&q, 3).unwrap().unwrap();
        assert_eq!(pending.payload.selected_option_ids, vec![3]);
        assert_eq!(pending.revision, 2);
    }

    #[test]
    fn single_choice_reselect_is_noop() {
        let q = question(10, 1, QuestionType::SingleChoice);
        let mut cache = AnswerCache::new();
        cache.toggle_option(&q, 2).unwrap();
        assert!(cache.toggle_option(&q, 2).unwrap().is_none());
    }

    #[test]
    fn multiple_choice_toggles() {
        let q = question(11, 2, QuestionType::MultipleChoice);
        let mut cache = AnswerCache::new();
        cache.toggle_option(&q, 1).unwrap();
        cache.toggle_option(&q, 4).unwrap();
        let pending = cache.toggle_option(&q, 1).unwrap().unwrap();
        assert_eq!(pending.payload.selected_option_ids, vec![4]);
    }

    #[test]
    fn rejects_foreign_option_and_wrong_kind() {
        let choice = question(10, 1, QuestionType::SingleChoice);
        let text = question(12, 3, QuestionType::Text);
        let mut cache = AnswerCache::new();
        assert!(matches!(
            cache.toggle_option(&choice, 99),
            Err(EditError::UnknownOption(99))
        ));
        assert!(matches!(
            cache.set_text(&choice, "hi"),
            Err(EditError::WrongKind(10, _))
        ));
        assert!(matches!(
            cache.toggle_option(&text, 1),
            Err(EditError::WrongKind(12, _))
        ));
        assert!(cache.get(10).is_none());
    }

    #[test]
    fn stale_ack_leaves_answer_dirty() {
        let q = question(12, 1, QuestionType::Text);
        let mut cache = AnswerCache::new();
        let first = cache.set_text(&q, "draft").unwrap().unwrap();
        let second = cache.set_text(&q, "final").unwrap().unwrap();

        assert!(!cache.mark_synced(12, first.revision, Utc::now()));
        assert!(cache.get(12).unwrap().dirty);

        assert!(cache.mark_synced(12, second.revision, Utc::now()));
        let answer = cache.get(12).unwrap();
        assert!(!answer.dirty);
        assert!(answer.last_synced_at.is_some());
    }

    #[test]
    fn ensure_never_overwrites_local_edits() {
        let q = question(12, 1, QuestionType::Text);
        let mut cache = AnswerCache::new();
        cache.set_text(&q, "mine").unwrap();
        assert_eq!(cache.ensure(1, &q).answer_text, "mine");
    }

    #[test]
    fn answered_set_follows_shown_position() {
        // Served in shuffled order: ordinal 7 is the attempt's second question.
        let q = question(70, 7, QuestionType::Text);
        let mut cache = AnswerCache::new();
        cache.ensure(2, &q);
        cache.set_text(&q, "answer").unwrap();

        assert_eq!(cache.answered_numbers(), BTreeSet::from([2]));
        assert_eq!(cache.known_numbers(), BTreeSet::from([2]));
    }

    #[test]
    fn adopt_remote_skips_dirty_answers() {
        let q = question(12, 1, QuestionType::Text);
        let mut cache = AnswerCache::new();
        cache.set_text(&q, "local").unwrap();
        let remote = AnswerPayload {
            question_id: 12,
            selected_option_ids: vec![],
            answer_text: "server".into(),
        };
        assert!(!cache.adopt_remote(1, &remote));
        assert_eq!(cache.get(12).unwrap().answer_text, "local");

        let other = AnswerPayload {
            question_id: 13,
            selected_option_ids: vec![2],
            answer_text: String::new(),
        };
        assert!(cache.adopt_remote(2, &other));
        assert!(!cache.get(13).unwrap().dirty);
    }

    #[test]
    fn failure_reported_once_until_synced() {
        let q = question(12, 1, QuestionType::Text);
        let mut cache = AnswerCache::new();
        let pending = cache.set_text(&q, "x").unwrap().unwrap();
        assert!(cache.mark_failed(12));
        assert!(!cache.mark_failed(12));
        cache.mark_synced(12, pending.revision, Utc::now());
        cache.set_text(&q, "y").unwrap();
        assert!(cache.mark_failed(12));
    }

    #[test]
    fn dirty_listed_in_question_order() {
        let q3 = question(30, 3, QuestionType::Text);
        let q1 = question(10, 1, QuestionType::Text);
        let mut cache = AnswerCache::new();
        cache.set_text(&q3, "c").unwrap();
        cache.set_text(&q1, "a").unwrap();
        let ids: Vec<_> = cache.dirty().iter().map(|p| p.payload.question_id).collect();
        assert_eq!(ids, vec![10, 30]);
    }

    #[test]
    fn answered_numbers_follow_predicate() {
        let q1 = question(10, 1, QuestionType::Text);
        let q2 = question(20, 2, QuestionType::MultipleChoice);
        let mut cache = AnswerCache::new();
        cache.set_text(&q1, "   ").unwrap();
        cache.toggle_option(&q2, 3).unwrap();
        assert_eq!(cache.answered_numbers().into_iter().collect::<Vec<_>>(), vec![2]);
    }
}
