//! Question and page bookkeeping.

use std::collections::BTreeSet;
use std::ops::RangeInclusive;

use crate::error::NavigationError;
use crate::model::NavTarget;

/// Default number of questions shown per page.
pub const DEFAULT_PAGE_SIZE: u32 = 1;

/// Pure navigation rules for an attempt with a fixed question count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavigationPolicy {
    total_questions: u32,
    page_size: u32,
}

impl NavigationPolicy {
    /// A page size of zero is treated as one.
    pub fn new(total_questions: u32, page_size: u32) -> Self {
        Self {
            total_questions,
            page_size: page_size.max(1),
        }
    }

    pub fn total_questions(&self) -> u32 {
        self.total_questions
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Number of pages; the last one may be short.
    pub fn page_count(&self) -> u32 {
        self.total_questions.div_ceil(self.page_size)
    }

    /// 1-indexed page holding `question_number`.
    pub fn page_of(&self, question_number: u32) -> u32 {
        question_number.saturating_sub(1) / self.page_size + 1
    }

    /// Question numbers on `page`, clipped to the question count.
    pub fn page_range(&self, page: u32) -> RangeInclusive<u32> {
        let first = page.saturating_sub(1) * self.page_size + 1;
        let last = (first + self.page_size - 1).min(self.total_questions);
        first..=last
    }

    pub fn contains(&self, question_number: u32) -> bool {
        (1..=self.total_questions).contains(&question_number)
    }

    /// Where `target` leads from `current`.
    ///
    /// Stepping past either end yields `Ok(None)`; jumping outside the
    /// attempt is an error. Jumping to the current question is also a no-op.
    pub fn resolve(&self, current: u32, target: NavTarget) -> Result<Option<u32>, NavigationError> {
        match target {
            NavTarget::Next if current < self.total_questions => Ok(Some(current + 1)),
            NavTarget::Previous if current > 1 => Ok(Some(current - 1)),
            NavTarget::Next | NavTarget::Previous => Ok(None),
            NavTarget::Jump(n) if !self.contains(n) => Err(NavigationError::OutOfRange {
                requested: n,
                total: self.total_questions,
            }),
            NavTarget::Jump(n) if n == current => Ok(None),
            NavTarget::Jump(n) => Ok(Some(n)),
        }
    }

    /// Question numbers missing from `answered`, ascending.
    pub fn unanswered(&self, answered: &BTreeSet<u32>) -> Vec<u32> {
        (1..=self.total_questions)
            .filter(|n| !answered.contains(n))
            .collect()
    }
}
