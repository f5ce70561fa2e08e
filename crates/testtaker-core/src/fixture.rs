//! TOML test fixtures.
//!
//! A fixture describes a test (its questions and time limit) and optionally
//! answers already saved on the server, and is turned into a [`MockBackend`]
//! for offline runs.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::mock::MockBackend;
use crate::model::{AnswerPayload, Question, QuestionOption, QuestionType};

/// Intermediate TOML structure for fixture files.
#[derive(Debug, Deserialize)]
struct TomlFixture {
    test: TomlTestHeader,
    #[serde(default)]
    questions: Vec<TomlQuestion>,
}

#[derive(Debug, Deserialize)]
struct TomlTestHeader {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    duration_minutes: Option<u64>,
    #[serde(default)]
    time_remaining_seconds: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TomlQuestion {
    #[serde(default)]
    id: Option<u64>,
    text: String,
    #[serde(rename = "type", default = "default_kind")]
    kind: String,
    #[serde(default)]
    options: Vec<String>,
    /// Option positions (1-based) already selected server-side.
    #[serde(default)]
    saved_options: Vec<u64>,
    #[serde(default)]
    saved_text: Option<String>,
}

fn default_kind() -> String {
    "single_choice".to_string()
}

/// A parsed fixture.
#[derive(Debug, Clone, PartialEq)]
pub struct Fixture {
    pub test_id: String,
    pub title: String,
    pub duration_minutes: Option<u64>,
    pub time_remaining_seconds: Option<u64>,
    pub questions: Vec<Question>,
    /// Answers the backend starts out holding.
    pub saved_answers: Vec<AnswerPayload>,
}

impl Fixture {
    /// An in-memory backend serving this fixture.
    pub fn into_backend(self) -> MockBackend {
        let mut backend = MockBackend::new(self.questions);
        if let Some(minutes) = self.duration_minutes {
            backend = backend.with_duration_minutes(minutes);
        }
        if let Some(seconds) = self.time_remaining_seconds {
            backend = backend.with_time_remaining(seconds);
        }
        for answer in self.saved_answers {
            backend.preload_answer(answer);
        }
        backend
    }
}

/// Load a fixture file.
pub fn load_fixture(path: &Path) -> Result<Fixture> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read fixture file: {}", path.display()))?;
    parse_fixture_str(&content, path)
}

/// Parse fixture TOML (useful for testing).
pub fn parse_fixture_str(content: &str, source_path: &Path) -> Result<Fixture> {
    let parsed: TomlFixture = toml::from_str(content)
        .with_context(|| format!("failed to parse TOML: {}", source_path.display()))?;

    if parsed.questions.is_empty() {
        anyhow::bail!("fixture {} has no questions", source_path.display());
    }

    let mut questions = Vec::with_capacity(parsed.questions.len());
    let mut saved_answers = Vec::new();
    for (index, q) in parsed.questions.into_iter().enumerate() {
        let ordinal = u32::try_from(index + 1).context("too many questions")?;
        let kind: QuestionType = q
            .kind
            .parse()
            .map_err(|e: String| anyhow::anyhow!("question {ordinal}: {e}"))?;
        let id = q.id.unwrap_or(u64::from(ordinal));

        if kind == QuestionType::Text && !q.options.is_empty() {
            anyhow::bail!("question {ordinal}: text questions cannot have options");
        }
        if kind != QuestionType::Text && q.options.is_empty() {
            anyhow::bail!("question {ordinal}: {kind} question needs options");
        }
        if let Some(bad) = q
            .saved_options
            .iter()
            .find(|&&n| n == 0 || n > q.options.len() as u64)
        {
            anyhow::bail!("question {ordinal}: saved option {bad} does not exist");
        }

        let options = q
            .options
            .into_iter()
            .zip(1..)
            .map(|(text, id)| QuestionOption { id, text })
            .collect();

        if !q.saved_options.is_empty() || q.saved_text.is_some() {
            saved_answers.push(AnswerPayload {
                question_id: id,
                selected_option_ids: q.saved_options,
                answer_text: q.saved_text.unwrap_or_default(),
            });
        }

        questions.push(Question {
            id,
            ordinal,
            kind,
            text: q.text,
            options,
        });
    }

    Ok(Fixture {
        test_id: parsed.test.id,
        title: parsed.test.title,
        duration_minutes: parsed.test.duration_minutes,
        time_remaining_seconds: parsed.test.time_remaining_seconds,
        questions,
        saved_answers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const VALID_TOML: &str = r#"
[test]
id = "rust-basics"
title = "Rust basics"
duration_minutes = 10

[[questions]]
text = "Which keyword declares an immutable binding?"
options = ["let", "mut", "const fn"]
saved_options = [1]

[[questions]]
type = "multiple_choice"
text = "Which types are Copy?"
options = ["u32", "String", "bool"]

[[questions]]
type = "text"
text = "What does the borrow checker enforce?"
"#;

    fn path() -> PathBuf {
        PathBuf::from("test.toml")
    }

    #[test]
    fn parses_valid_fixture() {
        let fixture = parse_fixture_str(VALID_TOML, &path()).unwrap();
        assert_eq!(fixture.test_id, "rust-basics");
        assert_eq!(fixture.duration_minutes, Some(10));
        assert_eq!(fixture.questions.len(), 3);
        assert_eq!(fixture.questions[0].kind, QuestionType::SingleChoice);
        assert_eq!(fixture.questions[1].kind, QuestionType::MultipleChoice);
        assert_eq!(fixture.questions[2].ordinal, 3);
        assert_eq!(fixture.questions[1].options[2].id, 3);
        assert_eq!(fixture.saved_answers.len(), 1);
        assert_eq!(fixture.saved_answers[0].selected_option_ids, vec![1]);
    }

    #[test]
    fn rejects_text_question_with_options() {
        let toml = r#"
[test]
id = "t"

[[questions]]
type = "text"
text = "Explain"
options = ["a"]
"#;
        let err = parse_fixture_str(toml, &path()).unwrap_err();
        assert!(err.to_string().contains("cannot have options"));
    }

    #[test]
    fn rejects_unknown_saved_option() {
        let toml = r#"
[test]
id = "t"

[[questions]]
text = "Pick"
options = ["a", "b"]
saved_options = [3]
"#;
        assert!(parse_fixture_str(toml, &path()).is_err());
    }

    #[test]
    fn rejects_empty_fixture() {
        assert!(parse_fixture_str("[test]\nid = \"t\"\n", &path()).is_err());
    }

    #[test]
    fn rejects_invalid_toml() {
        assert!(parse_fixture_str("not valid {{{{", &path()).is_err());
    }

    #[test]
    fn loads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("fixture.toml");
        std::fs::write(&file, VALID_TOML).unwrap();
        let fixture = load_fixture(&file).unwrap();
        assert_eq!(fixture.title, "Rust basics");
    }

    #[tokio::test]
    async fn backend_serves_saved_answers() {
        use crate::traits::AttemptBackend;

        let backend = parse_fixture_str(VALID_TOML, &path())
            .unwrap()
            .into_backend();
        let started = backend.start_attempt("rust-basics").await.unwrap();
        assert_eq!(started.initial_remaining_seconds(), Some(600));
        assert_eq!(
            started.current_answer.unwrap().selected_option_ids,
            vec![1]
        );
    }
}
