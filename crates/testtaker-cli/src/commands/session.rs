//! Interactive attempt loop shared by `take` and `demo`.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::Notify;

use testtaker_core::controller::{AttemptController, NavigationOutcome, SessionSnapshot};
use testtaker_core::gate::SubmitOutcome;
use testtaker_core::model::{NavTarget, Question, QuestionType, SessionStatus};
use testtaker_core::observer::{SessionObserver, SessionWarning};
use testtaker_core::traits::AttemptResult;

/// Remaining-time values worth announcing.
const ANNOUNCE_AT: [u64; 6] = [300, 60, 30, 10, 5, 1];

const HELP: &str = "\
Commands:
  n          next question
  p          previous question
  g N        go to question N
  o ID       toggle option ID
  t TEXT     set the text answer
  s          submit (asks about unanswered questions)
  s!         submit without asking
  i          show attempt info
  h          show this help
  q          quit (the attempt can be resumed later)";

/// Prints session events to the terminal.
#[derive(Default)]
pub struct ConsoleObserver {
    finished: Notify,
}

impl ConsoleObserver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionObserver for ConsoleObserver {
    fn on_question(&self, question_number: u32, question: &Question) {
        tracing::debug!(question_number, question_id = question.id, "question shown");
    }

    fn on_warning(&self, warning: &SessionWarning) {
        println!("! {warning}");
    }

    fn on_tick(&self, remaining_secs: u64) {
        if ANNOUNCE_AT.contains(&remaining_secs) {
            println!("[{remaining_secs}s remaining]");
        }
    }

    fn on_expired(&self) {
        println!("Time is up. Submitting your answers...");
    }

    fn on_completed(&self, result: &AttemptResult) {
        print_result(result);
        self.finished.notify_one();
    }
}

/// Start the attempt and run commands from `input` until the attempt is
/// submitted, the student quits, or input ends.
pub async fn run<R>(
    controller: &AttemptController,
    observer: &Arc<ConsoleObserver>,
    test_id: &str,
    input: R,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let snapshot = controller
        .start(test_id)
        .await
        .with_context(|| format!("could not open test {test_id}"))?;
    if snapshot.resumed {
        println!("Resuming attempt {}", snapshot.attempt_id.as_deref().unwrap_or("-"));
    }
    if let Some(secs) = snapshot.remaining_seconds {
        println!("Time limit: {}", format_duration(secs));
    }
    print_question(&snapshot);
    println!("Type h for help.");

    let mut lines = input.lines();
    loop {
        if controller.status() == SessionStatus::Completed {
            break;
        }
        let line = tokio::select! {
            _ = observer.finished.notified() => break,
            line = lines.next_line() => line.context("failed to read input")?,
        };
        let Some(line) = line else {
            println!("Input closed; the attempt can be resumed later.");
            break;
        };
        if !handle(controller, line.trim()).await {
            break;
        }
    }

    controller.dispose();
    Ok(())
}

/// Run one command. Returns `false` when the loop should stop.
async fn handle(controller: &AttemptController, line: &str) -> bool {
    let (command, arg) = match line.split_once(char::is_whitespace) {
        Some((c, rest)) => (c, rest.trim()),
        None => (line, ""),
    };

    match command {
        "" => {}
        "n" | "next" => navigate(controller, NavTarget::Next).await,
        "p" | "prev" => navigate(controller, NavTarget::Previous).await,
        "g" | "go" => match arg.parse::<u32>() {
            Ok(n) => navigate(controller, NavTarget::Jump(n)).await,
            Err(_) => println!("usage: g N"),
        },
        "o" | "opt" => match arg.parse() {
            Ok(id) => match controller.select_option(id) {
                Ok(()) => print_answer(&controller.snapshot()),
                Err(e) => println!("! {e}"),
            },
            Err(_) => println!("usage: o ID"),
        },
        "t" | "text" => match controller.set_text(arg) {
            Ok(()) => println!("Answer recorded."),
            Err(e) => println!("! {e}"),
        },
        "s" => return submit(controller, false).await,
        "s!" => return submit(controller, true).await,
        "i" | "info" => print_info(&controller.snapshot()),
        "h" | "help" | "?" => println!("{HELP}"),
        "q" | "quit" => {
            println!("Leaving; the attempt can be resumed later.");
            return false;
        }
        other => println!("unknown command {other:?}; type h for help"),
    }
    true
}

async fn navigate(controller: &AttemptController, target: NavTarget) {
    match controller.navigate(target).await {
        Ok(NavigationOutcome::Moved { .. }) => print_question(&controller.snapshot()),
        Ok(NavigationOutcome::Unchanged) => println!("Already there."),
        Ok(NavigationOutcome::Discarded) => {}
        Err(e) => println!("! {e}"),
    }
}

async fn submit(controller: &AttemptController, confirmed: bool) -> bool {
    match controller.submit(confirmed).await {
        Ok(SubmitOutcome::ConfirmationRequired { unanswered }) => {
            println!("Unanswered questions: {}", join(&unanswered));
            println!("Type s! to submit anyway.");
            true
        }
        // The observer prints the result.
        Ok(SubmitOutcome::Completed(_)) => false,
        Err(e) => {
            println!("! {e}");
            !matches!(
                e,
                testtaker_core::error::SubmissionError::Disposed
                    | testtaker_core::error::SubmissionError::NotInProgress(_)
            )
        }
    }
}

fn print_question(snapshot: &SessionSnapshot) {
    let Some(question) = &snapshot.question else {
        return;
    };
    println!();
    println!(
        "Question {}/{} [{}] (page {}/{})",
        snapshot.current_question_number,
        snapshot.total_questions,
        question.kind,
        snapshot.page,
        snapshot.page_count
    );
    println!("  {}", question.text);
    print_answer(snapshot);
}

fn print_answer(snapshot: &SessionSnapshot) {
    let (Some(question), Some(answer)) = (&snapshot.question, &snapshot.answer) else {
        return;
    };
    match question.kind {
        QuestionType::Text => {
            if answer.answer_text.is_empty() {
                println!("  (no answer yet; use t TEXT)");
            } else {
                println!("  > {}", answer.answer_text);
            }
        }
        _ => {
            for option in &question.options {
                let mark = if answer.selected_option_ids.contains(&option.id) {
                    "x"
                } else {
                    " "
                };
                println!("   [{mark}] {}. {}", option.id, option.text);
            }
        }
    }
}

fn print_info(snapshot: &SessionSnapshot) {
    println!("Attempt:    {}", snapshot.attempt_id.as_deref().unwrap_or("-"));
    println!("Status:     {}", snapshot.status);
    println!(
        "Question:   {}/{}",
        snapshot.current_question_number, snapshot.total_questions
    );
    println!("Answered:   {}", join(&snapshot.answered));
    println!("Unanswered: {}", join(&snapshot.unanswered));
    match snapshot.remaining_seconds {
        Some(secs) => println!("Remaining:  {}", format_duration(secs)),
        None => println!("Remaining:  untimed"),
    }
}

fn print_result(result: &AttemptResult) {
    println!();
    println!(
        "Submitted. Answered {} of {} questions.",
        result.answered_questions, result.total_questions
    );
    if let (Some(score), Some(max)) = (result.score, result.max_score) {
        println!("Score: {score} / {max}");
    }
}

fn join(numbers: &[u32]) -> String {
    if numbers.is_empty() {
        return "none".to_string();
    }
    numbers
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_duration(secs: u64) -> String {
    format!("{}:{:02}", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_minutes_and_seconds() {
        assert_eq!(format_duration(600), "10:00");
        assert_eq!(format_duration(65), "1:05");
        assert_eq!(format_duration(0), "0:00");
    }

    #[test]
    fn joins_question_numbers() {
        assert_eq!(join(&[]), "none");
        assert_eq!(join(&[2, 3]), "2, 3");
    }
}
