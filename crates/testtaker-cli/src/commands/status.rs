//! The `testtaker status` command.

use std::path::PathBuf;

use anyhow::{Context, Result};
use comfy_table::{Cell, Table};

use testtaker_backend::config::{create_backend, load_config_from};
use testtaker_core::traits::ResumeStore;
use testtaker_store::FileResumeStore;

pub async fn execute(test_id: Option<String>, config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config_from(config_path.as_deref())?;
    let store = FileResumeStore::new(config.resume_store_path());

    let Some(test_id) = test_id else {
        let entries = store.entries()?;
        if entries.is_empty() {
            println!("No attempts recorded.");
            return Ok(());
        }
        let mut table = Table::new();
        table.set_header(vec!["Test", "Attempt"]);
        for (test, attempt) in &entries {
            table.add_row(vec![Cell::new(test), Cell::new(attempt)]);
        }
        println!("{table}");
        return Ok(());
    };

    let Some(attempt_id) = store.get(&test_id)? else {
        println!("No attempt recorded for {test_id}");
        return Ok(());
    };

    let backend = create_backend(&config)?;
    let status = backend
        .attempt_status(&attempt_id)
        .await
        .with_context(|| format!("could not fetch status of attempt {attempt_id}"))?;

    let answered = if status.answered_questions.is_empty() {
        "none".to_string()
    } else {
        status
            .answered_questions
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    };
    let remaining = status
        .time_remaining_seconds
        .map(|s| format!("{}:{:02}", s / 60, s % 60))
        .unwrap_or_else(|| "untimed".to_string());

    let mut table = Table::new();
    table.set_header(vec!["Field", "Value"]);
    table.add_row(vec![Cell::new("Test"), Cell::new(&test_id)]);
    table.add_row(vec![Cell::new("Attempt"), Cell::new(&status.attempt_id)]);
    table.add_row(vec![Cell::new("Status"), Cell::new(format!("{:?}", status.status))]);
    table.add_row(vec![
        Cell::new("Question"),
        Cell::new(format!(
            "{}/{}",
            status.current_question_number, status.total_questions
        )),
    ]);
    table.add_row(vec![Cell::new("Answered"), Cell::new(answered)]);
    table.add_row(vec![Cell::new("Remaining"), Cell::new(remaining)]);
    println!("{table}");

    if !status.status.is_open() {
        println!("This attempt is closed; `testtaker forget --test-id {test_id}` clears it.");
    }
    Ok(())
}
