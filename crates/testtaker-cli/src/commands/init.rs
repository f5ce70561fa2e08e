//! The `testtaker init` command.

use anyhow::Result;

pub fn execute() -> Result<()> {
    if std::path::Path::new("testtaker.toml").exists() {
        println!("testtaker.toml already exists, skipping.");
    } else {
        std::fs::write("testtaker.toml", SAMPLE_CONFIG)?;
        println!("Created testtaker.toml");
    }

    std::fs::create_dir_all("fixtures")?;
    let fixture_path = std::path::Path::new("fixtures/sample.toml");
    if fixture_path.exists() {
        println!("fixtures/sample.toml already exists, skipping.");
    } else {
        std::fs::write(fixture_path, SAMPLE_FIXTURE)?;
        println!("Created fixtures/sample.toml");
    }

    println!("\nNext steps:");
    println!("  1. Try it offline: testtaker demo --fixture fixtures/sample.toml");
    println!("  2. Edit testtaker.toml with your server URL and token");
    println!("  3. Run: testtaker take --test-id <TEST>");

    Ok(())
}

const SAMPLE_CONFIG: &str = r#"# testtaker configuration

base_url = "http://localhost:8080/api"
api_token = "${TESTTAKER_API_TOKEN}"
request_timeout_secs = 30

# Questions per page
page_size = 1
# Countdown tick length
tick_interval_ms = 1000

# resume_store = "~/.config/testtaker/attempts.json"
"#;

const SAMPLE_FIXTURE: &str = r#"[test]
id = "sample"
title = "Sample test"
duration_minutes = 5

[[questions]]
text = "Which keyword declares a mutable binding?"
options = ["let", "let mut", "static"]

[[questions]]
type = "multiple_choice"
text = "Which of these are integer types?"
options = ["u8", "f32", "i64", "char"]

[[questions]]
type = "text"
text = "Name the tool that builds Rust projects."
"#;
