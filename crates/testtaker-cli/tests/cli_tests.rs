//! CLI integration tests using assert_cmd.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const FIXTURE: &str = "../../fixtures/rust-basics.toml";

fn testtaker() -> Command {
    #[allow(deprecated)]
    Command::cargo_bin("testtaker").unwrap()
}

/// A temp dir holding a config whose resume store lives next to it.
fn workspace(pointers: Option<&str>) -> TempDir {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("testtaker.toml"),
        "base_url = \"http://127.0.0.1:9/api\"\nresume_store = \"attempts.json\"\n",
    )
    .unwrap();
    if let Some(json) = pointers {
        std::fs::write(dir.path().join("attempts.json"), json).unwrap();
    }
    dir
}

#[test]
fn demo_answers_and_submits() {
    testtaker()
        .args(["demo", "--fixture", FIXTURE])
        .write_stdin("o 1\nn\nt data races\ns!\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Question 1/4"))
        .stdout(predicate::str::contains("[x] 1. let"))
        .stdout(predicate::str::contains("Question 2/4"))
        .stdout(predicate::str::contains("Submitted. Answered 3 of 4"));
}

#[test]
fn demo_submit_asks_about_unanswered() {
    testtaker()
        .args(["demo", "--fixture", FIXTURE])
        .write_stdin("s\nq\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Unanswered questions: 1, 2, 3, 4"))
        .stdout(predicate::str::contains("Type s! to submit anyway."))
        .stdout(predicate::str::contains("Submitted").not());
}

#[test]
fn demo_reports_bad_commands_without_exiting() {
    testtaker()
        .args(["demo", "--fixture", FIXTURE])
        .write_stdin("g 99\no 42\nt words\nbogus\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("out of range"))
        .stdout(predicate::str::contains("unknown command"))
        .stdout(predicate::str::contains("Input closed"));
}

#[test]
fn demo_nonexistent_fixture() {
    testtaker()
        .args(["demo", "--fixture", "/nonexistent/path.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn demo_invalid_fixture() {
    let dir = TempDir::new().unwrap();
    let bad = dir.path().join("bad.toml");
    std::fs::write(&bad, "[test]\nid = \"x\"\n").unwrap();

    testtaker()
        .args(["demo", "--fixture"])
        .arg(&bad)
        .assert()
        .failure()
        .stderr(predicate::str::contains("no questions"));
}

#[test]
fn status_lists_recorded_attempts() {
    let dir = workspace(Some(r#"{"attempts": {"rust-basics": "att-7"}}"#));
    testtaker()
        .current_dir(dir.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("rust-basics"))
        .stdout(predicate::str::contains("att-7"));
}

#[test]
fn status_without_attempts() {
    let dir = workspace(None);
    testtaker()
        .current_dir(dir.path())
        .args(["status", "--test-id", "rust-basics"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No attempt recorded for rust-basics"));
}

#[test]
fn forget_clears_pointer() {
    let dir = workspace(Some(r#"{"attempts": {"rust-basics": "att-7", "other": "att-8"}}"#));
    testtaker()
        .current_dir(dir.path())
        .args(["forget", "--test-id", "rust-basics"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Forgot attempt for rust-basics"));

    let remaining = std::fs::read_to_string(dir.path().join("attempts.json")).unwrap();
    assert!(!remaining.contains("rust-basics"));
    assert!(remaining.contains("att-8"));

    testtaker()
        .current_dir(dir.path())
        .args(["forget", "--test-id", "rust-basics"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No attempt recorded"));
}

#[test]
fn missing_config_file_fails() {
    testtaker()
        .args(["status", "--config", "/nonexistent/testtaker.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("config file not found"));
}

#[test]
fn init_creates_files() {
    let dir = TempDir::new().unwrap();
    testtaker()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Created testtaker.toml"))
        .stdout(predicate::str::contains("Created fixtures/sample.toml"));

    assert!(dir.path().join("testtaker.toml").exists());
    assert!(dir.path().join("fixtures/sample.toml").exists());
}

#[test]
fn init_skips_existing_files() {
    let dir = TempDir::new().unwrap();
    testtaker().current_dir(dir.path()).arg("init").assert().success();
    testtaker()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("already exists, skipping"));
}

#[test]
fn init_fixture_runs_in_demo() {
    let dir = TempDir::new().unwrap();
    testtaker().current_dir(dir.path()).arg("init").assert().success();
    testtaker()
        .current_dir(dir.path())
        .args(["demo", "--fixture", "fixtures/sample.toml"])
        .write_stdin("s!\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Submitted. Answered 0 of 3"));
}

#[test]
fn help_output() {
    testtaker()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("take"))
        .stdout(predicate::str::contains("demo"))
        .stdout(predicate::str::contains("forget"));
}
