//! The `testtaker demo` command: an offline attempt served from a fixture.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use testtaker_core::controller::{AttemptController, SessionConfig};
use testtaker_core::fixture::load_fixture;
use testtaker_core::mock::MemoryResumeStore;

use super::session::{self, ConsoleObserver};

pub async fn execute(fixture_path: PathBuf, tick_ms: u64, page_size: u32) -> Result<()> {
    let fixture = load_fixture(&fixture_path)?;
    let test_id = fixture.test_id.clone();
    if fixture.title.is_empty() {
        println!("Test: {test_id} ({} questions)", fixture.questions.len());
    } else {
        println!("Test: {} ({} questions)", fixture.title, fixture.questions.len());
    }

    let backend = Arc::new(fixture.into_backend());
    let observer = Arc::new(ConsoleObserver::new());
    let controller = AttemptController::new(
        backend,
        Arc::new(MemoryResumeStore::new()),
        observer.clone(),
        SessionConfig {
            page_size: page_size.max(1),
            tick_interval: Duration::from_millis(tick_ms.max(1)),
        },
    );

    session::run(
        &controller,
        &observer,
        &test_id,
        tokio::io::BufReader::new(tokio::io::stdin()),
    )
    .await
}
