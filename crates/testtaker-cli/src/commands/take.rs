//! The `testtaker take` command.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;

use testtaker_backend::config::{create_backend, load_config_from};
use testtaker_core::controller::AttemptController;
use testtaker_store::FileResumeStore;

use super::session::{self, ConsoleObserver};

pub async fn execute(test_id: String, config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config_from(config_path.as_deref())?;
    tracing::debug!(?config, "configuration loaded");

    let backend = create_backend(&config)?;
    let store = Arc::new(FileResumeStore::new(config.resume_store_path()));
    let observer = Arc::new(ConsoleObserver::new());

    let controller = AttemptController::new(
        backend,
        store,
        observer.clone(),
        config.session_config(),
    );

    println!("Connecting to {}", config.base_url);
    session::run(
        &controller,
        &observer,
        &test_id,
        tokio::io::BufReader::new(tokio::io::stdin()),
    )
    .await
}
