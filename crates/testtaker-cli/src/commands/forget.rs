//! The `testtaker forget` command.

use std::path::PathBuf;

use anyhow::Result;

use testtaker_backend::config::load_config_from;
use testtaker_core::traits::ResumeStore;
use testtaker_store::FileResumeStore;

pub fn execute(test_id: String, config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config_from(config_path.as_deref())?;
    let store = FileResumeStore::new(config.resume_store_path());

    if store.get(&test_id)?.is_none() {
        println!("No attempt recorded for {test_id}");
        return Ok(());
    }
    store.clear(&test_id)?;
    println!("Forgot attempt for {test_id}");
    Ok(())
}
