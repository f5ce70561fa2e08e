//! testtaker-store — durable resumption pointers.
//!
//! [`FileResumeStore`] keeps the test id → attempt id map in a small JSON
//! file so an attempt can be picked up again after the process restarts.
//! Every write replaces the file atomically through a temporary file in
//! the same directory.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use testtaker_core::traits::ResumeStore;

#[derive(Debug, Default, Serialize, Deserialize)]
struct PointerFile {
    #[serde(default)]
    attempts: BTreeMap<String, String>,
}

/// Resume store backed by a JSON file.
pub struct FileResumeStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl FileResumeStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All stored pointers, ordered by test id.
    pub fn entries(&self) -> Result<Vec<(String, String)>> {
        Ok(self.read()?.attempts.into_iter().collect())
    }

    fn read(&self) -> Result<PointerFile> {
        if !self.path.exists() {
            return Ok(PointerFile::default());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read resume store: {}", self.path.display()))?;
        if content.trim().is_empty() {
            return Ok(PointerFile::default());
        }
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse resume store: {}", self.path.display()))
    }

    fn write(&self, file: &PointerFile) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create directory: {}", dir.display()))?;

        let json = serde_json::to_string_pretty(file)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)
            .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
        tmp.write_all(json.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }

    fn update(&self, apply: impl FnOnce(&mut BTreeMap<String, String>) -> bool) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut file = self.read()?;
        if apply(&mut file.attempts) {
            self.write(&file)?;
        }
        Ok(())
    }
}

impl ResumeStore for FileResumeStore {
    fn get(&self, test_id: &str) -> Result<Option<String>> {
        Ok(self.read()?.attempts.remove(test_id))
    }

    fn set(&self, test_id: &str, attempt_id: &str) -> Result<()> {
        tracing::debug!(test_id, attempt_id, "recording resume pointer");
        self.update(|attempts| {
            let previous = attempts.insert(test_id.to_string(), attempt_id.to_string());
            previous.as_deref() != Some(attempt_id)
        })
    }

    fn clear(&self, test_id: &str) -> Result<()> {
        tracing::debug!(test_id, "clearing resume pointer");
        self.update(|attempts| attempts.remove(test_id).is_some())
    }
}
