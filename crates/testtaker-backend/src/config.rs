//! Client configuration and backend factory.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use testtaker_core::controller::SessionConfig;
use testtaker_core::navigation::DEFAULT_PAGE_SIZE;
use testtaker_core::traits::AttemptBackend;

use crate::http::{HttpBackend, DEFAULT_TIMEOUT_SECS};

/// Top-level testtaker configuration.
///
/// Note: Custom Debug impl masks the API token to keep it out of logs.
#[derive(Clone, Serialize, Deserialize)]
pub struct TesttakerConfig {
    /// Root URL of the test-taking API.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Bearer token sent with every request.
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,
    /// Questions per page.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Countdown tick length in milliseconds.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    /// Where resume pointers are kept.
    #[serde(default)]
    pub resume_store: Option<PathBuf>,
}

impl std::fmt::Debug for TesttakerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TesttakerConfig")
            .field("base_url", &self.base_url)
            .field("api_token", &self.api_token.as_ref().map(|_| "***"))
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("page_size", &self.page_size)
            .field("tick_interval_ms", &self.tick_interval_ms)
            .field("resume_store", &self.resume_store)
            .finish()
    }
}

fn default_base_url() -> String {
    "http://localhost:8080/api".to_string()
}
fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}
fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}
fn default_tick_interval() -> u64 {
    1000
}

impl Default for TesttakerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_token: None,
            request_timeout_secs: default_timeout(),
            page_size: default_page_size(),
            tick_interval_ms: default_tick_interval(),
            resume_store: None,
        }
    }
}

impl TesttakerConfig {
    /// Session tunables derived from this configuration.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            page_size: self.page_size,
            tick_interval: Duration::from_millis(self.tick_interval_ms.max(1)),
        }
    }

    /// The resume store file, falling back to
    /// `~/.config/testtaker/attempts.json`, then to the working directory.
    pub fn resume_store_path(&self) -> PathBuf {
        self.resume_store
            .clone()
            .or_else(|| dirs_path().map(|d| d.join("attempts.json")))
            .unwrap_or_else(|| PathBuf::from(".testtaker-attempts.json"))
    }
}

/// Resolve environment variable references like `${VAR_NAME}` in a string.
fn resolve_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    while let Some(start) = result.find("${") {
        if let Some(end) = result[start..].find('}') {
            let var_name = &result[start + 2..start + end];
            let value = std::env::var(var_name).unwrap_or_default();
            result = format!(
                "{}{}{}",
                &result[..start],
                value,
                &result[start + end + 1..]
            );
        } else {
            break;
        }
    }
    result
}

/// Load configuration from well-known paths.
///
/// Search order:
/// 1. `testtaker.toml` in the current directory
/// 2. `~/.config/testtaker/config.toml`
///
/// Environment variable overrides: `TESTTAKER_BASE_URL`, `TESTTAKER_API_TOKEN`.
pub fn load_config() -> Result<TesttakerConfig> {
    load_config_from(None)
}

/// Load config from an explicit path, or search the default locations.
pub fn load_config_from(path: Option<&Path>) -> Result<TesttakerConfig> {
    let config_path = if let Some(p) = path {
        if p.exists() {
            Some(p.to_path_buf())
        } else {
            anyhow::bail!("config file not found: {}", p.display());
        }
    } else {
        let local = PathBuf::from("testtaker.toml");
        if local.exists() {
            Some(local)
        } else {
            dirs_path()
                .map(|home| home.join("config.toml"))
                .filter(|global| global.exists())
        }
    };

    let config = match config_path {
        Some(path) => {
            tracing::debug!("loading config from {}", path.display());
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config: {}", path.display()))?;
            toml::from_str::<TesttakerConfig>(&content)
                .with_context(|| format!("failed to parse config: {}", path.display()))?
        }
        None => TesttakerConfig::default(),
    };

    Ok(apply_env(config))
}

/// Apply env var overrides, then expand `${VAR}` references.
fn apply_env(mut config: TesttakerConfig) -> TesttakerConfig {
    if let Ok(url) = std::env::var("TESTTAKER_BASE_URL") {
        config.base_url = url;
    }
    if let Ok(token) = std::env::var("TESTTAKER_API_TOKEN") {
        config.api_token = Some(token);
    }

    config.base_url = resolve_env_vars(&config.base_url);
    config.api_token = config
        .api_token
        .as_deref()
        .map(resolve_env_vars)
        .filter(|t| !t.is_empty());
    config
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".config").join("testtaker"))
}

/// Create the HTTP backend described by `config`.
pub fn create_backend(config: &TesttakerConfig) -> Result<Arc<dyn AttemptBackend>> {
    let backend = HttpBackend::new(
        &config.base_url,
        config.api_token.clone(),
        Duration::from_secs(config.request_timeout_secs),
    )
    .with_context(|| format!("cannot use backend at {}", config.base_url))?;
    Ok(Arc::new(backend))
}
