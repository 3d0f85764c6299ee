//! Engine configuration, sourced from the environment with builder
//! overrides.

use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::model::bundle::BundleLimits;
use crate::scheduler::SchedulerConfig;

/// Top-level engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// SQLite database path, or ":memory:" for ephemeral runs
    pub database_url: String,
    /// Directory for uploaded artifacts
    pub upload_dir: PathBuf,
    /// Per-file upload ceiling in bytes
    pub max_file_size: usize,
    /// Total bundle ceiling in bytes
    pub max_total_size: usize,
    /// Artifact count ceiling per bundle
    pub max_files: usize,
    /// Worker pool size
    pub concurrency_limit: usize,
    /// Hard per-session deadline in seconds
    pub session_deadline_secs: u64,
    /// Anthropic API key, first in the provider order when present
    pub anthropic_api_key: Option<String>,
    /// OpenAI API key, used for failover (or primary when alone)
    pub openai_api_key: Option<String>,
    /// HTTP bind host
    pub host: String,
    /// HTTP bind port
    pub port: u16,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: "mve.db".to_string(),
            upload_dir: PathBuf::from("uploads"),
            max_file_size: 10 * 1024 * 1024,
            max_total_size: 100 * 1024 * 1024,
            max_files: 50,
            concurrency_limit: 32,
            session_deadline_secs: 30 * 60,
            anthropic_api_key: None,
            openai_api_key: None,
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match env_var(name) {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| Error::Config(format!("invalid value for {name}: {raw}"))),
    }
}

impl EngineConfig {
    /// Load configuration from the environment, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(url) = env_var("DATABASE_URL") {
            config.database_url = url;
        }
        if let Some(dir) = env_var("UPLOAD_DIR") {
            config.upload_dir = PathBuf::from(dir);
        }
        if let Some(size) = env_parse("MAX_FILE_SIZE")? {
            config.max_file_size = size;
        }
        if let Some(size) = env_parse("MAX_TOTAL_SIZE")? {
            config.max_total_size = size;
        }
        if let Some(limit) = env_parse("ASYNC_CONCURRENCY_LIMIT")? {
            config.concurrency_limit = limit;
        }
        if let Some(secs) = env_parse("SESSION_DEADLINE_SECONDS")? {
            config.session_deadline_secs = secs;
        }
        config.anthropic_api_key = env_var("LLM_ANTHROPIC_API_KEY");
        config.openai_api_key = env_var("LLM_OPENAI_API_KEY");
        if let Some(host) = env_var("MVE_HOST") {
            config.host = host;
        }
        if let Some(port) = env_parse("MVE_PORT")? {
            config.port = port;
        }

        Ok(config)
    }

    pub fn bundle_limits(&self) -> BundleLimits {
        BundleLimits {
            max_total_bytes: self.max_total_size,
            max_file_bytes: self.max_file_size,
            max_files: self.max_files,
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            worker_count: self.concurrency_limit,
            session_deadline: std::time::Duration::from_secs(self.session_deadline_secs),
            ..SchedulerConfig::default()
        }
    }
}
