use crate::errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AppSettings {
    pub workspace_root: PathBuf,
    pub activity_log_path: PathBuf,
    /// SQLite store for activity and scheduled tasks. When set, activity is read
    /// from it instead of the JSON log and its tasks are served beside the
    /// scheduler jobs.
    #[serde(alias = "activityDbPath")]
    pub database_path: Option<PathBuf>,
    pub cron_jobs_path: PathBuf,
    pub bind_addr: String,
    pub base_url: String,
    pub activity_poll_ms: u64,
    pub tasks_poll_ms: u64,
    pub activity_limit: usize,
    pub search_debounce_ms: u64,
    pub search_min_chars: usize,
    pub search_memory_cap: usize,
    pub search_task_cap: usize,
    pub request_timeout_ms: u64,
    pub log_dir: Option<PathBuf>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("."),
            activity_log_path: PathBuf::from("memory/activity_log.json"),
            database_path: None,
            cron_jobs_path: PathBuf::from("state/cron_jobs.json"),
            bind_addr: "127.0.0.1:4310".to_string(),
            base_url: "http://127.0.0.1:4310".to_string(),
            activity_poll_ms: 5_000,
            tasks_poll_ms: 60_000,
            activity_limit: 25,
            search_debounce_ms: 300,
            search_min_chars: 2,
            search_memory_cap: 20,
            search_task_cap: 10,
            request_timeout_ms: 10_000,
            log_dir: None,
        }
    }
}

impl AppSettings {
    /// Loads settings from `path`. A missing file yields the defaults. The result
    /// is validated either way.
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        let settings = match path {
            Some(path) if path.exists() => {
                let raw = fs::read_to_string(path)?;
                serde_json::from_str::<Self>(&raw)
                    .map_err(|error| AppError::Config(format!("{}: {}", path.display(), error)))?
            }
            Some(path) => {
                tracing::info!(path = %path.display(), "settings file not found, using defaults");
                Self::default()
            }
            None => Self::default(),
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.activity_poll_ms == 0 || self.tasks_poll_ms == 0 {
            return Err(AppError::Config("poll intervals must be greater than zero".to_string()));
        }
        if self.activity_limit == 0 {
            return Err(AppError::Config("activityLimit must be greater than zero".to_string()));
        }
        if self.request_timeout_ms == 0 {
            return Err(AppError::Config("requestTimeoutMs must be greater than zero".to_string()));
        }
        if self.bind_addr.trim().is_empty() {
            return Err(AppError::Config("bindAddr cannot be empty".to_string()));
        }
        Ok(())
    }

    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace_root.join(path)
        }
    }

    pub fn activity_log(&self) -> PathBuf {
        self.resolve(&self.activity_log_path)
    }

    pub fn database(&self) -> Option<PathBuf> {
        self.database_path.as_deref().map(|path| self.resolve(path))
    }

    pub fn cron_jobs(&self) -> PathBuf {
        self.resolve(&self.cron_jobs_path)
    }

    pub fn activity_interval(&self) -> Duration {
        Duration::from_millis(self.activity_poll_ms)
    }

    pub fn tasks_interval(&self) -> Duration {
        Duration::from_millis(self.tasks_poll_ms)
    }

    pub fn search_debounce(&self) -> Duration {
        Duration::from_millis(self.search_debounce_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
