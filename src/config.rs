//! Configuration types for fare-crawler

use crate::error::{Error, Result};
use crate::types::TaskDefinition;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::Path, path::PathBuf, time::Duration};

/// Task execution settings (concurrency, batch timeout)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Maximum number of tasks executing at once (default: 4)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_tasks: usize,

    /// How long a batch may run before the caller stops waiting, in minutes (default: 30)
    #[serde(default = "default_task_timeout_minutes")]
    pub task_timeout: u64,

    /// Back-off between admission attempts when all permits are taken (default: 0.5 seconds)
    #[serde(default = "default_poll_interval", with = "duration_serde")]
    pub poll_interval: Duration,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent(),
            task_timeout: default_task_timeout_minutes(),
            poll_interval: default_poll_interval(),
        }
    }
}

/// Retry behavior for failed tasks
///
/// A failure is retried when its error kind is listed in `retry_on_errors`
/// and the task has been retried fewer than `max_attempts` times. The delay
/// before the n-th retry (counting from 0) is `interval * backoff_factor^n`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Error kinds eligible for retry (default: ConnectionError, Timeout)
    #[serde(default = "default_retry_on_errors")]
    pub retry_on_errors: Vec<String>,

    /// Maximum number of retries per task (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay before the first retry (default: 5 seconds)
    #[serde(default = "default_retry_interval", with = "duration_serde")]
    pub interval: Duration,

    /// Multiplier applied per retry already taken (default: 2.0)
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// Stretch each delay by a random factor in [1, 2] (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retry_on_errors: default_retry_on_errors(),
            max_attempts: default_max_attempts(),
            interval: default_retry_interval(),
            backoff_factor: default_backoff_factor(),
            jitter: false,
        }
    }
}

/// Search API endpoint settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the travel-agency API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Path of the fare search endpoint, joined onto `base_url`
    #[serde(default = "default_search_endpoint")]
    pub search_endpoint: String,

    /// Extra request headers
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Request timeout (default: 30 seconds)
    #[serde(default = "default_api_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            search_endpoint: default_search_endpoint(),
            headers: HashMap::new(),
            timeout: default_api_timeout(),
        }
    }
}

/// Where fares are persisted
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for JSON blobs (default: "./data/blobs")
    #[serde(default = "default_blob_dir")]
    pub blob_dir: PathBuf,

    /// SQLite database for fare rows (default: "./data/fares.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            blob_dir: default_blob_dir(),
            database_path: default_database_path(),
        }
    }
}

/// Inputs for the task-list generators
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Tasks used as-is
    #[serde(default)]
    pub flight_tasks: Vec<TaskDefinition>,

    /// Route templates expanded for a fixed day range of a future month
    #[serde(default)]
    pub fixed_month: Vec<TaskDefinition>,

    /// Route templates expanded around the public holidays of a future month
    #[serde(default)]
    pub holidays: Vec<TaskDefinition>,

    /// Base URL of the yearly holiday calendar (`{url}/{year}.json`)
    #[serde(default = "default_holiday_calendar_url")]
    pub holiday_calendar_url: String,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            flight_tasks: Vec::new(),
            fixed_month: Vec::new(),
            holidays: Vec::new(),
            holiday_calendar_url: default_holiday_calendar_url(),
        }
    }
}

/// Main configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Task execution settings
    #[serde(default)]
    pub task: TaskConfig,

    /// Retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Search API settings
    #[serde(default)]
    pub api: ApiConfig,

    /// Persistence settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Task-list generator inputs
    #[serde(default)]
    pub planner: PlannerConfig,
}

impl Config {
    /// Load and validate a YAML configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::config(
                "path",
                format!("failed to read config file '{}': {}", path.display(), e),
            )
        })?;
        Self::from_yaml(&contents)
    }

    /// Parse and validate a YAML document
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot honor
    pub fn validate(&self) -> Result<()> {
        if self.task.max_concurrent_tasks == 0 {
            return Err(Error::config(
                "task.max_concurrent_tasks",
                "must be at least 1",
            ));
        }
        if self.task.poll_interval.is_zero() {
            return Err(Error::config("task.poll_interval", "must be positive"));
        }
        if !self.retry.backoff_factor.is_finite() || self.retry.backoff_factor < 1.0 {
            return Err(Error::config(
                "retry.backoff_factor",
                format!("must be a finite number >= 1.0, got {}", self.retry.backoff_factor),
            ));
        }
        if url::Url::parse(&self.api.base_url).is_err() {
            return Err(Error::config(
                "api.base_url",
                format!("'{}' is not a valid URL", self.api.base_url),
            ));
        }
        Ok(())
    }

    /// How long `run_batch` waits for its tasks
    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.task.task_timeout.saturating_mul(60))
    }
}

fn default_max_concurrent() -> usize {
    4
}

fn default_task_timeout_minutes() -> u64 {
    30
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_retry_on_errors() -> Vec<String> {
    vec!["ConnectionError".to_string(), "Timeout".to_string()]
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_base_url() -> String {
    "https://travel.example.com".to_string()
}

fn default_search_endpoint() -> String {
    "/api/flight/search".to_string()
}

fn default_api_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_blob_dir() -> PathBuf {
    PathBuf::from("./data/blobs")
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./data/fares.db")
}

fn default_holiday_calendar_url() -> String {
    "https://cdn.jsdelivr.net/gh/ruyut/TaiwanCalendar/data".to_string()
}

// Durations are written as (fractional) seconds
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
