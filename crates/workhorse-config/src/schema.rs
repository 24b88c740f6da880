//! Configuration schema definitions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::ConfigError;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub queue: QueueSection,

    #[serde(default)]
    pub worker: WorkerSection,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Jobs added when the queue starts.
    #[serde(default)]
    pub jobs: Vec<SeedJob>,
}

/// `[queue]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSection {
    /// Queue name.
    #[serde(default = "default_queue_name")]
    pub name: String,

    /// Maximum stacktrace entries kept per job (0 = unlimited).
    #[serde(default = "default_stacktrace_limit")]
    pub stacktrace_limit: usize,

    /// Per-subscriber event buffer.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_queue_name() -> String {
    "default".to_string()
}

fn default_stacktrace_limit() -> usize {
    10
}

fn default_event_capacity() -> usize {
    1024
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            name: default_queue_name(),
            stacktrace_limit: default_stacktrace_limit(),
            event_capacity: default_event_capacity(),
        }
    }
}

/// `[worker]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSection {
    /// Jobs processed at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Idle poll interval in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Only process jobs with this name.
    #[serde(default)]
    pub name: Option<String>,
}

fn default_concurrency() -> usize {
    1
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            poll_interval_ms: default_poll_interval_ms(),
            name: None,
        }
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `workhorse_queue=debug`.
    /// `RUST_LOG` takes precedence when set.
    #[serde(default = "default_level")]
    pub level: String,

    /// Directory for daily rolling log files. Console only when unset.
    #[serde(default)]
    pub dir: Option<PathBuf>,

    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,

    /// Rolled files kept on disk.
    #[serde(default = "default_max_files")]
    pub max_files: usize,

    /// Emit JSON lines instead of text.
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_file_prefix() -> String {
    "workhorse".to_string()
}

fn default_max_files() -> usize {
    7
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            dir: None,
            file_prefix: default_file_prefix(),
            max_files: default_max_files(),
            json: false,
        }
    }
}

/// A `[[jobs]]` entry.
///
/// `options` uses the queue's job option keys (`priority`, `delay`,
/// `attempts`, `backoff`, `timeout`, `lifo`, `remove_on_complete`,
/// `remove_on_fail`, `repeat`, `job_id`); durations are milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedJob {
    pub name: String,

    #[serde(default)]
    pub data: Option<toml::Value>,

    #[serde(default)]
    pub options: toml::Table,

    /// How many copies to add.
    #[serde(default = "default_count")]
    pub count: usize,
}

fn default_count() -> usize {
    1
}

/// Option keys understood by the queue.
pub const JOB_OPTION_KEYS: &[&str] = &[
    "priority",
    "delay",
    "attempts",
    "backoff",
    "timeout",
    "lifo",
    "remove_on_complete",
    "remove_on_fail",
    "repeat",
    "job_id",
];

impl SeedJob {
    /// Payload as JSON (`null` when absent).
    pub fn data_json(&self) -> Result<serde_json::Value, ConfigError> {
        match &self.data {
            None => Ok(serde_json::Value::Null),
            Some(value) => serde_json::to_value(value).map_err(|e| ConfigError::InvalidValue {
                field: format!("jobs.{}.data", self.name),
                message: e.to_string(),
            }),
        }
    }

    /// Options as a JSON object.
    pub fn options_json(&self) -> Result<serde_json::Value, ConfigError> {
        serde_json::to_value(&self.options).map_err(|e| ConfigError::InvalidValue {
            field: format!("jobs.{}.options", self.name),
            message: e.to_string(),
        })
    }
}
