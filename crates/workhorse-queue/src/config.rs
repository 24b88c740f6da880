//! Queue and worker configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum stacktrace entries kept per job (0 = unlimited).
    #[serde(default = "default_stacktrace_limit")]
    pub stacktrace_limit: usize,

    /// Buffered events per subscriber before it starts lagging.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_stacktrace_limit() -> usize {
    10
}

fn default_event_capacity() -> usize {
    1024
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            stacktrace_limit: default_stacktrace_limit(),
            event_capacity: default_event_capacity(),
        }
    }
}

/// Worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Maximum jobs processed at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Upper bound on idle sleep between claim attempts, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Only claim jobs with this name.
    #[serde(default)]
    pub name: Option<String>,
}

fn default_concurrency() -> usize {
    1
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            poll_interval_ms: default_poll_interval_ms(),
            name: None,
        }
    }
}

impl WorkerConfig {
    /// Set the concurrency limit.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Restrict the worker to one job name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the idle poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis().min(u64::MAX as u128) as u64;
        self
    }

    /// Idle poll interval as a Duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}
