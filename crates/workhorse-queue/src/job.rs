//! Job definition, options and state.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{QueueError, QueueResult};

/// Opaque job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Create a job ID from any string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Job state. Each state maps to one queue-owned collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Ready for dispatch.
    Waiting,
    /// Waiting for its delay (or retry backoff) to elapse.
    Delayed,
    /// Claimed by a worker.
    Active,
    /// Finished successfully.
    Completed,
    /// Finished after exhausting its attempts.
    Failed,
}

impl JobState {
    /// All states, in lifecycle order.
    pub const ALL: [JobState; 5] = [
        JobState::Waiting,
        JobState::Delayed,
        JobState::Active,
        JobState::Completed,
        JobState::Failed,
    ];

    /// Whether the state is terminal.
    pub fn is_finished(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    /// Lowercase name of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Delayed => "delayed",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backoff strategy between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    /// Same delay before every retry.
    Fixed,
    /// `delay * 2^(attempts_made - 1)`.
    Exponential,
}

/// Retry backoff policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backoff {
    /// Strategy.
    pub kind: BackoffKind,
    /// Base delay.
    #[serde(with = "duration_ms")]
    pub delay: Duration,
}

impl Backoff {
    /// Fixed backoff.
    pub fn fixed(delay: Duration) -> Self {
        Self { kind: BackoffKind::Fixed, delay }
    }

    /// Exponential backoff.
    pub fn exponential(delay: Duration) -> Self {
        Self { kind: BackoffKind::Exponential, delay }
    }

    /// Delay before the next attempt, given the number of attempts already made.
    pub fn delay_for(&self, attempts_made: u32) -> Duration {
        match self.kind {
            BackoffKind::Fixed => self.delay,
            BackoffKind::Exponential => {
                let exponent = attempts_made.saturating_sub(1).min(31);
                self.delay.saturating_mul(1u32 << exponent)
            }
        }
    }
}

/// Retention policy for finished jobs.
///
/// Serialized as `false` (keep), `true` (remove) or a count (keep the last N).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "RetentionRepr", into = "RetentionRepr")]
pub enum Retention {
    /// Keep every finished job.
    #[default]
    KeepAll,
    /// Remove the job as soon as it finishes.
    RemoveAll,
    /// Keep only the most recent N finished jobs.
    KeepLast(usize),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RetentionRepr {
    Flag(bool),
    Count(usize),
}

impl From<RetentionRepr> for Retention {
    fn from(repr: RetentionRepr) -> Self {
        match repr {
            RetentionRepr::Flag(false) => Retention::KeepAll,
            RetentionRepr::Flag(true) => Retention::RemoveAll,
            RetentionRepr::Count(n) => Retention::KeepLast(n),
        }
    }
}

impl From<Retention> for RetentionRepr {
    fn from(retention: Retention) -> Self {
        match retention {
            Retention::KeepAll => RetentionRepr::Flag(false),
            Retention::RemoveAll => RetentionRepr::Flag(true),
            Retention::KeepLast(n) => RetentionRepr::Count(n),
        }
    }
}

/// Repeat specification for repeatable jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RepeatOptions {
    /// Fixed interval; first occurrence is immediate.
    Every {
        #[serde(with = "duration_ms")]
        every: Duration,
    },
    /// Cron expression; first occurrence at the next boundary.
    Cron {
        cron: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timezone: Option<String>,
    },
}

impl RepeatOptions {
    /// Interval repeat.
    pub fn every(interval: Duration) -> Self {
        RepeatOptions::Every { every: interval }
    }

    /// Cron repeat.
    pub fn cron(expr: impl Into<String>) -> Self {
        RepeatOptions::Cron { cron: expr.into(), timezone: None }
    }

    /// Cron repeat in a named timezone (`"Europe/Berlin"`) or offset (`"+02:00"`).
    pub fn cron_in(expr: impl Into<String>, timezone: impl Into<String>) -> Self {
        RepeatOptions::Cron { cron: expr.into(), timezone: Some(timezone.into()) }
    }

    /// Stable key identifying this schedule.
    pub fn key(&self) -> String {
        match self {
            RepeatOptions::Every { every } => format!("every:{}", every.as_millis()),
            RepeatOptions::Cron { cron, timezone } => {
                format!("cron:{}:{}", cron.trim(), timezone.as_deref().unwrap_or(""))
            }
        }
    }
}

/// Per-job policy options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobOptions {
    /// Higher dispatches first.
    pub priority: i32,
    /// Delay before the job becomes waiting.
    #[serde(with = "duration_ms")]
    pub delay: Duration,
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Backoff between attempts. `None` retries immediately.
    pub backoff: Option<Backoff>,
    /// Processor timeout.
    #[serde(with = "option_duration_ms")]
    pub timeout: Option<Duration>,
    /// Dispatch before older jobs of the same priority.
    pub lifo: bool,
    /// Retention once completed.
    pub remove_on_complete: Retention,
    /// Retention once failed.
    pub remove_on_fail: Retention,
    /// Repeat specification.
    pub repeat: Option<RepeatOptions>,
    /// Caller-chosen job ID. Adding an existing ID is a no-op.
    pub job_id: Option<String>,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            priority: 0,
            delay: Duration::ZERO,
            attempts: 1,
            backoff: None,
            timeout: None,
            lifo: false,
            remove_on_complete: Retention::KeepAll,
            remove_on_fail: Retention::KeepAll,
            repeat: None,
            job_id: None,
        }
    }
}

impl JobOptions {
    /// Set the priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the initial delay.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Set the total number of attempts.
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Set the retry backoff.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Set the processor timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Dispatch LIFO among equal priorities.
    pub fn with_lifo(mut self, lifo: bool) -> Self {
        self.lifo = lifo;
        self
    }

    /// Set completed-job retention.
    pub fn with_remove_on_complete(mut self, retention: Retention) -> Self {
        self.remove_on_complete = retention;
        self
    }

    /// Set failed-job retention.
    pub fn with_remove_on_fail(mut self, retention: Retention) -> Self {
        self.remove_on_fail = retention;
        self
    }

    /// Make the job repeatable.
    pub fn with_repeat(mut self, repeat: RepeatOptions) -> Self {
        self.repeat = Some(repeat);
        self
    }

    /// Use a caller-chosen job ID.
    pub fn with_job_id(mut self, id: impl Into<String>) -> Self {
        self.job_id = Some(id.into());
        self
    }

    /// Validate option values. Cron expressions are checked by the scheduler.
    pub fn validate(&self) -> QueueResult<()> {
        if self.attempts < 1 {
            return Err(QueueError::Validation("attempts must be at least 1".to_string()));
        }
        if self.timeout == Some(Duration::ZERO) {
            return Err(QueueError::Validation("timeout must be greater than 0".to_string()));
        }
        if let Some(RepeatOptions::Every { every }) = &self.repeat {
            if every.is_zero() {
                return Err(QueueError::Validation(
                    "repeat.every must be greater than 0".to_string(),
                ));
            }
        }
        if let Some(RepeatOptions::Cron { cron, .. }) = &self.repeat {
            if cron.trim().is_empty() {
                return Err(QueueError::Validation("repeat.cron cannot be empty".to_string()));
            }
        }
        if let Some(id) = &self.job_id {
            if id.trim().is_empty() {
                return Err(QueueError::Validation("job_id cannot be empty".to_string()));
            }
        }
        Ok(())
    }
}

/// A job and its runtime state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job ID.
    pub id: JobId,
    /// Processor key. Empty string is the default processor.
    pub name: String,
    /// Payload.
    pub data: serde_json::Value,
    /// Policy options.
    pub options: JobOptions,
    /// Current state.
    pub state: JobState,
    /// Attempts finished so far.
    pub attempts_made: u32,
    /// Admission time.
    pub created_at: DateTime<Utc>,
    /// When the current (or last) attempt started.
    pub processed_on: Option<DateTime<Utc>>,
    /// When the job reached a terminal state.
    pub finished_on: Option<DateTime<Utc>>,
    /// When a delayed job becomes due.
    pub delay_until: Option<DateTime<Utc>>,
    /// Progress percentage (0-100).
    pub progress: u8,
    /// Log lines added while processing.
    pub logs: Vec<String>,
    /// Processor result.
    pub return_value: Option<serde_json::Value>,
    /// Reason for the last failure.
    pub failed_reason: Option<String>,
    /// Error details, one entry per failed attempt.
    pub stacktrace: Vec<String>,
    /// Lease held by the worker processing this job.
    pub lock_token: Option<Uuid>,
    /// Repeatable definition this occurrence came from.
    pub repeat_key: Option<String>,
}

impl Job {
    /// Create a new waiting job.
    pub(crate) fn new(
        id: JobId,
        name: impl Into<String>,
        data: serde_json::Value,
        options: JobOptions,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            data,
            options,
            state: JobState::Waiting,
            attempts_made: 0,
            created_at,
            processed_on: None,
            finished_on: None,
            delay_until: None,
            progress: 0,
            logs: Vec::new(),
            return_value: None,
            failed_reason: None,
            stacktrace: Vec::new(),
            lock_token: None,
            repeat_key: None,
        }
    }

    /// Check if another attempt is allowed.
    pub fn can_retry(&self) -> bool {
        self.attempts_made < self.options.attempts
    }

    /// Delay before the next attempt according to the backoff policy.
    pub fn retry_delay(&self) -> Duration {
        self.options
            .backoff
            .map(|b| b.delay_for(self.attempts_made))
            .unwrap_or(Duration::ZERO)
    }

    /// Check if the job finished.
    pub fn is_finished(&self) -> bool {
        self.state.is_finished()
    }
}

/// Serde helper: `Duration` as integer milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// Serde helper: `Option<Duration>` as integer milliseconds.
pub(crate) mod option_duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis().min(u64::MAX as u128) as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_options() {
        let options = JobOptions::default();
        assert_eq!(options.attempts, 1);
        assert_eq!(options.priority, 0);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_validate_attempts() {
        let options = JobOptions::default().with_attempts(0);
        assert!(matches!(options.validate(), Err(QueueError::Validation(_))));
    }

    #[test]
    fn test_validate_zero_interval() {
        let options = JobOptions::default().with_repeat(RepeatOptions::every(Duration::ZERO));
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_fixed_backoff() {
        let backoff = Backoff::fixed(Duration::from_millis(1000));
        assert_eq!(backoff.delay_for(1), Duration::from_millis(1000));
        assert_eq!(backoff.delay_for(5), Duration::from_millis(1000));
    }

    #[test]
    fn test_exponential_backoff() {
        let backoff = Backoff::exponential(Duration::from_millis(100));
        assert_eq!(backoff.delay_for(1), Duration::from_millis(100));
        assert_eq!(backoff.delay_for(2), Duration::from_millis(200));
        assert_eq!(backoff.delay_for(3), Duration::from_millis(400));
        assert_eq!(backoff.delay_for(4), Duration::from_millis(800));
    }

    #[test]
    fn test_exponential_backoff_saturates() {
        let backoff = Backoff::exponential(Duration::from_secs(u64::MAX / 2));
        assert_eq!(backoff.delay_for(40), Duration::MAX);
    }

    #[test]
    fn test_can_retry() {
        let mut job = Job::new(
            JobId::from("1"),
            "test",
            json!({}),
            JobOptions::default().with_attempts(3),
            Utc::now(),
        );
        assert!(job.can_retry());
        job.attempts_made = 3;
        assert!(!job.can_retry());
    }

    #[test]
    fn test_options_from_json() {
        let options: JobOptions = serde_json::from_value(json!({
            "priority": 10,
            "delay": 500,
            "attempts": 3,
            "backoff": { "kind": "exponential", "delay": 1000 },
            "timeout": 2000,
            "remove_on_complete": true,
            "remove_on_fail": 25,
            "repeat": { "cron": "*/5 * * * *", "timezone": "+01:00" }
        }))
        .unwrap();

        assert_eq!(options.priority, 10);
        assert_eq!(options.delay, Duration::from_millis(500));
        assert_eq!(options.backoff, Some(Backoff::exponential(Duration::from_secs(1))));
        assert_eq!(options.timeout, Some(Duration::from_secs(2)));
        assert_eq!(options.remove_on_complete, Retention::RemoveAll);
        assert_eq!(options.remove_on_fail, Retention::KeepLast(25));
        assert_eq!(options.repeat, Some(RepeatOptions::cron_in("*/5 * * * *", "+01:00")));
        assert!(!options.lifo);
    }

    #[test]
    fn test_repeat_every_from_json() {
        let repeat: RepeatOptions = serde_json::from_value(json!({ "every": 60000 })).unwrap();
        assert_eq!(repeat, RepeatOptions::every(Duration::from_secs(60)));
        assert_eq!(repeat.key(), "every:60000");
    }

    #[test]
    fn test_state_display() {
        assert_eq!(JobState::Completed.to_string(), "completed");
        assert!(JobState::Failed.is_finished());
        assert!(!JobState::Delayed.is_finished());
    }
}
