//! Timers for delayed jobs and repeatable definitions.
//!
//! Every timer is a task in one [`TaskTracker`] and listens on a child of one
//! root [`CancellationToken`], so `stop` tears them all down together. Timer
//! tasks hold a weak queue reference and never keep a queue alive.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::clock::{add_duration, Clock};
use crate::cron::CronEvaluator;
use crate::error::{QueueError, QueueResult};
use crate::handle::JobHandle;
use crate::job::{JobId, JobOptions, RepeatOptions};
use crate::queue::{Queue, WeakQueue};

/// A registered repeatable job.
#[derive(Debug, Clone, Serialize)]
pub struct RepeatableDefinition {
    /// `name:` followed by the schedule key.
    pub key: String,
    pub name: String,
    pub data: serde_json::Value,
    pub repeat: RepeatOptions,
    /// Options applied to every occurrence.
    pub options: JobOptions,
    /// Next occurrence, `None` once a cron schedule is exhausted.
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    /// Occurrences admitted so far.
    pub occurrences: u64,
}

struct TimerSlot {
    generation: u64,
    token: CancellationToken,
}

struct RepeatEntry {
    definition: RepeatableDefinition,
    token: CancellationToken,
}

pub(crate) struct Scheduler {
    clock: Arc<dyn Clock>,
    cron: Arc<dyn CronEvaluator>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    delayed: Mutex<HashMap<JobId, TimerSlot>>,
    repeatables: Mutex<HashMap<String, RepeatEntry>>,
    generation: AtomicU64,
}

impl Scheduler {
    pub fn new(clock: Arc<dyn Clock>, cron: Arc<dyn CronEvaluator>) -> Self {
        Self {
            clock,
            cron,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            delayed: Mutex::new(HashMap::new()),
            repeatables: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Next occurrence strictly after `after`.
    pub fn next_run_after(
        &self,
        repeat: &RepeatOptions,
        after: DateTime<Utc>,
    ) -> QueueResult<Option<DateTime<Utc>>> {
        match repeat {
            RepeatOptions::Every { every } => Ok(Some(add_duration(after, *every))),
            RepeatOptions::Cron { cron, timezone } => {
                self.cron.next_after(cron, timezone.as_deref(), after)
            }
        }
    }

    /// Interval schedules fire immediately; cron schedules at the next boundary.
    fn first_run(
        &self,
        repeat: &RepeatOptions,
        now: DateTime<Utc>,
    ) -> QueueResult<Option<DateTime<Utc>>> {
        match repeat {
            RepeatOptions::Every { .. } => Ok(Some(now)),
            RepeatOptions::Cron { cron, timezone } => {
                self.cron.validate(cron, timezone.as_deref())?;
                self.cron.next_after(cron, timezone.as_deref(), now)
            }
        }
    }

    /// Arm a one-shot timer that promotes `job_id` at `until`.
    ///
    /// Re-arming the same job replaces its previous timer.
    pub fn schedule_delayed_job(&self, queue: &Queue, job_id: JobId, until: DateTime<Utc>) {
        if self.shutdown.is_cancelled() {
            debug!(job_id = %job_id, "Scheduler stopped, not arming delayed timer");
            return;
        }

        let token = self.shutdown.child_token();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let previous = self.delayed.lock().insert(
            job_id.clone(),
            TimerSlot {
                generation,
                token: token.clone(),
            },
        );
        if let Some(previous) = previous {
            previous.token.cancel();
        }

        let weak = queue.downgrade();
        let clock = self.clock.clone();
        self.tracker.spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!(job_id = %job_id, "Delayed timer cancelled");
                }
                _ = clock.sleep_until(until) => {
                    let Some(queue) = weak.upgrade() else { return };
                    queue.scheduler().forget_delayed(&job_id, generation);
                    match queue.promote_delayed(&job_id).await {
                        Ok(_) | Err(QueueError::Closed) => {}
                        Err(e) => {
                            queue.report_error(format!("failed to promote job {}: {}", job_id, e))
                        }
                    }
                }
            }
        });
    }

    /// Cancel the timer of a delayed job, if armed.
    pub fn cancel_delayed(&self, job_id: &JobId) {
        if let Some(slot) = self.delayed.lock().remove(job_id) {
            slot.token.cancel();
        }
    }

    fn forget_delayed(&self, job_id: &JobId, generation: u64) {
        let mut delayed = self.delayed.lock();
        if delayed.get(job_id).is_some_and(|slot| slot.generation == generation) {
            delayed.remove(job_id);
        }
    }

    /// Register a repeatable definition and admit its first occurrence.
    pub async fn add_repeatable_job(
        &self,
        queue: &Queue,
        name: String,
        data: serde_json::Value,
        options: JobOptions,
    ) -> QueueResult<JobHandle> {
        if self.shutdown.is_cancelled() {
            return Err(QueueError::Closed);
        }

        let repeat = options
            .repeat
            .clone()
            .ok_or_else(|| QueueError::Validation("repeat options missing".to_string()))?;
        let key = format!("{}:{}", name, repeat.key());

        let now = self.clock.now();
        let first = self.first_run(&repeat, now)?.ok_or_else(|| {
            QueueError::Validation(format!("repeat schedule '{}' never fires", key))
        })?;
        let following = self.next_run_after(&repeat, first)?;

        let template = JobOptions {
            repeat: None,
            job_id: None,
            delay: std::time::Duration::ZERO,
            ..options
        };
        let definition = RepeatableDefinition {
            key: key.clone(),
            name,
            data,
            repeat,
            options: template,
            next_run_at: following,
            last_run_at: Some(first),
            occurrences: 1,
        };

        let token = self.shutdown.child_token();
        {
            let mut repeatables = self.repeatables.lock();
            if repeatables.contains_key(&key) {
                return Err(QueueError::Validation(format!(
                    "repeatable job '{}' is already registered",
                    key
                )));
            }
            repeatables.insert(
                key.clone(),
                RepeatEntry {
                    definition: definition.clone(),
                    token: token.clone(),
                },
            );
        }

        let job = match queue.admit_occurrence(&definition, first).await {
            Ok(job) => job,
            Err(e) => {
                self.repeatables.lock().remove(&key);
                token.cancel();
                return Err(e);
            }
        };

        info!(key = %key, next_run_at = ?following, "Registered repeatable job");
        self.arm_repeat(queue.downgrade(), key, token);
        Ok(JobHandle::new(queue.clone(), job.id))
    }

    fn arm_repeat(&self, weak: WeakQueue, key: String, token: CancellationToken) {
        let clock = self.clock.clone();
        self.tracker.spawn(async move {
            loop {
                let next = weak
                    .upgrade()
                    .and_then(|queue| queue.scheduler().next_run_at(&key));
                let Some(run_at) = next else { break };

                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = clock.sleep_until(run_at) => {}
                }

                let Some(queue) = weak.upgrade() else { break };
                let Some(definition) = queue.scheduler().advance_repeatable(&key, run_at) else {
                    break;
                };

                match queue.admit_occurrence(&definition, run_at).await {
                    Ok(job) => debug!(key = %key, job_id = %job.id, "Admitted repeat occurrence"),
                    Err(QueueError::Closed) => break,
                    Err(e) => queue.report_error(format!(
                        "failed to admit occurrence of {}: {}",
                        key, e
                    )),
                }
            }
            debug!(key = %key, "Repeat timer finished");
        });
    }

    fn next_run_at(&self, key: &str) -> Option<DateTime<Utc>> {
        self.repeatables
            .lock()
            .get(key)
            .and_then(|entry| entry.definition.next_run_at)
    }

    /// Record that the occurrence at `run_at` fired and compute the next one
    /// from the scheduled time, not the wake-up time.
    fn advance_repeatable(
        &self,
        key: &str,
        run_at: DateTime<Utc>,
    ) -> Option<RepeatableDefinition> {
        let mut repeatables = self.repeatables.lock();
        let entry = repeatables.get_mut(key)?;
        let fired = entry.definition.clone();

        let next = match self.next_run_after(&entry.definition.repeat, run_at) {
            Ok(next) => next,
            Err(e) => {
                warn!(key = %key, "Cannot compute next occurrence: {}", e);
                None
            }
        };

        entry.definition.last_run_at = Some(run_at);
        entry.definition.next_run_at = next;
        entry.definition.occurrences += 1;
        Some(fired)
    }

    /// Unregister a definition and cancel its timer.
    pub fn remove_repeatable_job(&self, name: &str, repeat: &RepeatOptions) -> bool {
        let key = format!("{}:{}", name, repeat.key());
        match self.repeatables.lock().remove(&key) {
            Some(entry) => {
                entry.token.cancel();
                info!(key = %key, "Removed repeatable job");
                true
            }
            None => false,
        }
    }

    /// Registered definitions, soonest first.
    pub fn get_repeatable_jobs(&self) -> Vec<RepeatableDefinition> {
        let mut definitions: Vec<RepeatableDefinition> = self
            .repeatables
            .lock()
            .values()
            .map(|entry| entry.definition.clone())
            .collect();
        definitions.sort_by(|a, b| match (a.next_run_at, b.next_run_at) {
            (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.key.cmp(&b.key)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.key.cmp(&b.key),
        });
        definitions
    }

    /// Cancel every timer. Idempotent.
    pub fn stop(&self) {
        self.shutdown.cancel();
        self.tracker.close();
        self.delayed.lock().clear();
        self.repeatables.lock().clear();
    }

    /// Wait for every timer task to exit. Only resolves after `stop`.
    pub async fn wait_stopped(&self) {
        self.tracker.wait().await;
    }

    /// Timer tasks currently alive.
    pub fn pending_timers(&self) -> usize {
        self.tracker.len()
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
