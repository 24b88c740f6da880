//! The queue: sole owner of every job collection.
//!
//! All collections sit behind one async mutex. `get_next_job` pops from
//! waiting and marks the job active while holding it, which makes the claim
//! linearizable across any number of workers. Processors never run under
//! the lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::futures::Notified;
use tokio::sync::{broadcast, Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::{add_duration, sub_duration, Clock, SystemClock};
use crate::config::{QueueConfig, WorkerConfig};
use crate::cron::{CronEvaluator, StandardCron};
use crate::error::{QueueError, QueueResult};
use crate::events::{EventBus, QueueEvent};
use crate::handle::JobHandle;
use crate::job::{Job, JobId, JobOptions, JobState, RepeatOptions, Retention};
use crate::queue_state::{JobCounts, QueueState};
use crate::scheduler::{RepeatableDefinition, Scheduler};
use crate::worker::{Processor, Worker, WorkerHandle};

pub(crate) struct QueueInner {
    name: String,
    config: QueueConfig,
    state: Mutex<QueueState>,
    events: EventBus,
    scheduler: Scheduler,
    clock: Arc<dyn Clock>,
    work_available: Notify,
    closing: AtomicBool,
    closed: CancellationToken,
    workers: parking_lot::Mutex<Vec<Weak<Worker>>>,
}

/// A named job queue. Cheap to clone; clones share the same collections.
#[derive(Clone)]
pub struct Queue {
    inner: Arc<QueueInner>,
}

/// Non-owning queue reference held by timers.
#[derive(Clone)]
pub(crate) struct WeakQueue(Weak<QueueInner>);

impl WeakQueue {
    pub fn upgrade(&self) -> Option<Queue> {
        self.0.upgrade().map(|inner| Queue { inner })
    }
}

/// Builder for [`Queue`].
pub struct QueueBuilder {
    name: String,
    config: QueueConfig,
    clock: Option<Arc<dyn Clock>>,
    cron: Option<Arc<dyn CronEvaluator>>,
}

impl QueueBuilder {
    /// Start building a queue.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: QueueConfig::default(),
            clock: None,
            cron: None,
        }
    }

    /// Set the queue configuration.
    pub fn config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a custom clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Use a custom cron evaluator.
    pub fn cron_evaluator(mut self, cron: Arc<dyn CronEvaluator>) -> Self {
        self.cron = Some(cron);
        self
    }

    /// Build the queue.
    pub fn build(self) -> Queue {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock::new()));
        let cron = self.cron.unwrap_or_else(|| Arc::new(StandardCron));

        Queue {
            inner: Arc::new(QueueInner {
                name: self.name,
                events: EventBus::new(self.config.event_capacity),
                config: self.config,
                state: Mutex::new(QueueState::default()),
                scheduler: Scheduler::new(clock.clone(), cron),
                clock,
                work_available: Notify::new(),
                closing: AtomicBool::new(false),
                closed: CancellationToken::new(),
                workers: parking_lot::Mutex::new(Vec::new()),
            }),
        }
    }
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("name", &self.inner.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Queue {
    /// Create a queue with default configuration.
    pub fn new(name: impl Into<String>) -> Self {
        QueueBuilder::new(name).build()
    }

    /// Start building a queue.
    pub fn builder(name: impl Into<String>) -> QueueBuilder {
        QueueBuilder::new(name)
    }

    /// Queue name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Queue configuration.
    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// Clock used for every timestamp and timer.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    /// Subscribe to queue events.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.inner.events.subscribe()
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.closing.load(Ordering::SeqCst)
    }

    pub(crate) fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    pub(crate) fn downgrade(&self) -> WeakQueue {
        WeakQueue(Arc::downgrade(&self.inner))
    }

    /// Future resolved the next time work may have become available.
    pub(crate) fn work_notified(&self) -> Notified<'_> {
        self.inner.work_available.notified()
    }

    fn ensure_open(&self) -> QueueResult<()> {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }
        Ok(())
    }

    /// Log and broadcast a bookkeeping error without failing the caller.
    pub(crate) fn report_error(&self, message: String) {
        error!(queue = %self.inner.name, "{}", message);
        self.inner.events.emit(QueueEvent::Error { message });
    }

    /// Add a job.
    ///
    /// Jobs with a delay are parked in delayed; repeatable jobs are
    /// registered with the scheduler and the handle points at their first
    /// occurrence. Adding a caller-chosen `job_id` that already exists
    /// returns a handle to the existing job.
    pub async fn add(
        &self,
        name: impl Into<String>,
        data: serde_json::Value,
        options: JobOptions,
    ) -> QueueResult<JobHandle> {
        self.ensure_open()?;
        options.validate()?;
        let name = name.into();

        if options.repeat.is_some() {
            return self
                .inner
                .scheduler
                .add_repeatable_job(self, name, data, options)
                .await;
        }

        let now = self.inner.clock.now();
        let mut state = self.inner.state.lock().await;
        if state.closed {
            return Err(QueueError::Closed);
        }

        let id = match options.job_id.as_deref() {
            Some(custom) => {
                let id = JobId::from(custom);
                if state.jobs.contains_key(&id) {
                    debug!(job_id = %id, "Job already exists, skipping add");
                    return Ok(JobHandle::new(self.clone(), id));
                }
                id
            }
            None => state.next_job_id(),
        };

        let until = (!options.delay.is_zero()).then(|| add_duration(now, options.delay));
        let job = Job::new(id.clone(), name, data, options, now);
        debug!(job_id = %id, name = %job.name, priority = job.options.priority, "Adding job");
        self.enqueue_locked(&mut state, job, until);

        Ok(JobHandle::new(self.clone(), id))
    }

    /// Admit one occurrence of a repeatable definition.
    pub(crate) async fn admit_occurrence(
        &self,
        definition: &RepeatableDefinition,
        run_at: DateTime<Utc>,
    ) -> QueueResult<Job> {
        let now = self.inner.clock.now();
        let mut state = self.inner.state.lock().await;
        if state.closed {
            return Err(QueueError::Closed);
        }

        let id = state.next_job_id();
        let mut job = Job::new(
            id,
            definition.name.clone(),
            definition.data.clone(),
            definition.options.clone(),
            now,
        );
        job.repeat_key = Some(definition.key.clone());

        let until = (run_at > now).then_some(run_at);
        Ok(self.enqueue_locked(&mut state, job, until))
    }

    /// Place a job in waiting, or in delayed when `until` is set.
    fn enqueue_locked(
        &self,
        state: &mut QueueState,
        mut job: Job,
        until: Option<DateTime<Utc>>,
    ) -> Job {
        match until {
            Some(until) => {
                job.state = JobState::Delayed;
                job.delay_until = Some(until);
            }
            None => {
                job.state = JobState::Waiting;
                job.delay_until = None;
            }
        }

        let id = job.id.clone();
        state.place(job.clone());

        match until {
            Some(until) => {
                self.inner.events.emit(QueueEvent::Delayed { job_id: id.clone(), until });
                self.inner.scheduler.schedule_delayed_job(self, id, until);
            }
            None => {
                self.inner.events.emit(QueueEvent::Waiting { job_id: id });
                self.inner.work_available.notify_waiters();
            }
        }
        job
    }

    /// Move a due delayed job to waiting. Called by scheduler timers.
    pub(crate) async fn promote_delayed(&self, id: &JobId) -> QueueResult<bool> {
        let now = self.inner.clock.now();
        let mut state = self.inner.state.lock().await;
        if state.closed {
            return Err(QueueError::Closed);
        }

        let due = state.jobs.get(id).is_some_and(|job| {
            job.state == JobState::Delayed && job.delay_until.is_none_or(|until| until <= now)
        });
        if !due {
            return Ok(false);
        }

        if let Some(job) = state.take(id) {
            debug!(job_id = %id, "Promoting delayed job");
            self.enqueue_locked(&mut state, job, None);
        }
        Ok(true)
    }

    /// Claim the highest-priority waiting job and mark it active.
    ///
    /// Returns `None` when paused or when nothing is waiting.
    pub async fn get_next_job(&self) -> QueueResult<Option<Job>> {
        self.get_next_job_for(None).await
    }

    /// Claim the highest-priority waiting job named `name` (any job if `None`).
    ///
    /// Jobs with other names keep their position in waiting.
    pub async fn get_next_job_for(&self, name: Option<&str>) -> QueueResult<Option<Job>> {
        self.ensure_open()?;
        let now = self.inner.clock.now();
        let mut state = self.inner.state.lock().await;
        if state.closed {
            return Err(QueueError::Closed);
        }
        if state.paused {
            return Ok(None);
        }

        let claimed = state.pop_waiting(name).map(|mut job| {
            job.state = JobState::Active;
            job.processed_on = Some(now);
            job.lock_token = None;
            state.place(job.clone());
            debug!(job_id = %job.id, name = %job.name, "Job claimed");
            self.inner.events.emit(QueueEvent::Active { job: job.clone() });
            job
        });

        if claimed.is_some() && state.waiting_is_empty() {
            self.inner.events.emit(QueueEvent::Drained);
        }

        Ok(claimed)
    }

    /// Record a worker's lease on an active job.
    pub(crate) async fn take_lock(&self, id: &JobId, token: Uuid) -> QueueResult<Job> {
        let mut state = self.inner.state.lock().await;
        let job = state
            .jobs
            .get_mut(id)
            .ok_or_else(|| QueueError::Lock(format!("job {} no longer exists", id)))?;

        if job.state != JobState::Active {
            return Err(QueueError::Lock(format!("job {} is {}, not active", id, job.state)));
        }
        if job.lock_token.is_some_and(|existing| existing != token) {
            return Err(QueueError::Lock(format!("job {} is locked by another worker", id)));
        }

        job.lock_token = Some(token);
        Ok(job.clone())
    }

    /// Remove an active job whose lease matches the caller's copy.
    fn take_locked(state: &mut QueueState, job: &Job) -> QueueResult<Job> {
        match state.jobs.get(&job.id) {
            None => Err(QueueError::Lock(format!("job {} no longer exists", job.id))),
            Some(current) if current.state != JobState::Active => Err(QueueError::Lock(format!(
                "job {} is {}, not active",
                job.id, current.state
            ))),
            Some(current) if current.lock_token != job.lock_token => Err(QueueError::Lock(
                format!("lock token mismatch for job {}", job.id),
            )),
            Some(_) => state
                .take(&job.id)
                .ok_or_else(|| QueueError::Lock(format!("job {} no longer exists", job.id))),
        }
    }

    /// Move an active job to completed.
    pub async fn complete_job(&self, job: &Job, result: serde_json::Value) -> QueueResult<()> {
        let now = self.inner.clock.now();
        let mut state = self.inner.state.lock().await;
        if state.closed {
            return Err(QueueError::Closed);
        }

        let mut current = Self::take_locked(&mut state, job)?;
        current.state = JobState::Completed;
        current.attempts_made += 1;
        current.finished_on = Some(now);
        current.return_value = Some(result.clone());
        current.lock_token = None;

        let retention = current.options.remove_on_complete;
        debug!(job_id = %current.id, "Job completed");
        state.place(current.clone());
        self.inner.events.emit(QueueEvent::Completed { job: current.clone(), result });
        self.apply_retention(&mut state, &current.id, JobState::Completed, retention);
        Ok(())
    }

    /// Record a failed attempt. Retries through the scheduler while attempts
    /// remain, otherwise moves the job to failed.
    pub async fn fail_job(&self, job: &Job, error: &QueueError) -> QueueResult<()> {
        let now = self.inner.clock.now();
        let mut state = self.inner.state.lock().await;
        if state.closed {
            return Err(QueueError::Closed);
        }

        let mut current = Self::take_locked(&mut state, job)?;
        let reason = error.to_string();
        current.attempts_made += 1;
        current.lock_token = None;
        current.failed_reason = Some(reason.clone());
        current.stacktrace.push(format!("{:?}", error));

        let limit = self.inner.config.stacktrace_limit;
        if limit > 0 && current.stacktrace.len() > limit {
            let excess = current.stacktrace.len() - limit;
            current.stacktrace.drain(..excess);
        }

        if current.can_retry() {
            let delay = current.retry_delay();
            let until = (!delay.is_zero()).then(|| add_duration(now, delay));
            current.state = if until.is_some() { JobState::Delayed } else { JobState::Waiting };
            current.delay_until = until;

            info!(
                job_id = %current.id,
                attempt = current.attempts_made,
                attempts = current.options.attempts,
                delay_ms = delay.as_millis() as u64,
                "Job failed, retrying: {}",
                reason
            );
            self.inner.events.emit(QueueEvent::Failed { job: current.clone(), error: reason });
            self.enqueue_locked(&mut state, current, until);
        } else {
            current.state = JobState::Failed;
            current.finished_on = Some(now);

            warn!(
                job_id = %current.id,
                attempts = current.attempts_made,
                "Job failed permanently: {}",
                reason
            );
            let retention = current.options.remove_on_fail;
            state.place(current.clone());
            self.inner.events.emit(QueueEvent::Failed { job: current.clone(), error: reason });
            self.apply_retention(&mut state, &current.id, JobState::Failed, retention);
        }
        Ok(())
    }

    fn apply_retention(
        &self,
        state: &mut QueueState,
        id: &JobId,
        status: JobState,
        retention: Retention,
    ) {
        let evict = match retention {
            Retention::KeepAll => return,
            Retention::RemoveAll => vec![id.clone()],
            Retention::KeepLast(keep) => state.overflow(status, keep),
        };

        for evicted in evict {
            if state.take(&evicted).is_none() {
                self.report_error(format!("retention could not evict job {}", evicted));
            } else {
                debug!(job_id = %evicted, status = %status, "Evicted by retention policy");
            }
        }
    }

    /// Stop dispatching. Active jobs are unaffected.
    pub async fn pause(&self) -> QueueResult<()> {
        self.ensure_open()?;
        let mut state = self.inner.state.lock().await;
        if !state.paused {
            state.paused = true;
            info!(queue = %self.inner.name, "Queue paused");
            self.inner.events.emit(QueueEvent::Paused);
        }
        Ok(())
    }

    /// Resume dispatching.
    pub async fn resume(&self) -> QueueResult<()> {
        self.ensure_open()?;
        let mut state = self.inner.state.lock().await;
        if state.paused {
            state.paused = false;
            info!(queue = %self.inner.name, "Queue resumed");
            self.inner.events.emit(QueueEvent::Resumed);
            self.inner.work_available.notify_waiters();
        }
        Ok(())
    }

    /// Whether dispatch is paused.
    pub async fn is_paused(&self) -> bool {
        self.inner.state.lock().await.paused
    }

    /// Evict completed or failed jobs that finished more than `grace` ago,
    /// oldest first, at most `limit` of them.
    pub async fn clean(
        &self,
        grace: Duration,
        status: JobState,
        limit: Option<usize>,
    ) -> QueueResult<Vec<Job>> {
        self.ensure_open()?;
        if !status.is_finished() {
            return Err(QueueError::Validation(format!(
                "clean supports completed and failed jobs, got {}",
                status
            )));
        }

        let cutoff = sub_duration(self.inner.clock.now(), grace);
        let mut state = self.inner.state.lock().await;

        let expired: Vec<JobId> = state
            .ids(status, true)
            .into_iter()
            .filter(|id| {
                state
                    .jobs
                    .get(id)
                    .and_then(|job| job.finished_on)
                    .is_some_and(|finished| finished < cutoff)
            })
            .take(limit.unwrap_or(usize::MAX))
            .collect();

        let cleaned: Vec<Job> = expired.iter().filter_map(|id| state.take(id)).collect();
        if !cleaned.is_empty() {
            info!(queue = %self.inner.name, count = cleaned.len(), status = %status, "Cleaned jobs");
            self.inner.events.emit(QueueEvent::Cleaned { jobs: cleaned.clone(), status });
        }
        Ok(cleaned)
    }

    /// Remove a job wherever it is. Absent IDs are a no-op.
    pub async fn remove_job_by_id(&self, id: &JobId) -> QueueResult<Option<Job>> {
        self.ensure_open()?;
        let mut state = self.inner.state.lock().await;
        let Some(job) = state.take(id) else {
            return Ok(None);
        };

        if job.state == JobState::Delayed {
            self.inner.scheduler.cancel_delayed(id);
        }
        debug!(job_id = %id, state = %job.state, "Job removed");
        self.inner.events.emit(QueueEvent::Removed { job: job.clone() });
        Ok(Some(job))
    }

    /// Remove every non-active job whose ID matches a glob pattern.
    pub async fn remove_jobs(&self, pattern: &str) -> QueueResult<Vec<Job>> {
        self.ensure_open()?;
        let pattern = glob::Pattern::new(pattern)
            .map_err(|e| QueueError::Validation(format!("invalid pattern '{}': {}", pattern, e)))?;

        let mut state = self.inner.state.lock().await;
        let mut matched: Vec<JobId> = state
            .jobs
            .values()
            .filter(|job| job.state != JobState::Active && pattern.matches(job.id.as_str()))
            .map(|job| job.id.clone())
            .collect();
        matched.sort();

        let mut removed = Vec::with_capacity(matched.len());
        for id in matched {
            if let Some(job) = state.take(&id) {
                if job.state == JobState::Delayed {
                    self.inner.scheduler.cancel_delayed(&id);
                }
                self.inner.events.emit(QueueEvent::Removed { job: job.clone() });
                removed.push(job);
            }
        }
        Ok(removed)
    }

    /// Drop every waiting and delayed job. Returns how many were dropped.
    pub async fn empty(&self) -> QueueResult<usize> {
        self.ensure_open()?;
        let mut state = self.inner.state.lock().await;
        let dropped = state.drain_pending();
        for job in dropped.iter().filter(|job| job.state == JobState::Delayed) {
            self.inner.scheduler.cancel_delayed(&job.id);
        }
        info!(queue = %self.inner.name, count = dropped.len(), "Queue emptied");
        Ok(dropped.len())
    }

    /// Move a failed job back to waiting with a fresh attempt budget.
    pub async fn retry_job(&self, id: &JobId) -> QueueResult<()> {
        self.ensure_open()?;
        let mut state = self.inner.state.lock().await;
        let current = state
            .jobs
            .get(id)
            .map(|job| job.state)
            .ok_or_else(|| QueueError::JobNotFound(id.to_string()))?;
        if current != JobState::Failed {
            return Err(QueueError::InvalidState(format!(
                "job {} is {}, only failed jobs can be retried",
                id, current
            )));
        }

        let mut job = state
            .take(id)
            .ok_or_else(|| QueueError::JobNotFound(id.to_string()))?;
        job.attempts_made = 0;
        job.failed_reason = None;
        job.finished_on = None;
        job.processed_on = None;
        info!(job_id = %id, "Retrying failed job");
        self.enqueue_locked(&mut state, job, None);
        Ok(())
    }

    /// Move a delayed job to waiting now.
    pub async fn promote_job(&self, id: &JobId) -> QueueResult<()> {
        self.ensure_open()?;
        let mut state = self.inner.state.lock().await;
        let current = state
            .jobs
            .get(id)
            .map(|job| job.state)
            .ok_or_else(|| QueueError::JobNotFound(id.to_string()))?;
        if current != JobState::Delayed {
            return Err(QueueError::InvalidState(format!(
                "job {} is {}, only delayed jobs can be promoted",
                id, current
            )));
        }

        self.inner.scheduler.cancel_delayed(id);
        if let Some(job) = state.take(id) {
            self.enqueue_locked(&mut state, job, None);
        }
        Ok(())
    }

    /// Set the progress of an active job (0-100) and emit a progress event.
    /// Jobs that are not active are left untouched.
    pub async fn update_progress(&self, id: &JobId, progress: u8) -> QueueResult<()> {
        self.ensure_open()?;
        if progress > 100 {
            return Err(QueueError::Validation(format!(
                "progress must be between 0 and 100, got {}",
                progress
            )));
        }

        let mut state = self.inner.state.lock().await;
        if let Some(job) = state
            .jobs
            .get_mut(id)
            .filter(|job| job.state == JobState::Active)
        {
            job.progress = progress;
            let snapshot = job.clone();
            self.inner.events.emit(QueueEvent::Progress { job: snapshot, progress });
        }
        Ok(())
    }

    /// Append a log line to a job. Returns the number of log lines.
    pub async fn add_log(&self, id: &JobId, line: impl Into<String>) -> QueueResult<usize> {
        self.ensure_open()?;
        let mut state = self.inner.state.lock().await;
        Ok(match state.jobs.get_mut(id) {
            Some(job) => {
                job.logs.push(line.into());
                job.logs.len()
            }
            None => 0,
        })
    }

    /// Jobs in the given states, in order, sliced to `start..end`.
    ///
    /// Waiting is in dispatch order, delayed by due time and active by claim
    /// time. Completed and failed are most recent first unless `asc`.
    pub async fn get_jobs(
        &self,
        states: &[JobState],
        start: usize,
        end: Option<usize>,
        asc: bool,
    ) -> QueueResult<Vec<Job>> {
        self.ensure_open()?;
        let state = self.inner.state.lock().await;
        let end = end.unwrap_or(usize::MAX);

        Ok(states
            .iter()
            .flat_map(|s| state.ids(*s, asc))
            .filter_map(|id| state.jobs.get(&id).cloned())
            .skip(start)
            .take(end.saturating_sub(start))
            .collect())
    }

    /// Waiting jobs in dispatch order.
    pub async fn get_waiting(&self) -> QueueResult<Vec<Job>> {
        self.get_jobs(&[JobState::Waiting], 0, None, false).await
    }

    /// Delayed jobs, soonest first.
    pub async fn get_delayed(&self) -> QueueResult<Vec<Job>> {
        self.get_jobs(&[JobState::Delayed], 0, None, false).await
    }

    /// Active jobs, in claim order.
    pub async fn get_active(&self) -> QueueResult<Vec<Job>> {
        self.get_jobs(&[JobState::Active], 0, None, false).await
    }

    /// Completed jobs, most recent first.
    pub async fn get_completed(&self) -> QueueResult<Vec<Job>> {
        self.get_jobs(&[JobState::Completed], 0, None, false).await
    }

    /// Failed jobs, most recent first.
    pub async fn get_failed(&self) -> QueueResult<Vec<Job>> {
        self.get_jobs(&[JobState::Failed], 0, None, false).await
    }

    /// Snapshot of one job.
    pub async fn get_job(&self, id: &JobId) -> QueueResult<Option<Job>> {
        self.ensure_open()?;
        Ok(self.inner.state.lock().await.jobs.get(id).cloned())
    }

    /// State of one job, `None` if it is not in the queue.
    pub async fn get_job_state(&self, id: &JobId) -> QueueResult<Option<JobState>> {
        self.ensure_open()?;
        Ok(self.inner.state.lock().await.jobs.get(id).map(|job| job.state))
    }

    /// Log lines of one job.
    pub async fn get_job_logs(&self, id: &JobId) -> QueueResult<Vec<String>> {
        self.ensure_open()?;
        Ok(self
            .inner
            .state
            .lock()
            .await
            .jobs
            .get(id)
            .map(|job| job.logs.clone())
            .unwrap_or_default())
    }

    /// Number of jobs per state.
    pub async fn get_job_counts(&self) -> QueueResult<JobCounts> {
        self.ensure_open()?;
        Ok(self.inner.state.lock().await.counts())
    }

    /// Jobs not yet processed (waiting + delayed).
    pub async fn count(&self) -> QueueResult<usize> {
        self.ensure_open()?;
        let state = self.inner.state.lock().await;
        Ok(state.count(JobState::Waiting) + state.count(JobState::Delayed))
    }

    /// Registered repeatable definitions, soonest first.
    pub fn get_repeatable_jobs(&self) -> Vec<RepeatableDefinition> {
        self.inner.scheduler.get_repeatable_jobs()
    }

    /// Unregister a repeatable definition. Returns whether it existed.
    pub fn remove_repeatable(&self, name: &str, repeat: &RepeatOptions) -> QueueResult<bool> {
        self.ensure_open()?;
        Ok(self.inner.scheduler.remove_repeatable_job(name, repeat))
    }

    /// Start a worker on this queue. `close` waits for it.
    pub fn process<P: Processor>(
        &self,
        name: Option<&str>,
        concurrency: usize,
        processor: P,
    ) -> QueueResult<WorkerHandle> {
        let mut config = WorkerConfig::default().with_concurrency(concurrency);
        if let Some(name) = name {
            config = config.with_name(name);
        }
        self.process_with(config, processor)
    }

    /// Start a worker with a full configuration.
    pub fn process_with<P: Processor>(
        &self,
        config: WorkerConfig,
        processor: P,
    ) -> QueueResult<WorkerHandle> {
        self.ensure_open()?;
        let worker = Worker::new(self.clone(), Arc::new(processor), config);
        Ok(WorkerHandle::spawn(worker))
    }

    /// Remember a worker so `close` can wait for it.
    pub(crate) fn track_worker(&self, worker: &Arc<Worker>) {
        let mut workers = self.inner.workers.lock();
        workers.retain(|w| w.strong_count() > 0);
        workers.push(Arc::downgrade(worker));
    }

    /// Close the queue.
    ///
    /// Stops dispatch and every scheduler timer, waits for every worker bound
    /// to this queue to finish its in-flight jobs, then rejects
    /// all further operations with [`QueueError::Closed`]. Concurrent and
    /// repeated calls all return once the first close has finished.
    pub async fn close(&self) {
        if self.inner.closing.swap(true, Ordering::SeqCst) {
            self.inner.closed.cancelled().await;
            return;
        }

        info!(queue = %self.inner.name, "Closing queue");
        self.inner.scheduler.stop();
        self.inner.work_available.notify_waiters();

        let workers: Vec<Arc<Worker>> = self
            .inner
            .workers
            .lock()
            .drain(..)
            .filter_map(|w| w.upgrade())
            .collect();
        for worker in workers {
            worker.close().await;
        }

        self.inner.scheduler.wait_stopped().await;
        self.inner.state.lock().await.closed = true;
        self.inner.closed.cancel();
        info!(queue = %self.inner.name, "Queue closed");
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
