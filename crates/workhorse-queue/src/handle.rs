//! Handles to jobs owned by a queue.

use std::fmt;

use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::error::QueueResult;
use crate::job::{Job, JobId, JobState};
use crate::queue::Queue;

/// Reference to a job by ID. Every method reads or mutates through the
/// queue, so a handle never holds stale job data.
#[derive(Clone)]
pub struct JobHandle {
    id: JobId,
    queue: Queue,
}

impl JobHandle {
    pub(crate) fn new(queue: Queue, id: JobId) -> Self {
        Self { id, queue }
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    /// Current snapshot, `None` once the job has been removed.
    pub async fn snapshot(&self) -> QueueResult<Option<Job>> {
        self.queue.get_job(&self.id).await
    }

    pub async fn state(&self) -> QueueResult<Option<JobState>> {
        self.queue.get_job_state(&self.id).await
    }

    /// Report progress (0-100).
    pub async fn progress(&self, progress: u8) -> QueueResult<()> {
        self.queue.update_progress(&self.id, progress).await
    }

    /// Append a log line.
    pub async fn log(&self, line: impl Into<String>) -> QueueResult<usize> {
        self.queue.add_log(&self.id, line).await
    }

    pub async fn logs(&self) -> QueueResult<Vec<String>> {
        self.queue.get_job_logs(&self.id).await
    }

    /// Retry a failed job.
    pub async fn retry(&self) -> QueueResult<()> {
        self.queue.retry_job(&self.id).await
    }

    /// Promote a delayed job.
    pub async fn promote(&self) -> QueueResult<()> {
        self.queue.promote_job(&self.id).await
    }

    pub async fn remove(&self) -> QueueResult<Option<Job>> {
        self.queue.remove_job_by_id(&self.id).await
    }
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.id)
            .field("queue", &self.queue.name())
            .finish()
    }
}

/// The job a processor is working on.
///
/// Carries the snapshot taken at claim time plus a cancellation token that
/// fires when the attempt times out. Processors that do long work should
/// watch [`ActiveJob::cancelled`].
#[derive(Clone)]
pub struct ActiveJob {
    job: Job,
    handle: JobHandle,
    cancel: CancellationToken,
}

impl ActiveJob {
    pub(crate) fn new(job: Job, queue: Queue, cancel: CancellationToken) -> Self {
        let handle = JobHandle::new(queue, job.id.clone());
        Self { job, handle, cancel }
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn id(&self) -> &JobId {
        &self.job.id
    }

    pub fn name(&self) -> &str {
        &self.job.name
    }

    pub fn data(&self) -> &serde_json::Value {
        &self.job.data
    }

    /// Deserialize the payload.
    pub fn data_as<T: DeserializeOwned>(&self) -> QueueResult<T> {
        Ok(serde_json::from_value(self.job.data.clone())?)
    }

    /// Attempts finished before this one.
    pub fn attempts_made(&self) -> u32 {
        self.job.attempts_made
    }

    pub fn handle(&self) -> &JobHandle {
        &self.handle
    }

    pub async fn progress(&self, progress: u8) -> QueueResult<()> {
        self.handle.progress(progress).await
    }

    pub async fn log(&self, line: impl Into<String>) -> QueueResult<usize> {
        self.handle.log(line).await
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when the attempt has been abandoned.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

impl fmt::Debug for ActiveJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveJob")
            .field("id", &self.job.id)
            .field("name", &self.job.name)
            .field("attempts_made", &self.job.attempts_made)
            .finish()
    }
}
