//! Workers: bounded-concurrency consumers of a queue.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{Notify, Semaphore};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::error::QueueError;
use crate::handle::ActiveJob;
use crate::job::Job;
use crate::queue::Queue;

/// User-supplied job handler.
///
/// Returning `Ok` completes the job with the value as its result. Returning
/// `Err` or panicking counts as a failed attempt.
#[async_trait]
pub trait Processor: Send + Sync + 'static {
    async fn process(&self, job: ActiveJob) -> anyhow::Result<serde_json::Value>;
}

#[async_trait]
impl<F, Fut> Processor for F
where
    F: Fn(ActiveJob) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send + 'static,
{
    async fn process(&self, job: ActiveJob) -> anyhow::Result<serde_json::Value> {
        (self)(job).await
    }
}

/// Worker counters.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStats {
    pub id: String,
    pub running: bool,
    pub active: usize,
    pub completed: u64,
    pub failed: u64,
}

/// A consumer bound to one queue.
pub struct Worker {
    id: String,
    queue: Queue,
    processor: Arc<dyn Processor>,
    config: WorkerConfig,
    concurrency: usize,
    semaphore: Arc<Semaphore>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    paused: AtomicBool,
    resumed: Notify,
    running: AtomicBool,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl Worker {
    /// Create a worker bound to `queue`. Nothing is claimed until it is
    /// started with [`WorkerHandle::spawn`].
    pub fn new(queue: Queue, processor: Arc<dyn Processor>, config: WorkerConfig) -> Arc<Self> {
        let concurrency = config.concurrency.max(1);
        let suffix = Uuid::new_v4().simple().to_string();
        let worker = Arc::new(Self {
            id: format!("{}-worker-{}", queue.name(), &suffix[..8]),
            queue,
            processor,
            config,
            concurrency,
            semaphore: Arc::new(Semaphore::new(concurrency)),
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            paused: AtomicBool::new(false),
            resumed: Notify::new(),
            running: AtomicBool::new(false),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        });
        worker.queue.track_worker(&worker);
        worker
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            id: self.id.clone(),
            running: self.is_running(),
            active: self.concurrency - self.semaphore.available_permits(),
            completed: self.completed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        }
    }

    /// Stop claiming new jobs on this worker only. In-flight jobs continue.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        debug!(worker = %self.id, "Worker paused");
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.resumed.notify_waiters();
        debug!(worker = %self.id, "Worker resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    async fn run(self: Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);
        info!(
            worker = %self.id,
            queue = %self.queue.name(),
            concurrency = self.concurrency,
            filter = ?self.config.name,
            "Worker started"
        );

        loop {
            if self.shutdown.is_cancelled() || self.queue.is_closed() {
                break;
            }

            if self.paused.load(Ordering::SeqCst) {
                let resumed = self.resumed.notified();
                tokio::pin!(resumed);
                resumed.as_mut().enable();
                if self.paused.load(Ordering::SeqCst) {
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = &mut resumed => {}
                    }
                }
                continue;
            }

            let permit = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                permit = self.semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            // Register interest before claiming so a job admitted between an
            // empty claim and the wait below still wakes us.
            let notified = self.queue.work_notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.queue.get_next_job_for(self.config.name.as_deref()).await {
                Ok(Some(job)) => {
                    let worker = self.clone();
                    self.tracker.spawn(async move {
                        worker.process_job(job).await;
                        drop(permit);
                    });
                }
                Ok(None) => {
                    drop(permit);
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = &mut notified => {}
                        _ = self.queue.clock().sleep(self.config.poll_interval()) => {}
                    }
                }
                Err(QueueError::Closed) => break,
                Err(e) => {
                    drop(permit);
                    error!(worker = %self.id, "Failed to claim job: {}", e);
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = self.queue.clock().sleep(self.config.poll_interval()) => {}
                    }
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!(worker = %self.id, "Worker stopped");
    }

    async fn process_job(&self, claimed: Job) {
        let token = Uuid::new_v4();
        let job = match self.queue.take_lock(&claimed.id, token).await {
            Ok(job) => job,
            Err(e) => {
                warn!(worker = %self.id, job_id = %claimed.id, "Skipping job: {}", e);
                return;
            }
        };

        debug!(worker = %self.id, job_id = %job.id, name = %job.name, "Processing job");

        let cancel = CancellationToken::new();
        let active = ActiveJob::new(job.clone(), self.queue.clone(), cancel.clone());
        let processor = self.processor.clone();
        let mut task = tokio::spawn(async move { processor.process(active).await });

        let outcome = match job.options.timeout {
            Some(timeout) => tokio::select! {
                joined = &mut task => flatten(joined),
                _ = self.queue.clock().sleep(timeout) => {
                    cancel.cancel();
                    task.abort();
                    Err(QueueError::Timeout(timeout))
                }
            },
            None => flatten(task.await),
        };

        match outcome {
            Ok(result) => {
                if let Err(e) = self.queue.complete_job(&job, result).await {
                    warn!(worker = %self.id, job_id = %job.id, "Could not complete job: {}", e);
                } else {
                    self.completed.fetch_add(1, Ordering::SeqCst);
                }
            }
            Err(error) => {
                self.failed.fetch_add(1, Ordering::SeqCst);
                debug!(worker = %self.id, job_id = %job.id, "Attempt failed: {}", error);
                if let Err(e) = self.queue.fail_job(&job, &error).await {
                    warn!(worker = %self.id, job_id = %job.id, "Could not record failure: {}", e);
                }
            }
        }
    }

    /// Stop claiming and wait for in-flight jobs to settle.
    pub async fn close(&self) {
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

fn flatten(
    joined: Result<anyhow::Result<serde_json::Value>, JoinError>,
) -> Result<serde_json::Value, QueueError> {
    match joined {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(QueueError::Processing(format!("{e:#}"))),
        Err(e) if e.is_panic() => {
            let payload = e.into_panic();
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(QueueError::Processing(format!("processor panicked: {}", message)))
        }
        Err(_) => Err(QueueError::Processing("processor task was cancelled".to_string())),
    }
}

/// Owning handle to a running worker.
pub struct WorkerHandle {
    worker: Arc<Worker>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Spawn the worker loop. The loop runs inside the worker's own tracker,
    /// so `close` also waits for the loop itself.
    pub fn spawn(worker: Arc<Worker>) -> Self {
        let join = worker.tracker.spawn(worker.clone().run());
        Self { worker, join }
    }

    pub fn id(&self) -> &str {
        self.worker.id()
    }

    pub fn worker(&self) -> &Arc<Worker> {
        &self.worker
    }

    pub fn stats(&self) -> WorkerStats {
        self.worker.stats()
    }

    pub fn pause(&self) {
        self.worker.pause()
    }

    pub fn resume(&self) {
        self.worker.resume()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Stop the worker and wait for its in-flight jobs.
    pub async fn close(self) {
        self.worker.close().await;
        if let Err(e) = self.join.await {
            error!(worker = %self.worker.id, "Worker loop ended abnormally: {}", e);
        }
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
