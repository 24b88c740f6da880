//! # Workhorse Queue
//!
//! In-process job queue with priority dispatch and bounded worker pools.
//!
//! ## Features
//!
//! - Priority and LIFO ordering with linearizable claims
//! - Worker pools with per-job timeouts and panic isolation
//! - Retries with fixed or exponential backoff
//! - Delayed jobs and repeatable jobs (interval or cron)
//! - Retention policies, `clean` and bulk removal
//! - Typed event stream for observers
//!
//! ```no_run
//! use serde_json::json;
//! use workhorse_queue::{ActiveJob, JobOptions, Queue};
//!
//! # async fn demo() -> workhorse_queue::QueueResult<()> {
//! let queue = Queue::new("email");
//! queue.add("welcome", json!({"to": "a@example.com"}), JobOptions::default()).await?;
//!
//! let worker = queue.process(None, 4, |job: ActiveJob| async move {
//!     Ok::<_, anyhow::Error>(json!({"sent": job.data()["to"]}))
//! })?;
//!
//! queue.close().await;
//! # drop(worker);
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod cron;
pub mod error;
pub mod events;
pub mod handle;
pub mod job;
pub mod queue;
mod queue_state;
pub mod registry;
pub mod scheduler;
pub mod worker;

pub use clock::{Clock, SystemClock};
pub use config::{QueueConfig, WorkerConfig};
pub use cron::{CronEvaluator, StandardCron};
pub use error::{QueueError, QueueResult};
pub use events::{EventBus, QueueEvent};
pub use handle::{ActiveJob, JobHandle};
pub use job::{Backoff, BackoffKind, Job, JobId, JobOptions, JobState, RepeatOptions, Retention};
pub use queue::{Queue, QueueBuilder};
pub use queue_state::JobCounts;
pub use registry::QueueRegistry;
pub use scheduler::RepeatableDefinition;
pub use worker::{Processor, Worker, WorkerHandle, WorkerStats};
