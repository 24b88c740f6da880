//! Typed queue notifications.
//!
//! The queue emits [`QueueEvent`]s on a broadcast channel; observers call
//! [`crate::Queue::subscribe`]. The core never consumes its own events.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::job::{Job, JobId, JobState};

/// Queue notification.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    /// A job entered the waiting collection.
    Waiting { job_id: JobId },
    /// A job was parked until `until`.
    Delayed { job_id: JobId, until: DateTime<Utc> },
    /// A job was claimed.
    Active { job: Job },
    /// A job completed.
    Completed { job: Job, result: serde_json::Value },
    /// An attempt failed. `job.state` tells whether it will be retried.
    Failed { job: Job, error: String },
    /// Progress was reported for an active job.
    Progress { job: Job, progress: u8 },
    /// Dispatch was paused.
    Paused,
    /// Dispatch was resumed.
    Resumed,
    /// A claim took the last waiting job.
    Drained,
    /// Finished jobs were evicted by `clean`.
    Cleaned { jobs: Vec<Job>, status: JobState },
    /// A job was removed.
    Removed { job: Job },
    /// Internal bookkeeping error that was logged and swallowed.
    Error { message: String },
}

impl QueueEvent {
    /// Short event name, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            QueueEvent::Waiting { .. } => "waiting",
            QueueEvent::Delayed { .. } => "delayed",
            QueueEvent::Active { .. } => "active",
            QueueEvent::Completed { .. } => "completed",
            QueueEvent::Failed { .. } => "failed",
            QueueEvent::Progress { .. } => "progress",
            QueueEvent::Paused => "paused",
            QueueEvent::Resumed => "resumed",
            QueueEvent::Drained => "drained",
            QueueEvent::Cleaned { .. } => "cleaned",
            QueueEvent::Removed { .. } => "removed",
            QueueEvent::Error { .. } => "error",
        }
    }
}

/// Broadcast fan-out for queue events.
pub struct EventBus {
    sender: broadcast::Sender<QueueEvent>,
}

impl EventBus {
    /// Create a bus. Slow subscribers lag once `capacity` events are buffered.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to future events.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.sender.subscribe()
    }

    /// Emit an event. Having no subscribers is not an error.
    pub fn emit(&self, event: QueueEvent) {
        let _ = self.sender.send(event);
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_without_subscribers() {
        let bus = EventBus::new(8);
        bus.emit(QueueEvent::Paused);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscribers_receive_in_order() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.emit(QueueEvent::Paused);
        bus.emit(QueueEvent::Resumed);

        assert_eq!(rx.recv().await.unwrap().kind(), "paused");
        assert_eq!(rx.recv().await.unwrap().kind(), "resumed");
    }
}
