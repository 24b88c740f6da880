//! Injectable time source.
//!
//! Every timer in the crate (delays, repeat schedules, processor timeouts)
//! goes through a [`Clock`]. The default [`SystemClock`] anchors wall time to
//! the tokio monotonic clock, so tests running with a paused runtime
//! (`#[tokio::test(start_paused = true)]`) advance it deterministically.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};

/// Time capability used by the queue, scheduler and workers.
#[async_trait]
pub trait Clock: Send + Sync + 'static {
    /// Current wall-clock time.
    fn now(&self) -> DateTime<Utc>;

    /// Sleep until the given instant. Returns immediately if it has passed.
    async fn sleep_until(&self, deadline: DateTime<Utc>);

    /// Sleep for a duration.
    async fn sleep(&self, duration: Duration) {
        let deadline = add_duration(self.now(), duration);
        self.sleep_until(deadline).await;
    }
}

/// Clock backed by tokio's timer.
pub struct SystemClock {
    base_wall: DateTime<Utc>,
    base_instant: tokio::time::Instant,
}

impl SystemClock {
    /// Create a clock anchored at the current time.
    pub fn new() -> Self {
        Self {
            base_wall: Utc::now(),
            base_instant: tokio::time::Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = TimeDelta::from_std(self.base_instant.elapsed()).unwrap_or(TimeDelta::zero());
        self.base_wall + elapsed
    }

    async fn sleep_until(&self, deadline: DateTime<Utc>) {
        // Absolute target on the monotonic clock, so repeated waits do not drift.
        let offset = (deadline - self.base_wall).to_std().unwrap_or(Duration::ZERO);
        tokio::time::sleep_until(self.base_instant + offset).await;
    }
}

/// Add a std duration to a timestamp, saturating at the maximum representable time.
pub fn add_duration(at: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(duration)
        .ok()
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Subtract a std duration from a timestamp, saturating at the minimum representable time.
pub fn sub_duration(at: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(duration)
        .ok()
        .and_then(|delta| at.checked_sub_signed(delta))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
