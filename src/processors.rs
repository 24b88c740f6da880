//! Built-in demo processors, dispatched by job name.
//!
//! - `echo` completes with the job data.
//! - `sleep` waits `data.ms` milliseconds (default 100), reporting progress.
//! - `fail` fails with `data.message`.

use std::time::Duration;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use workhorse_queue::{ActiveJob, Processor};

const DEFAULT_SLEEP_MS: u64 = 100;
const SLEEP_STEPS: u64 = 4;

pub(crate) struct DemoProcessor;

#[async_trait]
impl Processor for DemoProcessor {
    async fn process(&self, job: ActiveJob) -> anyhow::Result<Value> {
        match job.name() {
            "echo" => Ok(job.data().clone()),
            "sleep" => sleep(&job).await,
            "fail" => {
                let message = job
                    .data()
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("requested failure");
                bail!("{}", message)
            }
            other => Err(anyhow!("no processor for job '{}'", other)),
        }
    }
}

async fn sleep(job: &ActiveJob) -> anyhow::Result<Value> {
    let ms = job
        .data()
        .get("ms")
        .and_then(Value::as_u64)
        .unwrap_or(DEFAULT_SLEEP_MS);
    let step = Duration::from_millis(ms / SLEEP_STEPS);

    for i in 1..=SLEEP_STEPS {
        tokio::select! {
            _ = job.cancelled() => bail!("cancelled after {} of {} steps", i - 1, SLEEP_STEPS),
            _ = tokio::time::sleep(step) => {}
        }
        job.progress((i * 100 / SLEEP_STEPS) as u8).await?;
    }

    debug!(job_id = %job.id(), ms, "Sleep finished");
    job.log(format!("slept {}ms", ms)).await?;
    Ok(json!({ "slept_ms": ms }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use workhorse_queue::{JobOptions, JobState, Queue, QueueEvent};

    async fn run_one(name: &str, data: Value) -> (Queue, QueueEvent) {
        let queue = Queue::new("demo");
        let mut events = queue.subscribe();
        let handle = queue.add(name, data, JobOptions::default()).await.unwrap();
        let worker = queue.process(None, 1, DemoProcessor).unwrap();

        let outcome = loop {
            match events.recv().await.unwrap() {
                event @ (QueueEvent::Completed { .. } | QueueEvent::Failed { .. }) => break event,
                _ => {}
            }
        };
        worker.close().await;
        assert!(handle.state().await.unwrap().is_some());
        (queue, outcome)
    }

    #[tokio::test]
    async fn test_echo_returns_data() {
        let (_queue, event) = run_one("echo", json!({"hello": "world"})).await;
        match event {
            QueueEvent::Completed { result, .. } => assert_eq!(result, json!({"hello": "world"})),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_reports_progress() {
        let (queue, event) = run_one("sleep", json!({"ms": 40})).await;
        let QueueEvent::Completed { job, result } = event else {
            panic!("expected completion");
        };
        assert_eq!(result, json!({"slept_ms": 40}));

        let stored = queue.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.progress, 100);
        assert_eq!(queue.get_job_logs(&job.id).await.unwrap(), vec!["slept 40ms"]);
    }

    #[tokio::test]
    async fn test_fail_uses_message() {
        let (queue, event) = run_one("fail", json!({"message": "boom"})).await;
        let QueueEvent::Failed { job, error } = event else {
            panic!("expected failure");
        };
        assert!(error.contains("boom"));
        assert_eq!(queue.get_job_state(&job.id).await.unwrap(), Some(JobState::Failed));
    }

    #[tokio::test]
    async fn test_unknown_name_fails() {
        let (_queue, event) = run_one("resize", Value::Null).await;
        let QueueEvent::Failed { error, .. } = event else {
            panic!("expected failure");
        };
        assert!(error.contains("no processor for job 'resize'"));
    }
}
