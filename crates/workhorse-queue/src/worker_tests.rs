
    use super::*;
    use crate::events::QueueEvent;
    use crate::job::{JobOptions, JobState};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::broadcast;

    struct Echo;

    #[async_trait]
    impl Processor for Echo {
        async fn process(&self, job: ActiveJob) -> anyhow::Result<serde_json::Value> {
            Ok(job.data().clone())
        }
    }

    /// Wait for the first event matching `pred`.
    async fn next_matching(
        events: &mut broadcast::Receiver<QueueEvent>,
        pred: impl Fn(&QueueEvent) -> bool,
    ) -> QueueEvent {
        tokio::time::timeout(Duration::from_secs(60), async {
            loop {
                let event = events.recv().await.unwrap();
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("event within timeout")
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_completes_job() {
        let queue = Queue::new("test");
        let mut events = queue.subscribe();
        let worker = queue.process(None, 1, Echo).unwrap();

        queue.add("echo", json!({"hello": "world"}), JobOptions::default()).await.unwrap();

        let event = next_matching(&mut events, |e| matches!(e, QueueEvent::Completed { .. })).await;
        let QueueEvent::Completed { job, result } = event else { unreachable!() };
        assert_eq!(result, json!({"hello": "world"}));
        assert_eq!(job.attempts_made, 1);

        worker.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_closure_processor_and_stats() {
        let queue = Queue::new("test");
        let mut events = queue.subscribe();
        let worker = queue
            .process(None, 2, |job: ActiveJob| async move {
                job.progress(50).await?;
                job.log("halfway").await?;
                Ok::<_, anyhow::Error>(json!(job.attempts_made()))
            })
            .unwrap();

        let handle = queue.add("step", json!(null), JobOptions::default()).await.unwrap();
        next_matching(&mut events, |e| matches!(e, QueueEvent::Completed { .. })).await;

        let job = handle.snapshot().await.unwrap().unwrap();
        assert_eq!(job.progress, 50);
        assert_eq!(job.logs, vec!["halfway"]);

        let stats = worker.stats();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 0);
        assert!(stats.running);

        worker.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_limit() {
        let queue = Queue::new("test");
        let mut events = queue.subscribe();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let (r, p) = (running.clone(), peak.clone());
        let worker = queue
            .process(None, 3, move |_job: ActiveJob| {
                let (running, peak) = (r.clone(), p.clone());
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, anyhow::Error>(serde_json::Value::Null)
                }
            })
            .unwrap();

        for i in 0..10 {
            queue.add(format!("job-{}", i), json!(null), JobOptions::default()).await.unwrap();
        }
        for _ in 0..10 {
            next_matching(&mut events, |e| matches!(e, QueueEvent::Completed { .. })).await;
        }

        assert_eq!(peak.load(Ordering::SeqCst), 3);
        worker.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_processor_error_fails_job() {
        let queue = Queue::new("test");
        let mut events = queue.subscribe();
        let worker = queue
            .process(None, 1, |_job: ActiveJob| async move {
                Err::<serde_json::Value, _>(anyhow::anyhow!("smtp unavailable"))
            })
            .unwrap();

        let handle = queue.add("email", json!(null), JobOptions::default()).await.unwrap();
        let event = next_matching(&mut events, |e| matches!(e, QueueEvent::Failed { .. })).await;
        let QueueEvent::Failed { error, .. } = event else { unreachable!() };
        assert!(error.contains("smtp unavailable"));

        assert_eq!(handle.state().await.unwrap(), Some(JobState::Failed));
        assert_eq!(worker.stats().failed, 1);
        worker.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_processor_fails_job() {
        let queue = Queue::new("test");
        let mut events = queue.subscribe();
        let worker = queue
            .process(None, 1, |job: ActiveJob| async move {
                if job.name() == "explode" {
                    panic!("kaboom");
                }
                Ok::<_, anyhow::Error>(serde_json::Value::Null)
            })
            .unwrap();

        queue.add("explode", json!(null), JobOptions::default()).await.unwrap();
        let event = next_matching(&mut events, |e| matches!(e, QueueEvent::Failed { .. })).await;
        let QueueEvent::Failed { error, .. } = event else { unreachable!() };
        assert!(error.contains("kaboom"));

        // The worker survives the panic.
        queue.add("fine", json!(null), JobOptions::default()).await.unwrap();
        next_matching(&mut events, |e| matches!(e, QueueEvent::Completed { .. })).await;
        worker.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fails_attempt() {
        let queue = Queue::new("test");
        let mut events = queue.subscribe();
        let worker = queue
            .process(None, 1, |job: ActiveJob| async move {
                tokio::select! {
                    _ = job.cancelled() => {}
                    _ = tokio::time::sleep(Duration::from_secs(10)) => {}
                }
                Ok::<_, anyhow::Error>(serde_json::Value::Null)
            })
            .unwrap();

        let handle = queue
            .add(
                "slow",
                json!(null),
                JobOptions::default().with_timeout(Duration::from_millis(100)),
            )
            .await
            .unwrap();

        let event = next_matching(&mut events, |e| matches!(e, QueueEvent::Failed { .. })).await;
        let QueueEvent::Failed { error, .. } = event else { unreachable!() };
        assert_eq!(error, "Job timed out after 100ms");
        assert_eq!(handle.state().await.unwrap(), Some(JobState::Failed));
        worker.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_name_filter() {
        let queue = Queue::new("test");
        let mut events = queue.subscribe();
        let worker = queue.process(Some("email"), 1, Echo).unwrap();

        let sms = queue.add("sms", json!(null), JobOptions::default()).await.unwrap();
        queue.add("email", json!(null), JobOptions::default()).await.unwrap();

        let event = next_matching(&mut events, |e| matches!(e, QueueEvent::Completed { .. })).await;
        let QueueEvent::Completed { job, .. } = event else { unreachable!() };
        assert_eq!(job.name, "email");

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(sms.state().await.unwrap(), Some(JobState::Waiting));
        worker.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_pause_and_resume() {
        let queue = Queue::new("test");
        let mut events = queue.subscribe();
        let worker = queue.process(None, 1, Echo).unwrap();
        worker.pause();
        tokio::task::yield_now().await;

        let handle = queue.add("held", json!(null), JobOptions::default()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(handle.state().await.unwrap(), Some(JobState::Waiting));

        worker.resume();
        next_matching(&mut events, |e| matches!(e, QueueEvent::Completed { .. })).await;
        worker.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_waits_for_in_flight_job() {
        let queue = Queue::new("test");
        let mut events = queue.subscribe();
        let finished = Arc::new(AtomicBool::new(false));

        let flag = finished.clone();
        let worker = queue
            .process(None, 1, move |_job: ActiveJob| {
                let flag = flag.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    flag.store(true, Ordering::SeqCst);
                    Ok::<_, anyhow::Error>(serde_json::Value::Null)
                }
            })
            .unwrap();

        let handle = queue.add("long", json!(null), JobOptions::default()).await.unwrap();
        next_matching(&mut events, |e| matches!(e, QueueEvent::Active { .. })).await;

        queue.close().await;
        assert!(finished.load(Ordering::SeqCst));
        assert!(worker.is_finished());
        assert!(matches!(handle.state().await.unwrap_err(), QueueError::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_does_not_wait_out_poll_interval() {
        let queue = Queue::new("test");
        let config = WorkerConfig {
            poll_interval_ms: 60_000,
            ..WorkerConfig::default()
        };
        let worker = queue.process_with(config, Echo).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(worker.worker().is_running());

        let started = tokio::time::Instant::now();
        worker.close().await;
        assert_eq!(started.elapsed(), Duration::ZERO);
    }
