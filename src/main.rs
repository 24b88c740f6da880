//! workhorse - in-process job queue
//!
//! Main entry point for the workhorse CLI.

mod cli;
mod processors;

use std::path::Path;

use clap::Parser;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, error, info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use workhorse_config::{Config, ConfigLoader, ConfigValidator, LoggingConfig};
use workhorse_queue::{JobOptions, Queue, QueueConfig, QueueEvent, WorkerConfig, WorkerStats};

use crate::cli::{Cli, Commands};
use crate::processors::DemoProcessor;

/// Initialize tracing with console output and, when `logging.dir` is set,
/// a daily rolling log file.
fn init_tracing(logging: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))?;

    let console = if logging.json {
        fmt::layer().json().boxed()
    } else {
        fmt::layer().with_target(true).with_ansi(true).boxed()
    };

    let file = match &logging.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix(&logging.file_prefix)
                .filename_suffix("log")
                .max_log_files(logging.max_files)
                .build(dir)?;
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);

            // Dropping the guard stops the background writer.
            static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
                std::sync::OnceLock::new();
            let _ = GUARD.set(guard);

            Some(fmt::layer().with_writer(non_blocking).with_ansi(false))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console)
        .with(file)
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run { drain: false }) {
        Commands::Run { drain } => run(cli.config.as_deref(), drain).await,
        Commands::Check => check(cli.config.as_deref()),
    }
}

/// Validate the configuration and print findings.
fn check(path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = ConfigLoader::load_or_default(path)?;
    let result = ConfigValidator::validate(&config)?;

    for warning in &result.warnings {
        println!("warning: {}: {}", warning.path, warning.message);
    }
    for error in &result.errors {
        println!("error: {}: {}", error.path, error.message);
    }

    if !result.is_valid() {
        return Err(format!("configuration has {} error(s)", result.errors.len()).into());
    }

    println!(
        "Configuration OK: queue '{}', {} seed job(s)",
        config.queue.name,
        config.jobs.len()
    );
    Ok(())
}

/// Run the queue in the foreground.
async fn run(path: Option<&Path>, drain: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = ConfigLoader::load_or_default(path)?;
    init_tracing(&config.logging)?;

    let result = ConfigValidator::validate(&config)?;
    for warning in &result.warnings {
        warn!(path = %warning.path, "{}", warning.message);
    }
    if !result.is_valid() {
        for error in &result.errors {
            error!(path = %error.path, "{}", error.message);
        }
        return Err(format!("configuration has {} error(s)", result.errors.len()).into());
    }

    info!("Starting workhorse v{}", env!("CARGO_PKG_VERSION"));

    let queue = Queue::builder(&config.queue.name)
        .config(QueueConfig {
            stacktrace_limit: config.queue.stacktrace_limit,
            event_capacity: config.queue.event_capacity,
        })
        .build();
    let events = queue.subscribe();

    seed_jobs(&queue, &config).await?;

    let repeatables = queue.get_repeatable_jobs().len();
    if drain && repeatables > 0 {
        warn!(repeatables, "Repeatable jobs never settle, --drain waits for Ctrl-C");
    }

    let worker = queue.process_with(
        WorkerConfig {
            concurrency: config.worker.concurrency,
            poll_interval_ms: config.worker.poll_interval_ms,
            name: config.worker.name.clone(),
        },
        DemoProcessor,
    )?;
    info!(
        queue = %queue.name(),
        worker = %worker.id(),
        concurrency = config.worker.concurrency,
        "workhorse ready"
    );

    let watcher = tokio::spawn(watch_events(queue.clone(), events, drain && repeatables == 0));

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Received Ctrl-C");
        }
        joined = watcher => {
            if let Err(e) = joined {
                error!("Event watcher failed: {}", e);
            }
        }
    }

    info!("Shutting down...");
    queue.close().await;

    let stats = worker.stats();
    worker.close().await;
    info!("{}", summary(&stats));
    Ok(())
}

/// Add the `[[jobs]]` declared in the configuration.
async fn seed_jobs(queue: &Queue, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    for seed in &config.jobs {
        let data = seed.data_json()?;
        let options: JobOptions = serde_json::from_value(seed.options_json()?)?;

        // Repeatables and fixed IDs would collide with themselves.
        let copies = if options.repeat.is_some() || options.job_id.is_some() {
            seed.count.min(1)
        } else {
            seed.count
        };

        for _ in 0..copies {
            let handle = queue.add(&seed.name, data.clone(), options.clone()).await?;
            debug!(job_id = %handle.id(), name = %seed.name, "Seeded job");
        }
        info!(name = %seed.name, copies, "Seeded jobs");
    }
    Ok(())
}

/// Log queue events. Returns once the queue has settled when `drain` is
/// set, or when the event stream ends.
async fn watch_events(queue: Queue, mut events: broadcast::Receiver<QueueEvent>, drain: bool) {
    if drain && settled(&queue).await {
        return;
    }

    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event watcher lagged");
                if drain && settled(&queue).await {
                    return;
                }
                continue;
            }
            Err(RecvError::Closed) => return,
        };

        let may_settle = match &event {
            QueueEvent::Completed { job, result } => {
                info!(job_id = %job.id, name = %job.name, %result, "Job completed");
                true
            }
            QueueEvent::Failed { job, error } => {
                warn!(job_id = %job.id, name = %job.name, state = %job.state, "Job failed: {}", error);
                true
            }
            QueueEvent::Drained => {
                debug!("Queue drained");
                true
            }
            QueueEvent::Error { message } => {
                error!("Queue error: {}", message);
                false
            }
            other => {
                debug!(event = ?other, "Queue event");
                false
            }
        };

        if drain && may_settle && settled(&queue).await {
            return;
        }
    }
}

/// Whether nothing is waiting, delayed or active.
async fn settled(queue: &Queue) -> bool {
    match queue.get_job_counts().await {
        Ok(counts) if counts.waiting + counts.delayed + counts.active == 0 => {
            info!(completed = counts.completed, failed = counts.failed, "All jobs settled");
            true
        }
        Ok(_) => false,
        Err(e) => {
            warn!("Could not read job counts: {}", e);
            true
        }
    }
}

fn summary(stats: &WorkerStats) -> String {
    format!(
        "Worker {} processed {} job(s), {} failed attempt(s)",
        stats.id, stats.completed, stats.failed
    )
}
