//! Configuration validation.

use std::collections::HashSet;

use crate::error::ConfigError;
use crate::schema::{Config, SeedJob, JOB_OPTION_KEYS};

/// Validation result.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }
}

/// A validation error.
#[derive(Debug)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A validation warning.
#[derive(Debug)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

const LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "off"];

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration.
    pub fn validate(config: &Config) -> Result<ValidationResult, ConfigError> {
        let mut result = ValidationResult::default();

        Self::validate_queue(config, &mut result);
        Self::validate_worker(config, &mut result);
        Self::validate_logging(config, &mut result);
        Self::validate_jobs(config, &mut result);

        Ok(result)
    }

    fn validate_queue(config: &Config, result: &mut ValidationResult) {
        if config.queue.name.trim().is_empty() {
            result.add_error(ValidationError::new("queue.name", "Queue name cannot be empty"));
        }

        if config.queue.event_capacity == 0 {
            result.add_error(ValidationError::new(
                "queue.event_capacity",
                "event_capacity must be greater than 0",
            ));
        }

        if config.queue.stacktrace_limit == 0 {
            result.add_warning(ValidationWarning::new(
                "queue.stacktrace_limit",
                "stacktrace_limit is 0, stacktraces of failing jobs grow without bound",
            ));
        }
    }

    fn validate_worker(config: &Config, result: &mut ValidationResult) {
        if config.worker.concurrency == 0 {
            result.add_error(ValidationError::new(
                "worker.concurrency",
                "concurrency must be greater than 0",
            ));
        }

        if config.worker.concurrency > 256 {
            result.add_warning(ValidationWarning::new(
                "worker.concurrency",
                "concurrency is very high (>256)",
            ));
        }

        if config.worker.poll_interval_ms == 0 {
            result.add_error(ValidationError::new(
                "worker.poll_interval_ms",
                "poll_interval_ms must be greater than 0",
            ));
        }

        if let Some(name) = &config.worker.name {
            if !config.jobs.is_empty() && !config.jobs.iter().any(|job| &job.name == name) {
                result.add_warning(ValidationWarning::new(
                    "worker.name",
                    format!("No seeded job is named '{}', the worker will only see jobs added later", name),
                ));
            }
        }
    }

    fn validate_logging(config: &Config, result: &mut ValidationResult) {
        // A bare level must be a known one; directives with targets are left
        // to the filter parser.
        let level = config.logging.level.trim();
        if !level.contains('=') && !LEVELS.contains(&level.to_ascii_lowercase().as_str()) {
            result.add_error(ValidationError::new(
                "logging.level",
                format!("Unknown log level '{}', valid values: {:?}", level, LEVELS),
            ));
        }

        if config.logging.dir.is_some() && config.logging.max_files == 0 {
            result.add_warning(ValidationWarning::new(
                "logging.max_files",
                "max_files is 0, rolled log files are never deleted",
            ));
        }
    }

    fn validate_jobs(config: &Config, result: &mut ValidationResult) {
        let mut job_ids = HashSet::new();

        for (index, job) in config.jobs.iter().enumerate() {
            let path = format!("jobs[{}]", index);

            if job.name.trim().is_empty() {
                result.add_error(ValidationError::new(
                    format!("{}.name", path),
                    "Job name cannot be empty",
                ));
            }

            if job.count == 0 {
                result.add_warning(ValidationWarning::new(
                    format!("{}.count", path),
                    "count is 0, the job will not be added",
                ));
            }

            for key in job.options.keys() {
                if !JOB_OPTION_KEYS.contains(&key.as_str()) {
                    result.add_warning(ValidationWarning::new(
                        format!("{}.options.{}", path, key),
                        format!("Unknown job option '{}', it will be ignored", key),
                    ));
                }
            }

            Self::validate_job_options(job, &path, result);

            if let Some(id) = job.options.get("job_id").and_then(|v| v.as_str()) {
                if job.count > 1 {
                    result.add_warning(ValidationWarning::new(
                        format!("{}.options.job_id", path),
                        "job_id with count > 1 adds the job only once",
                    ));
                }
                if !job_ids.insert(id.to_string()) {
                    result.add_error(ValidationError::new(
                        format!("{}.options.job_id", path),
                        format!("Duplicate job_id '{}'", id),
                    ));
                }
            }
        }
    }

    fn validate_job_options(job: &SeedJob, path: &str, result: &mut ValidationResult) {
        let options = &job.options;

        if let Some(attempts) = options.get("attempts").and_then(|v| v.as_integer()) {
            if attempts < 1 {
                result.add_error(ValidationError::new(
                    format!("{}.options.attempts", path),
                    "attempts must be at least 1",
                ));
            }
        }

        for key in ["delay", "timeout"] {
            if let Some(value) = options.get(key).and_then(|v| v.as_integer()) {
                if value < 0 {
                    result.add_error(ValidationError::new(
                        format!("{}.options.{}", path, key),
                        format!("{} must be a non-negative number of milliseconds", key),
                    ));
                }
            }
        }

        if let Some(repeat) = options.get("repeat") {
            match repeat.as_table() {
                Some(table) => {
                    let every = table.contains_key("every");
                    let cron = table.contains_key("cron");
                    if every == cron {
                        result.add_error(ValidationError::new(
                            format!("{}.options.repeat", path),
                            "repeat needs exactly one of 'every' or 'cron'",
                        ));
                    }
                    if every && job.count > 1 {
                        result.add_warning(ValidationWarning::new(
                            format!("{}.options.repeat", path),
                            "a repeatable job is registered once regardless of count",
                        ));
                    }
                }
                None => result.add_error(ValidationError::new(
                    format!("{}.options.repeat", path),
                    "repeat must be a table",
                )),
            }
        }

        if let Some(backoff) = options.get("backoff") {
            let kind = backoff.get("kind").and_then(|v| v.as_str());
            if !matches!(kind, Some("fixed") | Some("exponential")) {
                result.add_error(ValidationError::new(
                    format!("{}.options.backoff.kind", path),
                    "backoff.kind must be 'fixed' or 'exponential'",
                ));
            }
        }
    }
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
