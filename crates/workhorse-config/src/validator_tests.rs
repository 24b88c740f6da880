
    use super::*;
    use crate::loader::ConfigLoader;

    fn validate_str(content: &str) -> ValidationResult {
        let config = ConfigLoader::load_str(content).unwrap();
        ConfigValidator::validate(&config).unwrap()
    }

    #[test]
    fn test_validate_default_config() {
        let config = Config::default();
        let result = ConfigValidator::validate(&config).unwrap();
        assert!(result.is_valid());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_validate_empty_queue_name() {
        let mut config = Config::default();
        config.queue.name = "  ".to_string();

        let result = ConfigValidator::validate(&config).unwrap();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.path == "queue.name"));
    }

    #[test]
    fn test_validate_zero_event_capacity() {
        let mut config = Config::default();
        config.queue.event_capacity = 0;

        let result = ConfigValidator::validate(&config).unwrap();
        assert!(result.errors.iter().any(|e| e.path == "queue.event_capacity"));
    }

    #[test]
    fn test_validate_unlimited_stacktrace_warning() {
        let mut config = Config::default();
        config.queue.stacktrace_limit = 0;

        let result = ConfigValidator::validate(&config).unwrap();
        assert!(result.is_valid());
        assert!(result.warnings.iter().any(|w| w.path == "queue.stacktrace_limit"));
    }

    #[test]
    fn test_validate_zero_concurrency() {
        let mut config = Config::default();
        config.worker.concurrency = 0;

        let result = ConfigValidator::validate(&config).unwrap();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.path == "worker.concurrency"));
    }

    #[test]
    fn test_validate_high_concurrency_warning() {
        let mut config = Config::default();
        config.worker.concurrency = 1000;

        let result = ConfigValidator::validate(&config).unwrap();
        assert!(result.is_valid());
        assert!(!result.warnings.is_empty());
    }

    #[test]
    fn test_validate_zero_poll_interval() {
        let mut config = Config::default();
        config.worker.poll_interval_ms = 0;

        let result = ConfigValidator::validate(&config).unwrap();
        assert!(result.errors.iter().any(|e| e.path == "worker.poll_interval_ms"));
    }

    #[test]
    fn test_validate_log_levels() {
        let mut config = Config::default();
        config.logging.level = "loud".to_string();
        let result = ConfigValidator::validate(&config).unwrap();
        assert!(result.errors.iter().any(|e| e.path == "logging.level"));

        config.logging.level = "WARN".to_string();
        assert!(ConfigValidator::validate(&config).unwrap().is_valid());

        config.logging.level = "info,workhorse_queue=debug".to_string();
        assert!(ConfigValidator::validate(&config).unwrap().is_valid());
    }

    #[test]
    fn test_validate_seed_jobs_valid() {
        let result = validate_str(
            r#"
            [[jobs]]
            name = "email"
            data = { to = "a@x" }
            options = { priority = 5, attempts = 3, backoff = { kind = "exponential", delay = 100 } }

            [[jobs]]
            name = "digest"
            options = { repeat = { cron = "0 * * * * *" } }
            "#,
        );
        assert!(result.is_valid(), "{:?}", result.errors);
        assert!(result.warnings.is_empty(), "{:?}", result.warnings);
    }

    #[test]
    fn test_validate_empty_job_name() {
        let result = validate_str("[[jobs]]\nname = \"\"");
        assert!(result.errors.iter().any(|e| e.path == "jobs[0].name"));
    }

    #[test]
    fn test_validate_zero_attempts() {
        let result = validate_str("[[jobs]]\nname = \"a\"\noptions = { attempts = 0 }");
        assert!(result.errors.iter().any(|e| e.path == "jobs[0].options.attempts"));
    }

    #[test]
    fn test_validate_negative_delay() {
        let result = validate_str("[[jobs]]\nname = \"a\"\noptions = { delay = -5 }");
        assert!(result.errors.iter().any(|e| e.path == "jobs[0].options.delay"));
    }

    #[test]
    fn test_validate_repeat_needs_one_schedule() {
        let both = validate_str(
            "[[jobs]]\nname = \"a\"\noptions = { repeat = { every = 1000, cron = \"* * * * * *\" } }",
        );
        assert!(both.errors.iter().any(|e| e.path == "jobs[0].options.repeat"));

        let neither = validate_str("[[jobs]]\nname = \"a\"\noptions = { repeat = { tz = \"+02:00\" } }");
        assert!(!neither.is_valid());

        let scalar = validate_str("[[jobs]]\nname = \"a\"\noptions = { repeat = 5 }");
        assert!(!scalar.is_valid());
    }

    #[test]
    fn test_validate_unknown_backoff_kind() {
        let result = validate_str(
            "[[jobs]]\nname = \"a\"\noptions = { backoff = { kind = \"linear\", delay = 10 } }",
        );
        assert!(result.errors.iter().any(|e| e.path == "jobs[0].options.backoff.kind"));
    }

    #[test]
    fn test_validate_duplicate_job_id() {
        let result = validate_str(
            r#"
            [[jobs]]
            name = "a"
            options = { job_id = "once" }

            [[jobs]]
            name = "b"
            options = { job_id = "once" }
            "#,
        );
        assert!(result.errors.iter().any(|e| e.path == "jobs[1].options.job_id"));
    }

    #[test]
    fn test_validate_unknown_option_warning() {
        let result = validate_str("[[jobs]]\nname = \"a\"\noptions = { priorty = 1 }");
        assert!(result.is_valid());
        assert!(result.warnings.iter().any(|w| w.path == "jobs[0].options.priorty"));
    }

    #[test]
    fn test_validate_zero_count_warning() {
        let result = validate_str("[[jobs]]\nname = \"a\"\ncount = 0");
        assert!(result.is_valid());
        assert!(result.warnings.iter().any(|w| w.path == "jobs[0].count"));
    }

    #[test]
    fn test_validate_worker_name_without_matching_job() {
        let result = validate_str(
            r#"
            [worker]
            name = "send"

            [[jobs]]
            name = "digest"
            "#,
        );
        assert!(result.is_valid());
        assert!(result.warnings.iter().any(|w| w.path == "worker.name"));
    }

    #[test]
    fn test_validation_result_helpers() {
        let mut result = ValidationResult::default();
        assert!(result.is_valid());

        result.add_warning(ValidationWarning::new("a", "warn"));
        assert!(result.is_valid());

        result.add_error(ValidationError::new("b", "bad"));
        assert!(!result.is_valid());
        assert_eq!(result.errors[0].path, "b");
        assert_eq!(result.warnings[0].message, "warn");
    }
