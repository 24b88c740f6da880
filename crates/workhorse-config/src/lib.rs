//! # Workhorse Config
//!
//! TOML configuration for the Workhorse binary: queue and worker settings,
//! logging, and jobs to seed at startup.

mod error;
mod loader;
mod schema;
mod validator;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::*;
pub use validator::{ConfigValidator, ValidationError, ValidationResult, ValidationWarning};
