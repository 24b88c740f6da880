//! CLI definitions for workhorse.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// workhorse CLI.
#[derive(Parser)]
#[command(name = "workhorse")]
#[command(about = "In-process job queue with priorities, retries, delays and repeatable jobs")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path (defaults to ~/.config/workhorse/config.toml when present)
    #[arg(short, long, global = true, env = "WORKHORSE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run a queue with the configured seed jobs (default)
    Run {
        /// Exit once every job has settled instead of waiting for Ctrl-C
        #[arg(long)]
        drain: bool,
    },

    /// Validate the configuration and exit
    Check,
}
