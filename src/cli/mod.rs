//! Command-line interface for review-forge.
//!
//! Provides commands to run workers, submit tasks, inspect the queue,
//! reconcile drift and print metrics.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
