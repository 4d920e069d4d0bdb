//! Command-line interface for trainforge.
//!
//! Provides the long-running saver and worker processes plus one-shot
//! commands to submit, cancel and inspect jobs.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
