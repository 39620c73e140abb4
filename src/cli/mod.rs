//! Command-line interface for superscaler.
//!
//! Provides the `run` pipeline command and the read-only `scan` command.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands, ConfigArgs, RunArgs, ScanArgs};
