//! Command-line interface for forgeflow.
//!
//! Provides commands for running the generation workflow, verifying an
//! existing project in the sandbox, and running single scripts.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
