//! Results, streaming updates and errors of sandbox runs.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Final log line of a passing run.
pub const SUCCESS_MARKER: &str = "[SUCCESS] All tests passed.";
/// Final log line of a failing run.
pub const FAILURE_MARKER: &str = "[FAILURE] Some tests failed.";

/// Outcome of one sandbox invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxResult {
    /// Exit code of the test command; -1 when killed or unavailable.
    pub exit_code: i32,
    /// Output lines in arrival order, ending with the status marker.
    pub log: Vec<String>,
    /// Exit code 0 and not timed out.
    pub succeeded: bool,
    /// The test command outlived its deadline and was killed.
    pub timed_out: bool,
    /// Wall time including materialization and installation.
    pub duration: Duration,
}

impl SandboxResult {
    /// The log as one newline-terminated text, as stored in `TEST_RESULTS.log`.
    pub fn log_text(&self) -> String {
        render_log(&self.log)
    }
}

/// Joins log lines into the text stored under `TEST_RESULTS.log`.
pub fn render_log(lines: &[String]) -> String {
    let mut text = lines.join("\n");
    if !text.is_empty() {
        text.push('\n');
    }
    text
}

/// One item of a streaming sandbox run.
#[derive(Debug)]
pub enum SandboxUpdate {
    /// Snapshot of the log after a new line arrived.
    Output { log: Vec<String> },
    /// The run is over. Always the last item.
    Finished(Result<SandboxResult, SandboxError>),
}

/// Infrastructure failures. A failing test suite is not an error.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Sandbox setup failed: {0}")]
    Setup(String),

    #[error("Failed to write '{path}': {source}")]
    Materialize {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Output of a single script run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptOutput {
    pub output: String,
    pub error: String,
    pub exit_code: i32,
    pub timed_out: bool,
}
