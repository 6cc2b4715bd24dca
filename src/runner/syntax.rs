//! Standalone syntax checks for generated test files.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

const CHECK_SCRIPT: &str = "import ast, sys; ast.parse(sys.stdin.read(), filename=sys.argv[1])";

/// Checks a single source file without running it.
#[async_trait]
pub trait SyntaxChecker: Send + Sync {
    /// Returns `Err(message)` when `source` does not parse.
    async fn check(&self, path: &str, source: &str) -> Result<(), String>;
}

/// Parses Python sources with the interpreter's `ast` module.
///
/// When the interpreter cannot be started the check passes; the sandbox run
/// reports the real problem later.
#[derive(Debug, Clone)]
pub struct PythonSyntaxChecker {
    python: String,
    timeout: Duration,
}

impl PythonSyntaxChecker {
    pub fn new(python: impl Into<String>) -> Self {
        Self {
            python: python.into(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for PythonSyntaxChecker {
    fn default() -> Self {
        Self::new(super::config::DEFAULT_PYTHON)
    }
}

#[async_trait]
impl SyntaxChecker for PythonSyntaxChecker {
    async fn check(&self, path: &str, source: &str) -> Result<(), String> {
        let spawned = Command::new(&self.python)
            .arg("-c")
            .arg(CHECK_SCRIPT)
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(python = %self.python, error = %e, "Syntax check unavailable");
                return Ok(());
            }
        };

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(source.as_bytes()).await {
                tracing::debug!(error = %e, "Failed to feed source to syntax check");
            }
        }

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) if output.status.success() => Ok(()),
            Ok(Ok(output)) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let tail: Vec<&str> = stderr.lines().rev().take(4).collect();
                Err(tail.into_iter().rev().collect::<Vec<_>>().join("\n"))
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Syntax check failed to run");
                Ok(())
            }
            Err(_) => {
                tracing::warn!(path, "Syntax check timed out");
                Ok(())
            }
        }
    }
}

/// Accepts every file.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSyntaxChecker;

#[async_trait]
impl SyntaxChecker for NoopSyntaxChecker {
    async fn check(&self, _path: &str, _source: &str) -> Result<(), String> {
        Ok(())
    }
}
