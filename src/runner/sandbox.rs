//! Process sandbox: materialize a file set, install dependencies, run tests.
//!
//! Every run gets its own temporary directory. The directory and the child
//! process live exactly as long as the run; dropping a streaming run kills the
//! child and removes the directory.

use std::path::Path;
use std::pin::Pin;
use std::process::Stdio;
use std::time::{Duration, Instant};

use futures::{Stream, StreamExt};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::config::SandboxConfig;
use super::result::{
    SandboxError, SandboxResult, SandboxUpdate, ScriptOutput, FAILURE_MARKER, SUCCESS_MARKER,
};
use crate::workspace::{is_directory_marker, validate_relative_path, FileSet};

/// Stream of updates from one sandbox run.
pub type SandboxStream<'a> = Pin<Box<dyn Stream<Item = SandboxUpdate> + Send + 'a>>;

/// How long to wait for the stderr drain after the process is gone.
const STDERR_GRACE: Duration = Duration::from_secs(1);
/// Per-line wait when draining stdout after the test command has exited.
const DRAIN_WAIT: Duration = Duration::from_millis(20);

/// Runs file sets in isolated temporary directories.
#[derive(Debug, Clone, Default)]
pub struct SandboxRunner {
    config: SandboxConfig,
}

impl SandboxRunner {
    /// Creates a runner with the given configuration.
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Runs `files` to completion and returns the result.
    pub async fn execute(&self, files: &FileSet) -> Result<SandboxResult, SandboxError> {
        let mut updates = self.execute_streaming(files);
        while let Some(update) = updates.next().await {
            if let SandboxUpdate::Finished(result) = update {
                return result;
            }
        }
        Err(SandboxError::Setup(
            "sandbox stream ended without a result".to_string(),
        ))
    }

    /// Runs `files`, yielding a log snapshot after every output line.
    ///
    /// The last item is always [`SandboxUpdate::Finished`].
    pub fn execute_streaming(&self, files: &FileSet) -> SandboxStream<'_> {
        let files = files.clone();

        Box::pin(async_stream::stream! {
            let started = Instant::now();
            let mut log: Vec<String> = Vec::new();

            let dir = match self.create_dir().await {
                Ok(dir) => dir,
                Err(e) => {
                    yield SandboxUpdate::Finished(Err(e));
                    return;
                }
            };
            debug!(dir = %dir.path().display(), files = files.len(), "Materializing sandbox");

            if let Err(e) = materialize(dir.path(), &files, &mut log).await {
                yield SandboxUpdate::Finished(Err(e));
                return;
            }

            if let Some(install) = self.config.install_command.as_ref() {
                if dir.path().join(&self.config.manifest).is_file() {
                    log.push(format!("Installing dependencies from {}...", self.config.manifest));
                    yield SandboxUpdate::Output { log: log.clone() };

                    if let Err(reason) = self.install(dir.path(), install).await {
                        warn!(reason = %reason, "Dependency installation failed");
                        log.push(format!("[WARNING] dependency installation failed: {}", reason));
                        yield SandboxUpdate::Output { log: log.clone() };
                    }
                }
            }

            let Some((program, args)) = self.config.test_command.split_first() else {
                yield SandboxUpdate::Finished(Err(SandboxError::Setup(
                    "test command is empty".to_string(),
                )));
                return;
            };

            let mut command = Command::new(program);
            command
                .args(args)
                .current_dir(dir.path())
                .env("PYTHONPATH", dir.path())
                .envs(self.config.env_vars.iter().map(|(k, v)| (k.as_str(), v.as_str())))
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);

            let mut child = match command.spawn() {
                Ok(child) => child,
                Err(source) => {
                    yield SandboxUpdate::Finished(Err(SandboxError::Spawn {
                        command: self.config.test_command.join(" "),
                        source,
                    }));
                    return;
                }
            };
            info!(command = %self.config.test_command.join(" "), "Running test command");

            let stderr_task = child.stderr.take().map(|stderr| {
                tokio::spawn(async move {
                    let mut buf = String::new();
                    let mut reader = BufReader::new(stderr);
                    reader.read_to_string(&mut buf).await.map(|_| buf)
                })
            });

            let deadline = tokio::time::Instant::now() + self.config.timeout;
            let mut timed_out = false;
            let mut exited: Option<std::process::ExitStatus> = None;

            if let Some(stdout) = child.stdout.take() {
                let mut lines = BufReader::new(stdout).lines();
                loop {
                    if tokio::time::Instant::now() >= deadline {
                        timed_out = true;
                        break;
                    }
                    match tokio::time::timeout(self.config.idle_read_wait, lines.next_line()).await {
                        Ok(Ok(Some(line))) => {
                            log.push(line);
                            yield SandboxUpdate::Output { log: log.clone() };
                        }
                        Ok(Ok(None)) => break,
                        Ok(Err(e)) => {
                            log.push(format!("[ERROR] failed to read test output: {}", e));
                            break;
                        }
                        // Idle. A background process may hold stdout open after
                        // the test command itself has exited.
                        Err(_) => match child.try_wait() {
                            Ok(Some(status)) => {
                                while let Ok(Ok(Some(line))) =
                                    tokio::time::timeout(DRAIN_WAIT, lines.next_line()).await
                                {
                                    log.push(line);
                                }
                                debug!(code = ?status.code(), "Test command exited with stdout still open");
                                exited = Some(status);
                                break;
                            }
                            Ok(None) => continue,
                            Err(e) => {
                                debug!(error = %e, "Failed to poll test command");
                                continue;
                            }
                        },
                    }
                }
            }

            let mut exit_code = -1;
            if let Some(status) = exited {
                exit_code = status.code().unwrap_or(-1);
            } else if !timed_out {
                match tokio::time::timeout_at(deadline, child.wait()).await {
                    Ok(Ok(status)) => exit_code = status.code().unwrap_or(-1),
                    Ok(Err(e)) => log.push(format!("[ERROR] failed to wait for test command: {}", e)),
                    Err(_) => timed_out = true,
                }
            }

            if timed_out {
                if let Err(e) = child.kill().await {
                    debug!(error = %e, "Kill after timeout failed");
                }
                warn!(timeout_secs = self.config.timeout.as_secs(), "Test command timed out");
                log.push(format!(
                    "[TIMEOUT] test command exceeded {:.1}s and was killed",
                    self.config.timeout.as_secs_f64()
                ));
                yield SandboxUpdate::Output { log: log.clone() };
            }

            if let Some(task) = stderr_task {
                match tokio::time::timeout(STDERR_GRACE, task).await {
                    Ok(Ok(Ok(stderr))) if !stderr.trim().is_empty() => {
                        log.push("STDERR:".to_string());
                        log.extend(stderr.lines().map(str::to_string));
                    }
                    Ok(Ok(Err(e))) => debug!(error = %e, "Failed to read stderr"),
                    Ok(Err(e)) => debug!(error = %e, "Stderr task failed"),
                    Err(_) => debug!("Stderr still open after process exit, dropping it"),
                    _ => {}
                }
            }

            let succeeded = exit_code == 0 && !timed_out;
            let marker = if succeeded { SUCCESS_MARKER } else { FAILURE_MARKER };
            log.push(marker.to_string());

            let result = SandboxResult {
                exit_code,
                log,
                succeeded,
                timed_out,
                duration: started.elapsed(),
            };
            info!(
                exit_code = result.exit_code,
                succeeded = result.succeeded,
                timed_out = result.timed_out,
                duration_ms = result.duration.as_millis() as u64,
                "Sandbox run finished"
            );

            drop(dir);
            yield SandboxUpdate::Finished(Ok(result));
        })
    }

    /// Runs one script with the configured interpreter under the sandbox timeout.
    pub async fn run_script(&self, filename: &str, code: &str) -> Result<ScriptOutput, SandboxError> {
        let dir = self.create_dir().await?;
        let relative = validate_relative_path(filename)
            .map_err(|e| SandboxError::Setup(format!("invalid script name: {}", e)))?;
        let path = dir.path().join(&relative);
        write_file(&path, code).await?;

        let child = Command::new(&self.config.python)
            .arg(&relative)
            .current_dir(dir.path())
            .envs(self.config.env_vars.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SandboxError::Spawn {
                command: self.config.python.clone(),
                source,
            })?;

        match tokio::time::timeout(self.config.timeout, child.wait_with_output()).await {
            Ok(output) => {
                let output = output?;
                Ok(ScriptOutput {
                    output: String::from_utf8_lossy(&output.stdout).into_owned(),
                    error: String::from_utf8_lossy(&output.stderr).into_owned(),
                    exit_code: output.status.code().unwrap_or(-1),
                    timed_out: false,
                })
            }
            // The child future was dropped, and kill_on_drop reaped the process.
            Err(_) => Ok(ScriptOutput {
                output: String::new(),
                error: format!(
                    "Script exceeded {}s and was killed",
                    self.config.timeout.as_secs()
                ),
                exit_code: -1,
                timed_out: true,
            }),
        }
    }

    async fn create_dir(&self) -> Result<TempDir, SandboxError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("forgeflow-sandbox-");
        let dir = match self.config.work_root.as_ref() {
            Some(root) => {
                tokio::fs::create_dir_all(root).await?;
                builder.tempdir_in(root)
            }
            None => builder.tempdir(),
        };
        dir.map_err(|e| SandboxError::Setup(format!("failed to create sandbox directory: {}", e)))
    }

    async fn install(&self, dir: &Path, argv: &[String]) -> Result<(), String> {
        let Some((program, args)) = argv.split_first() else {
            return Err("install command is empty".to_string());
        };

        let child = Command::new(program)
            .args(args)
            .current_dir(dir)
            .envs(self.config.env_vars.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("could not spawn '{}': {}", program, e))?;

        match tokio::time::timeout(self.config.install_timeout, child.wait_with_output()).await {
            Ok(Ok(output)) if output.status.success() => Ok(()),
            Ok(Ok(output)) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let last = stderr.lines().last().unwrap_or("").trim().to_string();
                Err(format!(
                    "exit code {}{}",
                    output.status.code().unwrap_or(-1),
                    if last.is_empty() {
                        String::new()
                    } else {
                        format!(": {}", last)
                    }
                ))
            }
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!(
                "timed out after {}s",
                self.config.install_timeout.as_secs()
            )),
        }
    }
}

/// Writes every file under `root`. Unsafe keys are skipped with a log line.
async fn materialize(root: &Path, files: &FileSet, log: &mut Vec<String>) -> Result<(), SandboxError> {
    for (path, content) in files.iter() {
        if is_directory_marker(path) {
            debug!(path, "Skipping directory entry");
            continue;
        }
        let relative = match validate_relative_path(path) {
            Ok(relative) => relative,
            Err(e) => {
                warn!(path, error = %e, "Skipping unsafe path");
                log.push(format!("[WARNING] skipped unsafe path '{}': {}", path, e));
                continue;
            }
        };
        write_file(&root.join(relative), content).await?;
    }
    Ok(())
}

async fn write_file(path: &Path, content: &str) -> Result<(), SandboxError> {
    let materialize_err = |source| SandboxError::Materialize {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(materialize_err)?;
    }
    tokio::fs::write(path, content)
        .await
        .map_err(materialize_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sh_runner(script: &str) -> SandboxRunner {
        SandboxRunner::new(
            SandboxConfig::default()
                .with_test_command(["sh", "-c", script])
                .without_install()
                .with_idle_read_wait(Duration::from_millis(50)),
        )
    }

    #[tokio::test]
    async fn test_passing_command() {
        let files = FileSet::from_pairs([("main.py", "print(1)\n")]).unwrap();
        let result = sh_runner("echo collected 1 item; echo 1 passed; exit 0")
            .execute(&files)
            .await
            .unwrap();

        assert!(result.succeeded);
        assert_eq!(result.exit_code, 0);
        assert!(!result.timed_out);
        assert_eq!(result.log.first().map(String::as_str), Some("collected 1 item"));
        assert_eq!(result.log.last().map(String::as_str), Some(SUCCESS_MARKER));
    }

    #[tokio::test]
    async fn test_failing_command_with_stderr() {
        let files = FileSet::new();
        let result = sh_runner("echo 'E   AssertionError'; echo oops >&2; exit 1")
            .execute(&files)
            .await
            .unwrap();

        assert!(!result.succeeded);
        assert_eq!(result.exit_code, 1);
        let text = result.log_text();
        assert!(text.contains("AssertionError"));
        assert!(text.contains("STDERR:\noops"));
        assert!(text.ends_with(&format!("{}\n", FAILURE_MARKER)));
    }

    #[tokio::test]
    async fn test_files_are_materialized_and_on_pythonpath() {
        let files = FileSet::from_pairs([
            ("pkg/data.txt", "hello"),
            ("assets/", ""),
        ])
        .unwrap();
        let result = sh_runner(
            "cat pkg/data.txt; echo; test -d assets && echo has-assets; test -f \"$PYTHONPATH/pkg/data.txt\" && echo path-ok",
        )
        .execute(&files)
        .await
        .unwrap();

        assert!(result.log.contains(&"hello".to_string()));
        assert!(result.log.contains(&"path-ok".to_string()));
        assert!(!result.log.contains(&"has-assets".to_string()));
    }

    #[tokio::test]
    async fn test_streaming_yields_snapshots_then_result() {
        let runner = sh_runner("echo one; echo two; exit 0");
        let files = FileSet::new();
        let updates: Vec<SandboxUpdate> = runner.execute_streaming(&files).collect().await;

        let snapshots: Vec<&Vec<String>> = updates
            .iter()
            .filter_map(|u| match u {
                SandboxUpdate::Output { log } => Some(log),
                _ => None,
            })
            .collect();
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[1], &vec!["one".to_string(), "two".to_string()]);
        assert!(matches!(updates.last(), Some(SandboxUpdate::Finished(Ok(_)))));
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let runner = SandboxRunner::new(
            SandboxConfig::default()
                .with_test_command(["sh", "-c", "echo started; exec sleep 30"])
                .without_install()
                .with_timeout(Duration::from_millis(500))
                .with_idle_read_wait(Duration::from_millis(50)),
        );
        let started = Instant::now();
        let result = runner.execute(&FileSet::new()).await.unwrap();

        assert!(result.timed_out);
        assert!(!result.succeeded);
        assert!(result.log.iter().any(|l| l.starts_with("[TIMEOUT]")));
        assert_eq!(result.log.last().map(String::as_str), Some(FAILURE_MARKER));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_exit_is_detected_while_background_process_holds_stdout() {
        let runner = SandboxRunner::new(
            SandboxConfig::default()
                .with_test_command(["sh", "-c", "sleep 5 & echo '1 passed'; exit 0"])
                .without_install()
                .with_timeout(Duration::from_secs(3))
                .with_idle_read_wait(Duration::from_millis(50)),
        );
        let started = Instant::now();
        let result = runner.execute(&FileSet::new()).await.unwrap();

        assert!(!result.timed_out);
        assert!(result.succeeded);
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.log.first().map(String::as_str), Some("1 passed"));
        assert_eq!(result.log.last().map(String::as_str), Some(SUCCESS_MARKER));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_install_failure_is_a_warning() {
        let runner = SandboxRunner::new(
            SandboxConfig::default()
                .with_install_command(["sh", "-c", "exit 3"])
                .with_test_command(["sh", "-c", "echo ran; exit 0"])
                .with_idle_read_wait(Duration::from_millis(50)),
        );
        let files = FileSet::from_pairs([("requirements.txt", "nonexistent-pkg\n")]).unwrap();
        let result = runner.execute(&files).await.unwrap();

        assert!(result.succeeded);
        assert!(result
            .log
            .iter()
            .any(|l| l.starts_with("[WARNING] dependency installation failed")));
        assert!(result.log.contains(&"ran".to_string()));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_an_error() {
        let runner = SandboxRunner::new(
            SandboxConfig::default()
                .with_test_command(["/nonexistent/forgeflow-test-binary"])
                .without_install(),
        );
        let result = runner.execute(&FileSet::new()).await;
        assert!(matches!(result, Err(SandboxError::Spawn { .. })));
    }

    #[tokio::test]
    async fn test_work_root_is_cleaned_up() {
        let root = TempDir::new().unwrap();
        let runner = SandboxRunner::new(
            SandboxConfig::default()
                .with_test_command(["sh", "-c", "exit 0"])
                .without_install()
                .with_work_root(root.path()),
        );
        runner.execute(&FileSet::new()).await.unwrap();
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_run_script_with_shell_interpreter() {
        let runner = SandboxRunner::new(SandboxConfig::for_python("sh"));
        let output = runner
            .run_script("hello.sh", "echo hi; echo err >&2; exit 2")
            .await
            .unwrap();
        assert_eq!(output.output, "hi\n");
        assert_eq!(output.error, "err\n");
        assert_eq!(output.exit_code, 2);
        assert!(!output.timed_out);
    }
}
