//! TestWriter step: writes a pytest suite and runs it in the sandbox.
//!
//! The suite is parsed, each test file is syntax-checked on its own (with one
//! corrective call on failure), and the union of the current files and the
//! tests is executed. Log snapshots are relayed as progress events; only the
//! terminal event carries the attempt's delta.

use std::path::Path;
use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, info, warn};

use super::types::{single_file, PipelineStep, StepEvent, StepKind, StepStream};
use crate::llm::{is_unavailable_reply, ResilientBackend};
use crate::parser::{is_python, scan_fences, split_marker, strip_reasoning, with_trailing_newline, ResponseParser};
use crate::pipeline::state::WorkflowState;
use crate::runner::{render_log, SandboxRunner, SandboxUpdate, SyntaxChecker};
use crate::workspace::{FileSet, TEST_RESULTS_FILE};

/// Name given to an unmarked test block.
pub const DEFAULT_TEST_FILE: &str = "tests/test_generated.py";
/// Name of the placeholder suite used when no tests could be generated.
pub const PLACEHOLDER_TEST_FILE: &str = "tests/test_main.py";

const PLACEHOLDER_TEST: &str = r#"import os
import subprocess
import sys

import pytest


def test_script_execution():
    script_path = "src/main.py" if os.path.exists("src/main.py") else "main.py"
    if not os.path.exists(script_path):
        pytest.skip(f"{script_path} not found")
    result = subprocess.run([sys.executable, script_path], capture_output=True, text=True)
    assert result.returncode == 0, result.stderr
"#;

const TEST_WRITER_SYSTEM_PROMPT: &str = r#"You are a QA Engineer.
Your goal is to write a robust Python test suite using `pytest`.

CRITICAL INSTRUCTIONS:
1. Analyze the CODE content and FILE STRUCTURE.
   - Tests run from the project root, which is on PYTHONPATH. Import modules by their path from the root.
   - If `main.py` DOES NOT have a `def main():`, DO NOT try `from main import main`.
   - For scripts, run them with `subprocess.run([sys.executable, "<relative path>"])`.
2. You MUST generate at least one test file under `tests/` (e.g., `tests/test_main.py`).
3. The test content MUST be valid Python code.
4. Put every file in its own fenced code block whose FIRST line is a filename marker:
```python
# filename: tests/test_main.py
...
```
5. Do NOT modify or return the implementation files."#;

const SYNTAX_FIX_SYSTEM_PROMPT: &str = r#"You are a Python syntax fixer.
Fix the SyntaxError in the given code without changing what it tests.
Return ONLY the fixed code."#;

/// Writes and runs the test suite.
pub struct TestWriter {
    backend: ResilientBackend,
    sandbox: SandboxRunner,
    checker: Arc<dyn SyntaxChecker>,
}

impl TestWriter {
    pub fn new(backend: ResilientBackend, sandbox: SandboxRunner, checker: Arc<dyn SyntaxChecker>) -> Self {
        Self {
            backend,
            sandbox,
            checker,
        }
    }

    /// Keeps generated tests that do not overwrite existing implementation files.
    fn accept_tests(generated: FileSet, existing: &FileSet, iteration: usize) -> FileSet {
        let mut tests = FileSet::new();
        for (path, content) in generated.iter() {
            if existing.contains(path) && !is_test_path(path) {
                warn!(step = "test_writer", iteration, path, "Dropping test output that overwrites source");
                continue;
            }
            // Paths were validated by the parser.
            let _ = tests.insert(path, content);
        }
        tests
    }
}

impl PipelineStep for TestWriter {
    fn kind(&self) -> StepKind {
        StepKind::TestWriter
    }

    fn run<'a>(&'a self, request: &'a str, state: &'a WorkflowState) -> StepStream<'a> {
        Box::pin(async_stream::stream! {
            let iteration = state.iteration;
            let config = state.config();

            if !is_python(&config.target_language) {
                info!(step = "test_writer", iteration, language = %config.target_language, "Skipping sandbox tests");
                yield StepEvent::skip(
                    StepKind::TestWriter,
                    iteration,
                    format!("Skipped: {} projects are not tested in the sandbox.", config.target_language),
                );
                return;
            }

            let sources = state.files.non_log_files();
            if !sources.paths().any(|p| p.ends_with(".py")) {
                info!(step = "test_writer", iteration, "No Python files to test");
                yield StepEvent::skip(StepKind::TestWriter, iteration, "Skipped: no Python files to test.");
                return;
            }

            yield StepEvent::new(StepKind::TestWriter, iteration, "Generating test suite...");

            let user = format!(
                "User Request: {}\n\nCode to test:\n{}",
                request,
                sources.render_for_prompt()
            );
            let reply = self
                .backend
                .generate(TEST_WRITER_SYSTEM_PROMPT, &user, config, String::new)
                .await;

            let mut tests = if reply.degraded || is_unavailable_reply(&reply.text) {
                warn!(step = "test_writer", iteration, "Backend unavailable, using placeholder tests");
                FileSet::new()
            } else {
                let parsed = ResponseParser::new("Python")
                    .with_default_file(DEFAULT_TEST_FILE)
                    .parse(&reply.text);
                Self::accept_tests(parsed.files, &state.files, iteration)
            };
            if tests.is_empty() {
                debug!(step = "test_writer", iteration, "No tests parsed, using placeholder");
                tests = single_file(PLACEHOLDER_TEST_FILE, PLACEHOLDER_TEST);
            }

            let paths: Vec<String> = tests
                .paths()
                .filter(|p| p.ends_with(".py"))
                .map(str::to_string)
                .collect();
            for path in paths {
                yield StepEvent::new(StepKind::TestWriter, iteration, format!("Verifying {}...", path));
                let Some(source) = tests.get(&path).map(str::to_string) else {
                    continue;
                };
                let Err(error) = self.checker.check(&path, &source).await else {
                    continue;
                };

                warn!(step = "test_writer", iteration, path = %path, error = %error, "Syntax error in generated test");
                yield StepEvent::new(
                    StepKind::TestWriter,
                    iteration,
                    format!("Fixing syntax error in {}...", path),
                );
                let fix_prompt = format!(
                    "SyntaxError in {}:\n{}\n\nCode:\n{}\n\nReturn ONLY the fixed code.",
                    path, error, source
                );
                let fixed = self
                    .backend
                    .generate(SYNTAX_FIX_SYSTEM_PROMPT, &fix_prompt, config, String::new)
                    .await;
                if fixed.degraded {
                    continue;
                }
                let cleaned = clean_code(&fixed.text);
                if !cleaned.is_empty() {
                    let _ = tests.insert(&path, cleaned);
                }
            }

            let workspace = sources.merged(&tests);
            yield StepEvent::new(StepKind::TestWriter, iteration, "Running tests in sandbox...")
                .with_delta(tests.clone());

            let mut updates = self.sandbox.execute_streaming(&workspace);
            while let Some(update) = updates.next().await {
                match update {
                    SandboxUpdate::Output { log } => {
                        yield StepEvent::new(StepKind::TestWriter, iteration, "Running tests...")
                            .with_delta(single_file(TEST_RESULTS_FILE, render_log(&log)));
                    }
                    SandboxUpdate::Finished(Ok(result)) => {
                        info!(
                            step = "test_writer",
                            iteration,
                            exit_code = result.exit_code,
                            succeeded = result.succeeded,
                            timed_out = result.timed_out,
                            "Sandbox run finished"
                        );
                        let mut delta = tests.clone();
                        let _ = delta.insert(TEST_RESULTS_FILE, result.log_text());
                        let event = if result.succeeded {
                            StepEvent::new(StepKind::TestWriter, iteration, "Done! Tests executed and passed.")
                        } else if result.timed_out {
                            StepEvent::error(StepKind::TestWriter, iteration, "Done! Tests timed out and were killed.")
                        } else {
                            StepEvent::error(StepKind::TestWriter, iteration, "Done! Tests executed with failures.")
                        };
                        yield event.with_delta(delta);
                        return;
                    }
                    SandboxUpdate::Finished(Err(e)) => {
                        warn!(step = "test_writer", iteration, error = %e, "Sandbox failed");
                        yield StepEvent::error(
                            StepKind::TestWriter,
                            iteration,
                            format!("Error! Sandbox failed: {}", e),
                        );
                        return;
                    }
                }
            }

            yield StepEvent::error(StepKind::TestWriter, iteration, "Error! Sandbox ended without a result.");
        })
    }
}

/// Returns true for files pytest would treat as part of the test suite.
pub fn is_test_path(path: &str) -> bool {
    if path.starts_with("tests/") || path.contains("/tests/") {
        return true;
    }
    let name = Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path);
    name == "conftest.py" || name.starts_with("test_") || name.ends_with("_test.py")
}

/// Extracts bare code from a fix reply: first fence body, marker line removed.
fn clean_code(text: &str) -> String {
    let stripped = strip_reasoning(text);
    let body = scan_fences(&stripped)
        .into_iter()
        .next()
        .map(|block| block.body)
        .unwrap_or_else(|| stripped.trim().to_string());
    let body = match split_marker(&body) {
        Some((_, rest)) => rest,
        None => body,
    };
    with_trailing_newline(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testing::{collect, resilient, ScriptedBackend};
    use crate::pipeline::config::GenerationConfig;
    use crate::runner::{NoopSyntaxChecker, SandboxConfig, FAILURE_MARKER, SUCCESS_MARKER};
    use async_trait::async_trait;
    use std::time::Duration;

    /// Rejects any source containing `BROKEN`.
    struct MarkerChecker;

    #[async_trait]
    impl SyntaxChecker for MarkerChecker {
        async fn check(&self, _path: &str, source: &str) -> Result<(), String> {
            if source.contains("BROKEN") {
                Err("invalid syntax (line 1)".to_string())
            } else {
                Ok(())
            }
        }
    }

    fn sh_sandbox(script: &str) -> SandboxRunner {
        SandboxRunner::new(
            SandboxConfig::default()
                .with_test_command(["sh", "-c", script])
                .without_install()
                .with_idle_read_wait(Duration::from_millis(50)),
        )
    }

    fn python_state() -> WorkflowState {
        let mut state = WorkflowState::new(GenerationConfig::default());
        state.files.insert("sorter.py", "def sort_list(xs):\n    return sorted(xs)\n").unwrap();
        state
    }

    const TESTS_REPLY: &str = "```python\n# filename: tests/test_sorter.py\nfrom sorter import sort_list\n\ndef test_sort():\n    assert sort_list([2, 1]) == [1, 2]\n```";

    #[tokio::test]
    async fn test_passing_suite() {
        let backend = Arc::new(ScriptedBackend::new().reply("QA Engineer", TESTS_REPLY));
        let step = TestWriter::new(
            resilient(backend.clone()),
            sh_sandbox("test -f tests/test_sorter.py && test -f sorter.py && echo '1 passed'"),
            Arc::new(NoopSyntaxChecker),
        );
        let state = python_state();

        let events = collect(step.run("sort a list", &state)).await;
        let last = events.last().unwrap();
        assert!(!last.is_error, "{}", last.message);

        let delta = last.file_delta.as_ref().unwrap();
        assert!(delta.contains("tests/test_sorter.py"));
        let log = delta.get(TEST_RESULTS_FILE).unwrap();
        assert!(log.contains("1 passed"));
        assert!(log.trim_end().ends_with(SUCCESS_MARKER));

        // Streaming snapshots are relayed before the terminal event.
        assert!(events[..events.len() - 1]
            .iter()
            .any(|e| e.message == "Running tests..."));
        assert!(backend.prompts_for("QA Engineer")[0].contains("--- FILE: sorter.py ---"));
    }

    #[tokio::test]
    async fn test_failing_suite_is_error() {
        let backend = Arc::new(ScriptedBackend::new().reply("QA Engineer", TESTS_REPLY));
        let step = TestWriter::new(
            resilient(backend),
            sh_sandbox("echo 'E   AssertionError: assert [2, 1] == [1, 2]'; exit 1"),
            Arc::new(NoopSyntaxChecker),
        );

        let events = collect(step.run("sort", &python_state())).await;
        let last = events.last().unwrap();
        assert!(last.is_error);
        let log = last.file_delta.as_ref().unwrap().get(TEST_RESULTS_FILE).unwrap();
        assert!(log.contains("AssertionError"));
        assert!(log.trim_end().ends_with(FAILURE_MARKER));
    }

    #[tokio::test]
    async fn test_skips_non_python() {
        let backend = Arc::new(ScriptedBackend::new());
        let step = TestWriter::new(
            resilient(backend.clone()),
            sh_sandbox("exit 1"),
            Arc::new(NoopSyntaxChecker),
        );
        let mut state = WorkflowState::new(GenerationConfig::default().with_target_language("Go"));
        state.files.insert("main.go", "package main\n").unwrap();

        let events = collect(step.run("x", &state)).await;
        assert_eq!(events.len(), 1);
        assert!(events[0].skipped);
        assert!(!events[0].is_error);
        assert!(events[0].file_delta.is_none());
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn test_skips_without_python_files() {
        let backend = Arc::new(ScriptedBackend::new());
        let step = TestWriter::new(resilient(backend), sh_sandbox("exit 1"), Arc::new(NoopSyntaxChecker));
        let mut state = WorkflowState::new(GenerationConfig::default());
        state.files.insert("implementation_plan.md", "# Plan").unwrap();

        let events = collect(step.run("x", &state)).await;
        assert!(events.last().unwrap().skipped);
    }

    #[tokio::test]
    async fn test_placeholder_when_backend_down() {
        let backend = Arc::new(ScriptedBackend::failing());
        let step = TestWriter::new(
            resilient(backend),
            sh_sandbox("test -f tests/test_main.py"),
            Arc::new(NoopSyntaxChecker),
        );

        let events = collect(step.run("sort", &python_state())).await;
        let last = events.last().unwrap();
        assert!(!last.is_error, "{}", last.message);
        let delta = last.file_delta.as_ref().unwrap();
        assert!(delta.get(PLACEHOLDER_TEST_FILE).unwrap().contains("def test_script_execution"));
    }

    #[tokio::test]
    async fn test_collisions_with_source_are_dropped() {
        let reply = "```python\n# filename: sorter.py\nBROKEN = 1\n```\n```python\n# filename: tests/test_x.py\ndef test_x():\n    pass\n```";
        let backend = Arc::new(ScriptedBackend::new().reply("QA Engineer", reply));
        let step = TestWriter::new(
            resilient(backend),
            sh_sandbox("grep -q sorted sorter.py"),
            Arc::new(NoopSyntaxChecker),
        );

        let events = collect(step.run("sort", &python_state())).await;
        let last = events.last().unwrap();
        assert!(!last.is_error, "{}", last.message);
        let delta = last.file_delta.as_ref().unwrap();
        assert!(!delta.contains("sorter.py"));
        assert!(delta.contains("tests/test_x.py"));
    }

    #[tokio::test]
    async fn test_syntax_error_gets_one_fix() {
        let reply = "```python\n# filename: tests/test_sorter.py\nBROKEN def test_sort(:\n```";
        let fixed = "<think>fixing</think>\n```python\n# filename: tests/test_sorter.py\ndef test_sort():\n    assert True\n```";
        let backend = Arc::new(
            ScriptedBackend::new()
                .reply("QA Engineer", reply)
                .reply("syntax fixer", fixed),
        );
        let step = TestWriter::new(
            resilient(backend.clone()),
            sh_sandbox("exit 0"),
            Arc::new(MarkerChecker),
        );

        let events = collect(step.run("sort", &python_state())).await;
        let last = events.last().unwrap();
        let delta = last.file_delta.as_ref().unwrap();
        assert_eq!(
            delta.get("tests/test_sorter.py"),
            Some("def test_sort():\n    assert True\n")
        );

        let fix_prompts = backend.prompts_for("syntax fixer");
        assert_eq!(fix_prompts.len(), 1);
        assert!(fix_prompts[0].contains("invalid syntax (line 1)"));
        assert!(fix_prompts[0].contains("BROKEN def test_sort(:"));
    }

    #[tokio::test]
    async fn test_sandbox_infrastructure_failure() {
        let backend = Arc::new(ScriptedBackend::new().reply("QA Engineer", TESTS_REPLY));
        let sandbox = SandboxRunner::new(
            SandboxConfig::default()
                .with_test_command(["/nonexistent/forgeflow-pytest"])
                .without_install(),
        );
        let step = TestWriter::new(resilient(backend), sandbox, Arc::new(NoopSyntaxChecker));

        let events = collect(step.run("sort", &python_state())).await;
        let last = events.last().unwrap();
        assert!(last.is_error);
        assert!(last.file_delta.is_none());
        assert!(last.message.starts_with("Error! Sandbox failed"));
    }

    #[test]
    fn test_is_test_path() {
        assert!(is_test_path("tests/test_main.py"));
        assert!(is_test_path("pkg/tests/helpers.py"));
        assert!(is_test_path("test_sorter.py"));
        assert!(is_test_path("sorter_test.py"));
        assert!(is_test_path("conftest.py"));
        assert!(!is_test_path("sorter.py"));
        assert!(!is_test_path("contest.py"));
    }

    #[test]
    fn test_clean_code() {
        assert_eq!(clean_code("x = 1"), "x = 1\n");
        assert_eq!(clean_code("```python\n# filename: a.py\nx = 1\n```"), "x = 1\n");
        assert_eq!(clean_code("<think>a</think>```\ny = 2\n```"), "y = 2\n");
    }
}
