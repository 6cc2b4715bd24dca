//! Workflow engine: sequences the steps, merges their deltas and decides the outcome.
//!
//! This module provides the `WorkflowEngine` that coordinates:
//! - Planning, synthesis and sandboxed testing
//! - The auto-fix loop with failure feedback
//! - Review and documentation on success
//! - Workspace checkpoints and event streaming

use std::sync::Arc;

use futures::StreamExt;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

use super::config::{GenerationConfig, PipelineConfig};
use super::events::{RunOutcome, RunReport, WorkflowEvent, WorkflowPhase};
use super::feedback::RetryFeedback;
use super::state::WorkflowState;
use crate::agents::{
    Documenter, PipelineStep, Planner, Reviewer, StepEvent, StepKind, Synthesizer, TestWriter,
};
use crate::error::{LlmError, WorkspaceError};
use crate::llm::{ChatBackend, GenerationBackend, ResilientBackend};
use crate::runner::{PythonSyntaxChecker, SandboxRunner, SyntaxChecker};
use crate::workspace::{
    FileSet, NullWorkspace, WorkspaceCommitter, ERROR_LOG_FILE, TEST_RESULTS_FILE,
};

/// Internal faults that end a run early.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The event receiver was dropped.
    #[error("Event receiver disconnected")]
    Disconnected,

    /// A checkpoint could not be persisted.
    #[error("Commit failed: {0}")]
    Commit(#[from] WorkspaceError),
}

/// Result of one plan, synthesize, test attempt.
enum Attempt {
    Passed,
    Failed { stage: WorkflowPhase, log: String },
}

/// How `drive` ended, before it is turned into a report.
struct Conclusion {
    outcome: RunOutcome,
    final_log: Option<String>,
}

/// Runs workflows. Holds one instance of each step; shares nothing mutable between runs.
pub struct WorkflowEngine {
    backend: ResilientBackend,
    sandbox: SandboxRunner,
    planner: Planner,
    synthesizer: Synthesizer,
    test_writer: TestWriter,
    reviewer: Reviewer,
    documenter: Documenter,
    committer: Arc<dyn WorkspaceCommitter>,
    max_iterations: usize,
    event_buffer: usize,
}

impl WorkflowEngine {
    /// Creates an engine over `backend` using the engine, sandbox and retry settings of `config`.
    ///
    /// Checkpoints go nowhere until a committer is set.
    pub fn new(backend: Arc<dyn GenerationBackend>, config: &PipelineConfig) -> Self {
        let backend = ResilientBackend::new(backend).with_policy(config.retry);
        let sandbox = SandboxRunner::new(config.sandbox.clone());
        let checker: Arc<dyn SyntaxChecker> =
            Arc::new(PythonSyntaxChecker::new(config.sandbox.python.clone()));

        Self {
            planner: Planner::new(backend.clone()),
            synthesizer: Synthesizer::new(backend.clone()),
            test_writer: TestWriter::new(backend.clone(), sandbox.clone(), checker),
            reviewer: Reviewer::new(backend.clone()),
            documenter: Documenter::new(backend.clone()),
            backend,
            sandbox,
            committer: Arc::new(NullWorkspace),
            max_iterations: config.max_iterations,
            event_buffer: config.event_buffer,
        }
    }

    /// Creates an engine talking to the configured OpenAI-compatible endpoints.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, LlmError> {
        let backend = ChatBackend::new(config.endpoints.clone())?;
        Ok(Self::new(Arc::new(backend), config))
    }

    /// Sets where checkpoints are persisted.
    pub fn with_committer(mut self, committer: Arc<dyn WorkspaceCommitter>) -> Self {
        self.committer = committer;
        self
    }

    /// Replaces the checker used on generated test files.
    pub fn with_syntax_checker(mut self, checker: Arc<dyn SyntaxChecker>) -> Self {
        self.test_writer = TestWriter::new(self.backend.clone(), self.sandbox.clone(), checker);
        self
    }

    /// Returns the auto-fix iteration ceiling.
    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// Spawns a run and returns its events.
    ///
    /// The stream ends after the `Complete` record. Dropping it cancels the run.
    pub fn stream(
        self: Arc<Self>,
        request: impl Into<String>,
        config: GenerationConfig,
    ) -> ReceiverStream<WorkflowEvent> {
        let (tx, rx) = mpsc::channel(self.event_buffer.max(1));
        let request = request.into();
        let run_id = Uuid::new_v4();

        let run_tx = tx.clone();
        let handle = tokio::spawn(async move { self.execute(run_id, &request, config, run_tx).await });

        tokio::spawn(async move {
            if let Err(e) = handle.await {
                error!(run_id = %run_id, error = %e, "Workflow task aborted");
                let report = RunReport {
                    run_id,
                    outcome: RunOutcome::Faulted {
                        message: format!("workflow task aborted: {}", e),
                    },
                    iterations: 0,
                    final_log: None,
                    files_digest: FileSet::new().digest(),
                    file_count: 0,
                };
                let _ = tx.send(WorkflowEvent::Complete(report)).await;
            }
        });

        ReceiverStream::new(rx)
    }

    /// Runs one workflow to completion, sending every event on `tx`.
    ///
    /// Ends with a single `Complete` record unless the receiver is gone.
    pub async fn run(
        &self,
        request: &str,
        config: GenerationConfig,
        tx: mpsc::Sender<WorkflowEvent>,
    ) -> RunReport {
        self.execute(Uuid::new_v4(), request, config, tx).await
    }

    async fn execute(
        &self,
        run_id: Uuid,
        request: &str,
        config: GenerationConfig,
        tx: mpsc::Sender<WorkflowEvent>,
    ) -> RunReport {
        let span = tracing::info_span!("workflow", run_id = %run_id);
        async move {
            info!(
                auto_fix = config.auto_fix,
                language = %config.target_language,
                mode = %config.backend_mode,
                "Starting workflow"
            );
            let mut state = WorkflowState::new(config);

            let result = tokio::select! {
                result = self.drive(request, &mut state, &tx) => result,
                _ = tx.closed() => Err(WorkflowError::Disconnected),
            };

            let conclusion = match result {
                Ok(conclusion) => conclusion,
                Err(WorkflowError::Disconnected) => {
                    warn!(iteration = state.iteration, "Receiver dropped, cancelling run");
                    Conclusion {
                        outcome: RunOutcome::Cancelled,
                        final_log: state.test_log().map(str::to_string),
                    }
                }
                Err(e) => {
                    error!(error = %e, "Workflow faulted");
                    Conclusion {
                        outcome: RunOutcome::Faulted {
                            message: e.to_string(),
                        },
                        final_log: state.test_log().map(str::to_string),
                    }
                }
            };

            let report = RunReport {
                run_id,
                outcome: conclusion.outcome,
                iterations: state.iteration,
                final_log: conclusion.final_log,
                files_digest: state.files.digest(),
                file_count: state.files.len(),
            };
            info!(outcome = %report.outcome, iterations = report.iterations, files = report.file_count, "Workflow finished");

            if report.outcome != RunOutcome::Cancelled
                && tx.send(WorkflowEvent::Complete(report.clone())).await.is_err()
            {
                warn!("Receiver dropped before the completion record");
            }
            report
        }
        .instrument(span)
        .await
    }

    async fn drive(
        &self,
        request: &str,
        state: &mut WorkflowState,
        tx: &mpsc::Sender<WorkflowEvent>,
    ) -> Result<Conclusion, WorkflowError> {
        send(tx, StepEvent::new(StepKind::System, 1, "Starting workflow...")).await?;
        if state.config().auto_fix {
            self.auto_fix(request, state, tx).await
        } else {
            self.single_pass(request, state, tx).await
        }
    }

    async fn single_pass(
        &self,
        request: &str,
        state: &mut WorkflowState,
        tx: &mpsc::Sender<WorkflowEvent>,
    ) -> Result<Conclusion, WorkflowError> {
        state.iteration = 1;
        match self.attempt(request, state, tx).await? {
            Attempt::Passed => {
                self.finish(request, state, tx).await?;
                send(tx, StepEvent::new(StepKind::System, 1, "Workflow completed successfully.")).await?;
                Ok(Conclusion {
                    outcome: RunOutcome::Succeeded,
                    final_log: state.test_log().map(str::to_string),
                })
            }
            Attempt::Failed { stage, log } => {
                send(
                    tx,
                    StepEvent::error(StepKind::System, 1, format!("Workflow stopped: {} failed.", stage)),
                )
                .await?;
                Ok(Conclusion {
                    outcome: RunOutcome::Failed { stage },
                    final_log: Some(log),
                })
            }
        }
    }

    async fn auto_fix(
        &self,
        request: &str,
        state: &mut WorkflowState,
        tx: &mpsc::Sender<WorkflowEvent>,
    ) -> Result<Conclusion, WorkflowError> {
        let max_iterations = self.max_iterations.max(1);
        let mut prompt = request.to_string();
        let mut previous_digest: Option<String> = None;
        let mut last_log: Option<String> = None;

        for iteration in 1..=max_iterations {
            state.iteration = iteration;
            send(
                tx,
                StepEvent::new(
                    StepKind::System,
                    iteration,
                    format!("Starting auto-fix cycle (iteration {} of {})", iteration, max_iterations),
                )
                .with_reset(),
            )
            .await?;

            let (stage, log) = match self.attempt(&prompt, state, tx).await? {
                Attempt::Passed => {
                    self.finish(request, state, tx).await?;
                    send(
                        tx,
                        StepEvent::new(
                            StepKind::System,
                            iteration,
                            format!("Workflow fixed and completed in {} iteration(s).", iteration),
                        ),
                    )
                    .await?;
                    return Ok(Conclusion {
                        outcome: RunOutcome::Succeeded,
                        final_log: state.test_log().map(str::to_string),
                    });
                }
                Attempt::Failed { stage, log } => (stage, log),
            };

            let digest = state.files.non_log_files().digest();
            if previous_digest.as_deref() == Some(digest.as_str()) {
                warn!(iteration, "Files unchanged since the previous iteration");
            }
            previous_digest = Some(digest);

            let notice = match stage {
                WorkflowPhase::Synthesizing => format!(
                    "Code generation failed (iteration {}). Analysing errors for retry...",
                    iteration
                ),
                _ => format!("Tests failed (iteration {}). Analysing errors for retry...", iteration),
            };
            send(tx, StepEvent::new(StepKind::System, iteration, notice)).await?;

            prompt = RetryFeedback::new(request, &state.files, log.as_str()).render();
            info!(iteration, phase = %WorkflowPhase::FeedbackBuilt, stage = %stage, "Feedback built");
            last_log = Some(log);
        }

        info!(phase = %WorkflowPhase::Exhausted, max_iterations, "Auto-fix iterations exhausted");
        send(
            tx,
            StepEvent::error(
                StepKind::System,
                max_iterations,
                "Maximum auto-fix iterations reached. Stopping.",
            ),
        )
        .await?;
        Ok(Conclusion {
            outcome: RunOutcome::Exhausted,
            final_log: last_log,
        })
    }

    /// Plans, synthesizes and tests, then checkpoints whatever was produced.
    async fn attempt(
        &self,
        prompt: &str,
        state: &mut WorkflowState,
        tx: &mpsc::Sender<WorkflowEvent>,
    ) -> Result<Attempt, WorkflowError> {
        self.run_step(&self.planner, prompt, state, tx).await?;

        let synthesized = self.run_step(&self.synthesizer, prompt, state, tx).await?;
        let attempt = if synthesized.is_error {
            Attempt::Failed {
                stage: WorkflowPhase::Synthesizing,
                log: failure_log(&synthesized),
            }
        } else {
            let tested = self.run_step(&self.test_writer, prompt, state, tx).await?;
            if tested.is_error {
                Attempt::Failed {
                    stage: WorkflowPhase::Testing,
                    log: failure_log(&tested),
                }
            } else {
                Attempt::Passed
            }
        };

        self.commit(state).await?;
        Ok(attempt)
    }

    /// Reviews and documents, then checkpoints.
    async fn finish(
        &self,
        request: &str,
        state: &mut WorkflowState,
        tx: &mpsc::Sender<WorkflowEvent>,
    ) -> Result<(), WorkflowError> {
        self.run_step(&self.reviewer, request, state, tx).await?;
        self.run_step(&self.documenter, request, state, tx).await?;
        self.commit(state).await?;
        info!(phase = %WorkflowPhase::Done, "Workflow done");
        Ok(())
    }

    /// Forwards every event of a step and merges its terminal one.
    async fn run_step(
        &self,
        step: &dyn PipelineStep,
        input: &str,
        state: &mut WorkflowState,
        tx: &mpsc::Sender<WorkflowEvent>,
    ) -> Result<StepEvent, WorkflowError> {
        let kind = step.kind();
        if let Some(phase) = WorkflowPhase::for_step(kind) {
            info!(iteration = state.iteration, phase = %phase, "Entering phase");
        }

        let mut terminal: Option<StepEvent> = None;
        {
            let mut events = step.run(input, state);
            while let Some(event) = events.next().await {
                send(tx, event.clone()).await?;
                terminal = Some(event);
            }
        }

        let terminal = match terminal {
            Some(event) => event,
            None => {
                let event = StepEvent::error(kind, state.iteration, "Step produced no events.");
                send(tx, event.clone()).await?;
                event
            }
        };
        if terminal.is_error {
            warn!(step = %kind, iteration = state.iteration, message = %terminal.message, "Step failed");
        }
        state.apply(&terminal);
        Ok(terminal)
    }

    async fn commit(&self, state: &WorkflowState) -> Result<(), WorkflowError> {
        self.committer.commit(&state.files).await?;
        Ok(())
    }
}

async fn send(tx: &mpsc::Sender<WorkflowEvent>, event: StepEvent) -> Result<(), WorkflowError> {
    tx.send(WorkflowEvent::Step(event))
        .await
        .map_err(|_| WorkflowError::Disconnected)
}

/// The log a failed step leaves behind: sandbox output, parser diagnostics, or its message.
fn failure_log(event: &StepEvent) -> String {
    event
        .file_delta
        .as_ref()
        .and_then(|delta| delta.get(TEST_RESULTS_FILE).or_else(|| delta.get(ERROR_LOG_FILE)))
        .map(str::to_string)
        .unwrap_or_else(|| event.message.clone())
}
