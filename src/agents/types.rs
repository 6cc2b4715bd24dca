//! Shared types for pipeline steps.

use std::pin::Pin;

use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::parser::{scan_fences, strip_reasoning};
use crate::pipeline::state::WorkflowState;
use crate::workspace::FileSet;

/// Which step produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Engine notices (run start, iteration resets, failure analysis).
    System,
    /// Architecture planning.
    Planner,
    /// Source code generation.
    Synthesizer,
    /// Test generation and sandboxed verification.
    TestWriter,
    /// Prose review of the current files.
    Reviewer,
    /// README generation.
    Documenter,
}

impl StepKind {
    /// Returns the pipeline steps in execution order (without `System`).
    pub fn pipeline_order() -> [StepKind; 5] {
        [
            StepKind::Planner,
            StepKind::Synthesizer,
            StepKind::TestWriter,
            StepKind::Reviewer,
            StepKind::Documenter,
        ]
    }

    /// Returns the display name for this step.
    pub fn display_name(&self) -> &'static str {
        match self {
            StepKind::System => "System",
            StepKind::Planner => "System Architect",
            StepKind::Synthesizer => "Code Generator",
            StepKind::TestWriter => "Tester",
            StepKind::Reviewer => "Code Reviewer",
            StepKind::Documenter => "Technical Writer",
        }
    }
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// One unit of progress. The last event a step yields is its outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepEvent {
    pub step: StepKind,
    pub message: String,
    /// Plan text, set only by the planner's terminal event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_text: Option<String>,
    /// Files to merge into the run state (terminal events) or display (progress).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_delta: Option<FileSet>,
    pub is_error: bool,
    /// Tells consumers to clear the displayed progress of later steps.
    pub reset_downstream: bool,
    /// The step intentionally did nothing.
    pub skipped: bool,
    /// 1-based workflow iteration.
    pub iteration: usize,
    pub timestamp: DateTime<Utc>,
}

impl StepEvent {
    /// Creates a non-error event.
    pub fn new(step: StepKind, iteration: usize, message: impl Into<String>) -> Self {
        Self {
            step,
            message: message.into(),
            plan_text: None,
            file_delta: None,
            is_error: false,
            reset_downstream: false,
            skipped: false,
            iteration,
            timestamp: Utc::now(),
        }
    }

    /// Creates an error event.
    pub fn error(step: StepKind, iteration: usize, message: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::new(step, iteration, message)
        }
    }

    /// Creates a non-error event for a step that intentionally did nothing.
    pub fn skip(step: StepKind, iteration: usize, message: impl Into<String>) -> Self {
        Self {
            skipped: true,
            ..Self::new(step, iteration, message)
        }
    }

    /// Attaches a file delta.
    pub fn with_delta(mut self, delta: FileSet) -> Self {
        self.file_delta = Some(delta);
        self
    }

    /// Attaches the plan text.
    pub fn with_plan(mut self, plan: impl Into<String>) -> Self {
        self.plan_text = Some(plan.into());
        self
    }

    /// Marks the event as a reset of downstream progress.
    pub fn with_reset(mut self) -> Self {
        self.reset_downstream = true;
        self
    }
}

/// Lazy, finite sequence of events from one step invocation.
pub type StepStream<'a> = Pin<Box<dyn Stream<Item = StepEvent> + Send + 'a>>;

/// A stage of the workflow.
///
/// A step never fails: internal problems become a terminal event with
/// `is_error` set. Only the terminal event's delta is merged into the state.
pub trait PipelineStep: Send + Sync {
    /// Which step this is.
    fn kind(&self) -> StepKind;

    /// Runs the step against a read-only view of the state.
    fn run<'a>(&'a self, request: &'a str, state: &'a WorkflowState) -> StepStream<'a>;
}

/// Cleans a prose reply: drops reasoning and a single fence wrapping the whole text.
pub fn clean_prose(text: &str) -> String {
    let stripped = strip_reasoning(text);
    let trimmed = stripped.trim();
    if trimmed.starts_with("```") && trimmed.ends_with("```") {
        if let [block] = scan_fences(trimmed).as_slice() {
            if block.terminated {
                return block.body.trim().to_string();
            }
        }
    }
    trimmed.to_string()
}

/// Builds a one-entry file set. Keys used here are fixed and always valid.
pub(crate) fn single_file(path: &str, content: impl Into<String>) -> FileSet {
    let mut files = FileSet::new();
    if let Err(e) = files.insert(path, content) {
        tracing::error!(path, error = %e, "Rejected built-in file name");
    }
    files
}
