//! Records emitted to the caller of a workflow run.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agents::{StepEvent, StepKind};

/// Phases of the workflow state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPhase {
    Planning,
    Synthesizing,
    Testing,
    Reviewing,
    Documenting,
    /// Failure analysed; the next iteration's prompt is ready.
    FeedbackBuilt,
    Done,
    Exhausted,
}

impl WorkflowPhase {
    /// The phase a pipeline step runs in. `System` has none.
    pub fn for_step(kind: StepKind) -> Option<Self> {
        match kind {
            StepKind::System => None,
            StepKind::Planner => Some(WorkflowPhase::Planning),
            StepKind::Synthesizer => Some(WorkflowPhase::Synthesizing),
            StepKind::TestWriter => Some(WorkflowPhase::Testing),
            StepKind::Reviewer => Some(WorkflowPhase::Reviewing),
            StepKind::Documenter => Some(WorkflowPhase::Documenting),
        }
    }
}

impl fmt::Display for WorkflowPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkflowPhase::Planning => "planning",
            WorkflowPhase::Synthesizing => "synthesizing",
            WorkflowPhase::Testing => "testing",
            WorkflowPhase::Reviewing => "reviewing",
            WorkflowPhase::Documenting => "documenting",
            WorkflowPhase::FeedbackBuilt => "feedback_built",
            WorkflowPhase::Done => "done",
            WorkflowPhase::Exhausted => "exhausted",
        };
        write!(f, "{}", name)
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Tests passed (or were skipped) and the project was documented.
    Succeeded,
    /// Single-pass run stopped at a failing phase.
    Failed { stage: WorkflowPhase },
    /// Every auto-fix iteration failed.
    Exhausted,
    /// The caller went away.
    Cancelled,
    /// An internal error ended the run.
    Faulted { message: String },
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Succeeded)
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Succeeded => write!(f, "succeeded"),
            RunOutcome::Failed { stage } => write!(f, "failed during {}", stage),
            RunOutcome::Exhausted => write!(f, "exhausted"),
            RunOutcome::Cancelled => write!(f, "cancelled"),
            RunOutcome::Faulted { message } => write!(f, "faulted: {}", message),
        }
    }
}

/// Summary sent once at the end of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub outcome: RunOutcome,
    /// Iterations started (1 in single-pass mode).
    pub iterations: usize,
    /// Sandbox log of the last attempt, else the last step error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_log: Option<String>,
    /// SHA-256 over the final file set.
    pub files_digest: String,
    pub file_count: usize,
}

/// One record on the caller boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    Step(StepEvent),
    Complete(RunReport),
}

impl WorkflowEvent {
    /// Returns the report if this is the completion record.
    pub fn report(&self) -> Option<&RunReport> {
        match self {
            WorkflowEvent::Complete(report) => Some(report),
            WorkflowEvent::Step(_) => None,
        }
    }

    /// Returns the step event, if any.
    pub fn step(&self) -> Option<&StepEvent> {
        match self {
            WorkflowEvent::Step(event) => Some(event),
            WorkflowEvent::Complete(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::FileSet;

    #[test]
    fn test_step_record_is_tagged() {
        let event = WorkflowEvent::Step(StepEvent::new(StepKind::Planner, 1, "thinking"));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "step");
        assert_eq!(json["step"], "planner");
        assert_eq!(json["message"], "thinking");
    }

    #[test]
    fn test_complete_record_is_tagged() {
        let report = RunReport {
            run_id: Uuid::new_v4(),
            outcome: RunOutcome::Failed {
                stage: WorkflowPhase::Testing,
            },
            iterations: 1,
            final_log: None,
            files_digest: FileSet::new().digest(),
            file_count: 0,
        };
        let json = serde_json::to_value(WorkflowEvent::Complete(report.clone())).unwrap();
        assert_eq!(json["type"], "complete");
        assert_eq!(json["outcome"]["status"], "failed");
        assert_eq!(json["outcome"]["stage"], "testing");
        assert!(json.get("final_log").is_none());

        let back: WorkflowEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back.report(), Some(&report));
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(RunOutcome::Succeeded.to_string(), "succeeded");
        assert_eq!(
            RunOutcome::Failed {
                stage: WorkflowPhase::Synthesizing
            }
            .to_string(),
            "failed during synthesizing"
        );
        assert!(RunOutcome::Succeeded.is_success());
        assert!(!RunOutcome::Exhausted.is_success());
        assert_eq!(WorkflowPhase::for_step(StepKind::TestWriter), Some(WorkflowPhase::Testing));
        assert_eq!(WorkflowPhase::for_step(StepKind::System), None);
    }
}
