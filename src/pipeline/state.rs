//! Per-run mutable state.

use crate::agents::{StepEvent, StepKind};
use crate::pipeline::config::GenerationConfig;
use crate::workspace::{FileSet, ERROR_LOG_FILE, TEST_RESULTS_FILE};

/// Everything one run has produced so far.
///
/// Owned by the engine. Steps get a shared borrow and describe changes through
/// the delta on their terminal event.
#[derive(Debug, Clone, Default)]
pub struct WorkflowState {
    /// Accumulated files, overwritten key by key.
    pub files: FileSet,
    /// Latest implementation plan.
    pub plan: String,
    /// 1-based iteration currently running.
    pub iteration: usize,
    config: GenerationConfig,
}

impl WorkflowState {
    pub fn new(config: GenerationConfig) -> Self {
        Self {
            files: FileSet::new(),
            plan: String::new(),
            iteration: 1,
            config,
        }
    }

    /// Run settings. Fixed for the lifetime of the run.
    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Folds a step's terminal event into the state.
    pub fn apply(&mut self, event: &StepEvent) {
        if let Some(plan) = &event.plan_text {
            self.plan = plan.clone();
        }
        if let Some(delta) = &event.file_delta {
            // A successful synthesis supersedes the previous parse diagnostics.
            if event.step == StepKind::Synthesizer && !event.is_error {
                self.files.retain(|path| path != ERROR_LOG_FILE);
            }
            self.files.merge(delta);
        }
    }

    /// The latest sandbox log, if a test run has happened.
    pub fn test_log(&self) -> Option<&str> {
        self.files.get(TEST_RESULTS_FILE)
    }
}
