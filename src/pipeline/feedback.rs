//! Failure feedback that seeds the next auto-fix iteration.

use crate::workspace::FileSet;

/// What the next iteration needs to know about the failed one.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryFeedback {
    request: String,
    files: FileSet,
    log: String,
}

impl RetryFeedback {
    /// Builds feedback from the request, the current files and the failure log.
    ///
    /// Synthetic logs are dropped from `files`; `log` carries the one that matters.
    pub fn new(request: impl Into<String>, files: &FileSet, log: impl Into<String>) -> Self {
        Self {
            request: request.into(),
            files: files.non_log_files(),
            log: log.into(),
        }
    }

    /// Renders the planner input for the next iteration.
    pub fn render(&self) -> String {
        let snapshot = if self.files.is_empty() {
            "(no files were produced)".to_string()
        } else {
            self.files.render_for_prompt()
        };
        let log = if self.log.trim().is_empty() {
            "No log"
        } else {
            self.log.trim_end()
        };

        format!(
            "CRITICAL: PREVIOUS ITERATION FAILED VALIDATION.\n\n\
             ### OBJECTIVE\n\
             Fix the errors in the codebase to satisfy the User Request.\n\n\
             ### ORIGINAL REQUEST\n\
             {request}\n\n\
             ### PREVIOUS ATTEMPT CONTEXT\n\n\
             #### FAILED IMPLEMENTATION & TESTS\n\
             {snapshot}\n\n\
             #### TEST EXECUTION LOGS\n\
             {log}\n\n\
             ### YOUR TASK\n\
             1. Analyze the 'TEST EXECUTION LOGS' to understand why it failed.\n\
             2. Review the 'FAILED IMPLEMENTATION' to find the bugs.\n\
             3. CREATE A NEW IMPLEMENTATION PLAN that specifically addresses these errors.\n\
             4. Be extremely careful to not repeat the same mistake.\n",
            request = self.request,
            snapshot = snapshot,
            log = log,
        )
    }
}
