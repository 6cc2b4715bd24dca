//! Reviewer step: a prose review of the current files.

use tracing::{debug, warn};

use super::types::{clean_prose, single_file, PipelineStep, StepEvent, StepKind, StepStream};
use crate::llm::{is_unavailable_reply, ResilientBackend};
use crate::pipeline::state::WorkflowState;
use crate::workspace::FileSet;

/// File the review is stored under.
pub const REVIEW_FILE: &str = "REVIEW.md";

const REVIEWER_SYSTEM_PROMPT: &str = r#"You are a Senior Code Reviewer.
Review the {language} code for bugs, unhandled edge cases and style problems.
Reply with a concise Markdown summary only."#;

/// Reviews the generated code.
pub struct Reviewer {
    backend: ResilientBackend,
}

impl Reviewer {
    pub fn new(backend: ResilientBackend) -> Self {
        Self { backend }
    }
}

impl PipelineStep for Reviewer {
    fn kind(&self) -> StepKind {
        StepKind::Reviewer
    }

    fn run<'a>(&'a self, request: &'a str, state: &'a WorkflowState) -> StepStream<'a> {
        Box::pin(async_stream::stream! {
            let iteration = state.iteration;
            let config = state.config();
            yield StepEvent::new(StepKind::Reviewer, iteration, "Reviewing code...");

            let mut files = state.files.non_log_files();
            files.retain(|path| path != REVIEW_FILE);
            let system = REVIEWER_SYSTEM_PROMPT.replace("{language}", &config.target_language);
            let user = format!(
                "User Request: {}\n\nReview:\n{}",
                request,
                files.render_for_prompt()
            );
            let reply = self
                .backend
                .generate(&system, &user, config, || fallback_review(&files))
                .await;

            let mut review = clean_prose(&reply.text);
            if !reply.degraded && (review.is_empty() || is_unavailable_reply(&review)) {
                warn!(step = "reviewer", iteration, "Unusable review, using fallback");
                review = fallback_review(&files);
            }
            debug!(step = "reviewer", iteration, degraded = reply.degraded, "Review ready");

            yield StepEvent::new(StepKind::Reviewer, iteration, "Done! Review written.")
                .with_delta(single_file(REVIEW_FILE, review));
        })
    }
}

fn fallback_review(files: &FileSet) -> String {
    let listing: Vec<String> = files.paths().map(|p| format!("- `{}`", p)).collect();
    format!(
        "# Code Review\n\nAutomated review unavailable: the generation backend did not respond.\n\n## Files\n\n{}\n",
        listing.join("\n")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testing::{collect, resilient, ScriptedBackend};
    use crate::pipeline::config::GenerationConfig;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_review_written() {
        let backend = Arc::new(
            ScriptedBackend::new().reply("Senior Code Reviewer", "## Summary\nLooks fine."),
        );
        let step = Reviewer::new(resilient(backend.clone()));
        let mut state = WorkflowState::new(GenerationConfig::default());
        state.files.insert("main.py", "print(1)\n").unwrap();
        state.files.insert("TEST_RESULTS.log", "ok").unwrap();

        let events = collect(step.run("x", &state)).await;
        let last = events.last().unwrap();
        assert!(!last.is_error);
        assert_eq!(
            last.file_delta.as_ref().unwrap().get(REVIEW_FILE),
            Some("## Summary\nLooks fine.")
        );

        let prompt = &backend.prompts_for("Senior Code Reviewer")[0];
        assert!(prompt.contains("--- FILE: main.py ---"));
        assert!(!prompt.contains("TEST_RESULTS.log"));
    }

    #[tokio::test]
    async fn test_review_never_fails() {
        let backend = Arc::new(ScriptedBackend::failing());
        let step = Reviewer::new(resilient(backend));
        let mut state = WorkflowState::new(GenerationConfig::default());
        state.files.insert("main.py", "print(1)\n").unwrap();

        let events = collect(step.run("x", &state)).await;
        let last = events.last().unwrap();
        assert!(!last.is_error);
        let review = last.file_delta.as_ref().unwrap().get(REVIEW_FILE).unwrap();
        assert!(review.contains("- `main.py`"));
    }
}
