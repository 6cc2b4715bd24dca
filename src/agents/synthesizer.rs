//! Synthesizer step: generates source files from the request and the plan.

use tracing::{debug, info, warn};

use super::planner::PLAN_FILE;
use super::types::{single_file, PipelineStep, StepEvent, StepKind, StepStream};
use crate::llm::{is_unavailable_reply, simulated_reply, ResilientBackend};
use crate::parser::{profile_for, ResponseParser};
use crate::pipeline::state::WorkflowState;
use crate::workspace::ERROR_LOG_FILE;

const SYNTHESIZER_SYSTEM_PROMPT: &str = r#"You are an expert Programmer.
Generate the actual {language} code for the requested application, following the architect's plan.

CRITICAL:
1. PRIORITY 1: Correctness. The code MUST work and be bug-free.
2. PRIORITY 2: Efficiency. Optimize only after ensuring correctness.
3. Follow the user's specific logic and requirements STRICTLY. Do not improvise.
4. Put every file in its own fenced code block whose FIRST line is a filename marker, for example:
```{extension}
# filename: main.{extension}
...
```
5. Return only files that are new or must change. Existing files you do not return are kept as they are.
6. List third-party dependencies in `{manifest}`.
7. Do NOT write tests. A QA engineer writes them separately."#;

/// Writes the implementation.
pub struct Synthesizer {
    backend: ResilientBackend,
}

impl Synthesizer {
    pub fn new(backend: ResilientBackend) -> Self {
        Self { backend }
    }

    fn system_prompt(language: &str) -> String {
        let profile = profile_for(language);
        SYNTHESIZER_SYSTEM_PROMPT
            .replace("{language}", language)
            .replace("{extension}", profile.extension)
            .replace("{manifest}", profile.manifest)
    }

    fn user_prompt(request: &str, state: &WorkflowState) -> String {
        let mut existing = state.files.non_log_files();
        existing.retain(|path| path != PLAN_FILE);
        let existing = if existing.is_empty() {
            "(none)".to_string()
        } else {
            existing.render_for_prompt()
        };
        format!(
            "User Request: {}\n\nArchitect's Plan:\n{}\n\nExisting files (read-only context; return a file only if it must change):\n{}",
            request, state.plan, existing
        )
    }
}

impl PipelineStep for Synthesizer {
    fn kind(&self) -> StepKind {
        StepKind::Synthesizer
    }

    fn run<'a>(&'a self, request: &'a str, state: &'a WorkflowState) -> StepStream<'a> {
        Box::pin(async_stream::stream! {
            let iteration = state.iteration;
            let config = state.config();
            yield StepEvent::new(
                StepKind::Synthesizer,
                iteration,
                "Generating application code (this may take a moment)...",
            );

            let system = Self::system_prompt(&config.target_language);
            let user = Self::user_prompt(request, state);
            let reply = self
                .backend
                .generate(&system, &user, config, || simulated_reply(request))
                .await;

            if reply.degraded || is_unavailable_reply(&reply.text) {
                warn!(step = "synthesizer", iteration, "Backend unavailable, no code produced");
                let message = "Error! Generation backend unavailable; no code was produced.";
                yield StepEvent::error(StepKind::Synthesizer, iteration, message)
                    .with_delta(single_file(ERROR_LOG_FILE, format!("{}\n{}\n", message, reply.text)));
                return;
            }

            let parsed = ResponseParser::new(&config.target_language).parse(&reply.text);
            if parsed.is_empty() {
                warn!(
                    step = "synthesizer",
                    iteration,
                    diagnostics = parsed.diagnostics.len(),
                    "No files recovered from response"
                );
                yield StepEvent::error(
                    StepKind::Synthesizer,
                    iteration,
                    "Error! Failed to extract any files from the generated response.",
                )
                .with_delta(single_file(ERROR_LOG_FILE, parsed.error_log()));
                return;
            }

            for note in &parsed.diagnostics {
                debug!(step = "synthesizer", iteration, note = %note, "Parser note");
            }
            info!(step = "synthesizer", iteration, files = parsed.files.len(), "Code generated");
            let count = parsed.files.len();
            yield StepEvent::new(
                StepKind::Synthesizer,
                iteration,
                format!("Done! Generated {} file(s).", count),
            )
            .with_delta(parsed.files);
        })
    }
}
