//! Planner step: turns the request into a Markdown implementation plan.

use tracing::{debug, warn};

use super::types::{clean_prose, single_file, PipelineStep, StepEvent, StepKind, StepStream};
use crate::llm::ResilientBackend;
use crate::parser::profile_for;
use crate::pipeline::state::WorkflowState;

/// File the plan is stored under.
pub const PLAN_FILE: &str = "implementation_plan.md";

const PLANNER_SYSTEM_PROMPT: &str = r#"You are a System Architect.
Analyze the user's request and propose a technical design for a {language} implementation: the file structure, the key components and how they will be tested.

CRITICAL: Base your design STRICTLY on the User Request. Do not add unnecessary features.

Output Requirements:
1. Create a detailed and explanatory implementation plan in Markdown.
2. Explain the rationale behind the file structure and key components.
3. Return ONLY the raw Markdown content. Do NOT wrap it in JSON or code fences.
4. Use correct Markdown spacing (e.g., `# Title`, `## Section`, not `##Section`)."#;

/// Designs the architecture for the request.
pub struct Planner {
    backend: ResilientBackend,
}

impl Planner {
    pub fn new(backend: ResilientBackend) -> Self {
        Self { backend }
    }
}

impl PipelineStep for Planner {
    fn kind(&self) -> StepKind {
        StepKind::Planner
    }

    fn run<'a>(&'a self, request: &'a str, state: &'a WorkflowState) -> StepStream<'a> {
        Box::pin(async_stream::stream! {
            let iteration = state.iteration;
            let config = state.config();
            yield StepEvent::new(
                StepKind::Planner,
                iteration,
                "Analyzing request and designing architecture...",
            );

            let system = PLANNER_SYSTEM_PROMPT.replace("{language}", &config.target_language);
            let user = format!("User Request: {}", request);
            let reply = self
                .backend
                .generate(&system, &user, config, || fallback_plan(&config.target_language))
                .await;

            let mut plan = clean_prose(&reply.text);
            if reply.degraded {
                warn!(step = "planner", iteration, "Backend unavailable, using fallback plan");
            } else if plan.is_empty() {
                warn!(step = "planner", iteration, "Empty plan returned, using fallback plan");
                plan = fallback_plan(&config.target_language);
            }
            debug!(step = "planner", iteration, chars = plan.len(), "Plan ready");

            yield StepEvent::new(StepKind::Planner, iteration, "Done! Implementation plan created.")
                .with_plan(plan.clone())
                .with_delta(single_file(PLAN_FILE, plan));
        })
    }
}

/// Minimal plan used when the backend is unreachable.
fn fallback_plan(language: &str) -> String {
    let profile = profile_for(language);
    format!(
        "# Implementation Plan\n\n\
         The generation backend was unavailable; this is the default layout.\n\n\
         ## Language\n\n{language}\n\n\
         ## Files\n\n\
         - `{entry}`: entry point with the requested functionality\n\
         - `tests/`: automated tests for the entry point\n\
         - `{manifest}`: third-party dependencies, if any\n",
        language = language,
        entry = profile.entry_point(),
        manifest = profile.manifest,
    )
}
