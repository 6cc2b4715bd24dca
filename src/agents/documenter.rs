//! Documenter step: writes the project README.

use tracing::{debug, warn};

use super::types::{clean_prose, single_file, PipelineStep, StepEvent, StepKind, StepStream};
use crate::llm::{is_unavailable_reply, ResilientBackend};
use crate::parser::profile_for;
use crate::pipeline::state::WorkflowState;

/// File the documentation is stored under.
pub const README_FILE: &str = "README.md";

const DOCUMENTER_SYSTEM_PROMPT: &str = r#"You are an expert Technical Writer.
Create a comprehensive and professional `README.md` suitable for a top-tier open source project.

Sections to include:
1. **Project Title & Description**: clearly explain what the project does.
2. **Implementation Details**: briefly explain the architecture and logic used.
3. **Installation & Usage**: step-by-step instructions.
4. **Key Features**: list the main capabilities.

Style Guide:
- Use professional, clear language.
- Return ONLY raw Markdown.
- Use correct Markdown spacing (e.g., `# Title`, `## Section`, not `##Section`)."#;

/// Documents the generated project.
pub struct Documenter {
    backend: ResilientBackend,
}

impl Documenter {
    pub fn new(backend: ResilientBackend) -> Self {
        Self { backend }
    }
}

impl PipelineStep for Documenter {
    fn kind(&self) -> StepKind {
        StepKind::Documenter
    }

    fn run<'a>(&'a self, request: &'a str, state: &'a WorkflowState) -> StepStream<'a> {
        Box::pin(async_stream::stream! {
            let iteration = state.iteration;
            let config = state.config();
            yield StepEvent::new(StepKind::Documenter, iteration, "Writing documentation...");

            let paths: Vec<String> = state
                .files
                .non_log_files()
                .paths()
                .filter(|p| *p != README_FILE)
                .map(str::to_string)
                .collect();
            let user = format!(
                "Context:\nPlan: {}\nFiles: {:?}\n\nRequest: {}",
                state.plan, paths, request
            );
            let fallback = || fallback_readme(request, &config.target_language, &paths);
            let reply = self
                .backend
                .generate(DOCUMENTER_SYSTEM_PROMPT, &user, config, fallback)
                .await;

            let mut readme = clean_prose(&reply.text);
            if !reply.degraded && (readme.is_empty() || is_unavailable_reply(&readme)) {
                warn!(step = "documenter", iteration, "Unusable README, using fallback");
                readme = fallback_readme(request, &config.target_language, &paths);
            }
            debug!(step = "documenter", iteration, degraded = reply.degraded, "README ready");

            yield StepEvent::new(StepKind::Documenter, iteration, "Done! Documentation written.")
                .with_delta(single_file(README_FILE, readme));
        })
    }
}

fn fallback_readme(request: &str, language: &str, paths: &[String]) -> String {
    let listing: Vec<String> = paths.iter().map(|p| format!("- `{}`", p)).collect();
    format!(
        "# Generated Project\n\n{}\n\n## Files\n\n{}\n\n## Usage\n\nRun the {} entry point `{}`.\n",
        request.trim(),
        listing.join("\n"),
        language,
        profile_for(language).entry_point()
    )
}
