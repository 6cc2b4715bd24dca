//! Workflow orchestration: plan, synthesize, test, review, document.
//!
//! # Architecture
//!
//! The engine consists of several components:
//!
//! - **WorkflowEngine**: sequences the steps, merges their deltas and decides the outcome
//! - **WorkflowState**: the file set and plan of one run
//! - **RetryFeedback**: turns a failed attempt into the next planner input
//! - **Config**: per-run `GenerationConfig` and process-wide `PipelineConfig`
//!
//! # Workflow Flow
//!
//! 1. **Planning**: the planner writes `implementation_plan.md`
//! 2. **Synthesizing**: source files are generated from the plan
//! 3. **Testing**: a pytest suite is written and run in the sandbox
//! 4. **Reviewing / Documenting**: on success, `REVIEW.md` and `README.md`
//! 5. **Feedback**: in auto-fix mode a failure loops back to planning with the
//!    request, the failing files and the log, up to `max_iterations` times
//!
//! Files are committed after testing and again after documentation.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use futures::StreamExt;
//! use forgeflow::pipeline::{GenerationConfig, PipelineConfig, WorkflowEngine};
//!
//! let config = PipelineConfig::from_env()?;
//! let engine = Arc::new(WorkflowEngine::from_config(&config)?);
//!
//! let mut events = engine.stream("Sort a list of integers", GenerationConfig::new().with_auto_fix(true));
//! while let Some(event) = events.next().await {
//!     println!("{}", serde_json::to_string(&event)?);
//! }
//! ```

pub mod config;
pub mod events;
pub mod feedback;
pub mod orchestrator;
pub mod state;

pub use config::{
    ConfigError, GenerationConfig, PipelineConfig, DEFAULT_EVENT_BUFFER, DEFAULT_LANGUAGE,
    DEFAULT_MAX_ITERATIONS,
};
pub use events::{RunOutcome, RunReport, WorkflowEvent, WorkflowPhase};
pub use feedback::RetryFeedback;
pub use orchestrator::{WorkflowEngine, WorkflowError};
pub use state::WorkflowState;
