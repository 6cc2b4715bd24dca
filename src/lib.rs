//! forgeflow: LLM-driven code generation with sandboxed verification.
//!
//! A request is planned, implemented, tested in a throwaway sandbox, reviewed
//! and documented. In auto-fix mode failing tests feed back into a new plan.

// Core modules
pub mod agents;
pub mod cli;
pub mod error;
pub mod llm;
pub mod parser;
pub mod pipeline;
pub mod runner;
pub mod utils;
pub mod workspace;

// Re-export commonly used types
pub use error::{LlmError, WorkspaceError};
pub use pipeline::{GenerationConfig, PipelineConfig, RunOutcome, WorkflowEngine, WorkflowEvent};
pub use workspace::FileSet;
