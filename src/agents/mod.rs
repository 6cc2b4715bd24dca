//! Pipeline steps: planning, synthesis, testing, review and documentation.
//!
//! Every step implements [`PipelineStep`] and returns a lazy [`StepStream`].
//! The last event of a stream is the step's outcome; the engine merges only
//! that event's file delta.

pub mod documenter;
pub mod planner;
pub mod reviewer;
pub mod synthesizer;
pub mod test_writer;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use documenter::{Documenter, README_FILE};
pub use planner::{Planner, PLAN_FILE};
pub use reviewer::{Reviewer, REVIEW_FILE};
pub use synthesizer::Synthesizer;
pub use test_writer::{is_test_path, TestWriter, DEFAULT_TEST_FILE, PLACEHOLDER_TEST_FILE};
pub use types::{clean_prose, PipelineStep, StepEvent, StepKind, StepStream};
