//! Workspace: the file set a run produces and the checkpoint boundary that persists it.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  merge(delta)  ┌──────────────┐  commit(files)  ┌──────────────────────┐
//! │ Step events  │ ─────────────▶ │   FileSet    │ ──────────────▶ │ WorkspaceCommitter   │
//! └──────────────┘                └──────────────┘                 │  DirectoryWorkspace  │
//!                                                                  │  NullWorkspace       │
//!                                                                  └──────────────────────┘
//! ```

mod files;
mod store;

pub use files::{
    is_directory_marker, is_log_path, validate_relative_path, FileSet, PathError,
    ERROR_LOG_FILE, TEST_RESULTS_FILE,
};
pub use store::{load_directory, DirectoryWorkspace, NullWorkspace, WorkspaceCommitter};
