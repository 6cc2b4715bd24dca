//! Sandboxed verification of generated file sets.
//!
//! # Architecture
//!
//! ```text
//! FileSet → temp dir → [pip install -r requirements.txt] → test command → SandboxResult
//!                                                              │
//!                                                              └─ SandboxUpdate::Output per line
//! ```
//!
//! The runner:
//! 1. Materializes the files into a fresh temporary directory
//! 2. Installs the dependency manifest when one is present
//! 3. Runs the test command with a bounded lifetime, streaming its stdout
//! 4. Appends stderr and a final success or failure marker
//!
//! # Example
//!
//! ```ignore
//! use forgeflow::runner::{SandboxConfig, SandboxRunner};
//!
//! let runner = SandboxRunner::new(SandboxConfig::default());
//! let result = runner.execute(&files).await?;
//! println!("{}", result.log_text());
//! ```

pub mod config;
pub mod result;
pub mod sandbox;
pub mod syntax;

pub use config::{SandboxConfig, DEFAULT_MANIFEST, DEFAULT_PYTHON};
pub use result::{
    render_log, SandboxError, SandboxResult, SandboxUpdate, ScriptOutput, FAILURE_MARKER,
    SUCCESS_MARKER,
};
pub use sandbox::{SandboxRunner, SandboxStream};
pub use syntax::{NoopSyntaxChecker, PythonSyntaxChecker, SyntaxChecker};
