//! Error types for forgeflow operations.
//!
//! Defines the error types shared across subsystems:
//! - Generation backend (LLM API) interactions
//! - Workspace persistence at commit checkpoints
//!
//! Sandbox, configuration and workflow errors live next to the modules that
//! raise them.

use thiserror::Error;

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API key: OPENAI_API_KEY is not set and no override was supplied")]
    MissingApiKey,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Request timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LlmError {
    /// Returns true if retrying the same call cannot succeed.
    pub fn is_permanent(&self) -> bool {
        matches!(self, LlmError::MissingApiKey)
    }
}

/// Errors that can occur while persisting a file set.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("Refusing to write invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
