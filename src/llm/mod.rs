//! Text generation for forgeflow.
//!
//! # Architecture
//!
//! ```text
//! Step ──▶ ResilientBackend ──▶ dyn GenerationBackend ──▶ ChatBackend ──▶ LiteLlmClient
//!            (retry, fallback)                              (endpoint per run)
//! ```
//!
//! `ChatBackend` resolves an [`Endpoint`] from [`BackendEndpoints`] on every
//! call, so one backend serves local and remote runs side by side.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use forgeflow::llm::{BackendEndpoints, ChatBackend, ResilientBackend};
//!
//! let chat = ChatBackend::new(BackendEndpoints::from_env())?;
//! let backend = ResilientBackend::new(Arc::new(chat));
//! let reply = backend.generate(system, user, &config, || fallback.to_string()).await;
//! ```

pub mod backend;
pub mod endpoint;
pub mod litellm;

pub use backend::{
    is_unavailable_reply, simulated_reply, BackendReply, ChatBackend, GenerationBackend,
    ResilientBackend, RetryPolicy, DEFAULT_TEMPERATURE, UNAVAILABLE_MARKER,
};
pub use endpoint::{BackendEndpoints, BackendMode, Endpoint};
pub use litellm::{
    Choice, GenerationRequest, GenerationResponse, LiteLlmClient, LlmProvider, Message, Usage,
};
