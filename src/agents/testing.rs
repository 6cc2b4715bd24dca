//! Scripted backends shared by the step tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use super::types::{StepEvent, StepStream};
use crate::error::LlmError;
use crate::llm::{GenerationBackend, ResilientBackend, RetryPolicy};
use crate::pipeline::config::GenerationConfig;

/// Answers by matching a fragment of the system prompt; records every call.
#[derive(Default)]
pub(crate) struct ScriptedBackend {
    replies: Vec<(&'static str, String)>,
    fail: bool,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// A backend whose every call times out.
    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub(crate) fn reply(mut self, role: &'static str, text: impl Into<String>) -> Self {
        self.replies.push((role, text.into()));
        self
    }

    /// User prompts sent with a system prompt containing `role`.
    pub(crate) fn prompts_for(&self, role: &str) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(system, _)| system.contains(role))
            .map(|(_, user)| user.clone())
            .collect()
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    async fn generate(
        &self,
        system: &str,
        user: &str,
        _config: &GenerationConfig,
    ) -> Result<String, LlmError> {
        self.calls
            .lock()
            .unwrap()
            .push((system.to_string(), user.to_string()));
        if self.fail {
            return Err(LlmError::Timeout { seconds: 1 });
        }
        self.replies
            .iter()
            .find(|(role, _)| system.contains(role))
            .map(|(_, text)| text.clone())
            .ok_or_else(|| LlmError::ApiError {
                code: 500,
                message: "no scripted reply".to_string(),
            })
    }
}

/// Wraps a scripted backend with a fast retry policy.
pub(crate) fn resilient(backend: Arc<ScriptedBackend>) -> ResilientBackend {
    ResilientBackend::new(backend).with_policy(RetryPolicy {
        attempts: 3,
        delay: Duration::from_millis(1),
    })
}

pub(crate) async fn collect(stream: StepStream<'_>) -> Vec<StepEvent> {
    stream.collect().await
}
