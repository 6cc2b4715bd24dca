//! Integration tests against a live OpenAI-compatible endpoint.
//!
//! Local tests expect an LM Studio style server on `OPENAI_BASE_URL` (default
//! `http://localhost:1234/v1`); remote tests need `OPENAI_API_KEY`.
//! Run with: cargo test --test llm_integration -- --ignored

use std::sync::Arc;

use futures::StreamExt;

use forgeflow::llm::{BackendEndpoints, BackendMode, ChatBackend, GenerationBackend, ResilientBackend};
use forgeflow::pipeline::{GenerationConfig, PipelineConfig, RunOutcome, WorkflowEngine};
use forgeflow::LlmError;

fn remote_config() -> GenerationConfig {
    let key = std::env::var("OPENAI_API_KEY")
        .expect("OPENAI_API_KEY environment variable must be set for remote tests");
    GenerationConfig::new()
        .with_backend_mode(BackendMode::Remote)
        .with_api_key(key)
}

fn backend() -> ChatBackend {
    ChatBackend::new(BackendEndpoints::from_env()).expect("HTTP client should build")
}

#[tokio::test]
#[ignore] // Run with: cargo test --test llm_integration -- --ignored
async fn test_remote_simple_generation() {
    let reply = backend()
        .generate(
            "You are a helpful assistant. Reply concisely.",
            "What is 2 + 2? Reply with just the number.",
            &remote_config(),
        )
        .await;

    let text = reply.expect("generation should succeed");
    assert!(text.contains('4'), "Response should contain '4', got: {}", text);
}

#[tokio::test]
#[ignore]
async fn test_local_generation() {
    let reply = backend()
        .generate(
            "You are a helpful assistant. Reply concisely.",
            "Reply with the word ready.",
            &GenerationConfig::new(),
        )
        .await;

    let text = reply.expect("local server should answer");
    assert!(!text.trim().is_empty());
}

#[tokio::test]
async fn test_remote_without_key_fails_fast() {
    let endpoints = BackendEndpoints {
        remote_api_key: None,
        ..BackendEndpoints::default()
    };
    let backend = ChatBackend::new(endpoints).expect("HTTP client should build");
    let config = GenerationConfig::new().with_backend_mode(BackendMode::Remote);

    let result = backend.generate("system", "user", &config).await;
    assert!(matches!(result, Err(LlmError::MissingApiKey)));
}

#[tokio::test]
#[ignore]
async fn test_resilient_backend_against_unreachable_server() {
    let endpoints = BackendEndpoints {
        base_url_override: Some("http://127.0.0.1:9/v1".to_string()),
        ..BackendEndpoints::default()
    };
    let backend = ResilientBackend::new(Arc::new(
        ChatBackend::new(endpoints).expect("HTTP client should build"),
    ));

    let reply = backend
        .generate("system", "user", &GenerationConfig::new(), || "fallback".to_string())
        .await;
    assert!(reply.degraded);
    assert_eq!(reply.text, "fallback");
}

#[tokio::test]
#[ignore]
async fn test_remote_full_workflow() {
    let config = PipelineConfig::from_env().expect("environment config should be valid");
    let engine = Arc::new(WorkflowEngine::from_config(&config).expect("backend should build"));

    let events: Vec<_> = engine
        .stream(
            "Write a function that returns the nth Fibonacci number",
            remote_config().with_auto_fix(true),
        )
        .collect()
        .await;

    let report = events
        .last()
        .and_then(|e| e.report())
        .expect("run should end with a report");
    assert_ne!(report.outcome, RunOutcome::Cancelled);
    assert!(report.file_count > 0);
}
