//! Configuration for workflow runs.
//!
//! Two layers:
//! - [`GenerationConfig`]: per-run choices (backend mode, credentials,
//!   target language, auto-fix). Immutable once a run starts.
//! - [`PipelineConfig`]: process-wide engine, sandbox, backend and retry
//!   settings. Built from defaults, then an optional YAML file, then the
//!   environment; CLI flags are applied last by the caller.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm::{BackendEndpoints, BackendMode, RetryPolicy};
use crate::runner::SandboxConfig;

/// Default ceiling for auto-fix iterations.
pub const DEFAULT_MAX_ITERATIONS: usize = 15;
/// Default capacity of the event channel.
pub const DEFAULT_EVENT_BUFFER: usize = 64;
/// Default target language.
pub const DEFAULT_LANGUAGE: &str = "Python";

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A variable or field has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// IO error while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The YAML file could not be parsed.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Per-run generation settings.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Local server or hosted API.
    pub backend_mode: BackendMode,
    /// Overrides the hosted API key for this run.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Language injected into prompts; drives file extensions and the manifest name.
    pub target_language: String,
    /// Loop on test failure instead of stopping.
    pub auto_fix: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            backend_mode: BackendMode::Local,
            api_key: None,
            target_language: DEFAULT_LANGUAGE.to_string(),
            auto_fix: false,
        }
    }
}

impl fmt::Debug for GenerationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationConfig")
            .field("backend_mode", &self.backend_mode)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("target_language", &self.target_language)
            .field("auto_fix", &self.auto_fix)
            .finish()
    }
}

impl GenerationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend_mode(mut self, mode: BackendMode) -> Self {
        self.backend_mode = mode;
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_target_language(mut self, language: impl Into<String>) -> Self {
        self.target_language = language.into();
        self
    }

    pub fn with_auto_fix(mut self, enabled: bool) -> Self {
        self.auto_fix = enabled;
        self
    }
}

/// Process-wide settings for the workflow engine.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Auto-fix iteration ceiling.
    pub max_iterations: usize,
    /// Capacity of the bounded event channel.
    pub event_buffer: usize,
    /// Sandbox commands, timeouts and location.
    pub sandbox: SandboxConfig,
    /// Backend endpoint settings.
    pub endpoints: BackendEndpoints,
    /// Retry policy for every backend call.
    pub retry: RetryPolicy,
    /// Defaults for runs started without explicit settings.
    pub generation: GenerationConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            event_buffer: DEFAULT_EVENT_BUFFER,
            sandbox: SandboxConfig::default(),
            endpoints: BackendEndpoints::default(),
            retry: RetryPolicy::default(),
            generation: GenerationConfig::default(),
        }
    }
}

/// On-disk YAML layout. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    max_iterations: Option<usize>,
    event_buffer: Option<usize>,
    sandbox: SandboxSection,
    backend: BackendSection,
    retry: RetrySection,
    generation: Option<GenerationConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SandboxSection {
    python: Option<String>,
    timeout_secs: Option<u64>,
    install_timeout_secs: Option<u64>,
    idle_read_wait_ms: Option<u64>,
    work_root: Option<PathBuf>,
    test_command: Option<Vec<String>>,
    install_command: Option<Vec<String>>,
    skip_install: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct BackendSection {
    base_url: Option<String>,
    running_in_docker: Option<bool>,
    local_model: Option<String>,
    remote_model: Option<String>,
    local_timeout_secs: Option<u64>,
    remote_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RetrySection {
    attempts: Option<u32>,
    delay_ms: Option<u64>,
}

impl PipelineConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `FORGE_MAX_ITERATIONS`: Auto-fix ceiling (default: 15)
    /// - `FORGE_EVENT_BUFFER`: Event channel capacity (default: 64)
    /// - `FORGE_SANDBOX_TIMEOUT_SECS`: Test command lifetime (default: 300)
    /// - `FORGE_INSTALL_TIMEOUT_SECS`: Install command lifetime (default: 180)
    /// - `FORGE_SANDBOX_ROOT`: Parent directory for sandboxes
    /// - `FORGE_PYTHON`: Interpreter (default: python3)
    /// - `FORGE_RETRY_ATTEMPTS`: Attempts per backend call (default: 3)
    /// - `FORGE_RETRY_DELAY_MS`: Pause between attempts (default: 2000)
    /// - `USE_LOCAL_LLM`: Default backend mode (default: true)
    /// - `OPENAI_BASE_URL`, `OPENAI_API_KEY`, `RUNNING_IN_DOCKER`,
    ///   `LLM_MODEL`, `REMOTE_LLM_MODEL`: Backend endpoints
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Defaults, then the YAML file at `path` (if any), then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::default(),
        };
        config.apply_lookup(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with a YAML file. The environment is not consulted.
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Defaults overlaid with YAML text.
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = if text.trim().is_empty() {
            ConfigFile::default()
        } else {
            serde_yaml::from_str(text)?
        };

        let mut config = Self::default();
        if let Some(v) = file.max_iterations {
            config.max_iterations = v;
        }
        if let Some(v) = file.event_buffer {
            config.event_buffer = v;
        }

        let sandbox = file.sandbox;
        if let Some(python) = sandbox.python {
            config.sandbox = config.sandbox.with_python(python);
        }
        if let Some(secs) = sandbox.timeout_secs {
            config.sandbox.timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = sandbox.install_timeout_secs {
            config.sandbox.install_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = sandbox.idle_read_wait_ms {
            config.sandbox.idle_read_wait = Duration::from_millis(ms);
        }
        if let Some(root) = sandbox.work_root {
            config.sandbox.work_root = Some(root);
        }
        if let Some(argv) = sandbox.test_command {
            config.sandbox.test_command = argv;
        }
        if let Some(argv) = sandbox.install_command {
            config.sandbox.install_command = Some(argv);
        }
        if sandbox.skip_install {
            config.sandbox.install_command = None;
        }

        let backend = file.backend;
        if let Some(url) = backend.base_url {
            config.endpoints.base_url_override = Some(url);
        }
        if let Some(flag) = backend.running_in_docker {
            config.endpoints.running_in_docker = flag;
        }
        if let Some(model) = backend.local_model {
            config.endpoints.local_model = model;
        }
        if let Some(model) = backend.remote_model {
            config.endpoints.remote_model = model;
        }
        if let Some(secs) = backend.local_timeout_secs {
            config.endpoints.local_timeout_secs = secs;
        }
        if let Some(secs) = backend.remote_timeout_secs {
            config.endpoints.remote_timeout_secs = secs;
        }

        if let Some(attempts) = file.retry.attempts {
            config.retry.attempts = attempts;
        }
        if let Some(ms) = file.retry.delay_ms {
            config.retry.delay = Duration::from_millis(ms);
        }

        if let Some(generation) = file.generation {
            config.generation = generation;
        }

        Ok(config)
    }

    /// Overrides fields with any variable `lookup` provides.
    pub fn apply_lookup<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("FORGE_MAX_ITERATIONS") {
            self.max_iterations = parse_env_value(&val, "FORGE_MAX_ITERATIONS")?;
        }
        if let Some(val) = lookup("FORGE_EVENT_BUFFER") {
            self.event_buffer = parse_env_value(&val, "FORGE_EVENT_BUFFER")?;
        }

        if let Some(val) = lookup("FORGE_PYTHON") {
            self.sandbox = self.sandbox.clone().with_python(val);
        }
        if let Some(val) = lookup("FORGE_SANDBOX_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "FORGE_SANDBOX_TIMEOUT_SECS")?;
            self.sandbox.timeout = Duration::from_secs(secs);
        }
        if let Some(val) = lookup("FORGE_INSTALL_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "FORGE_INSTALL_TIMEOUT_SECS")?;
            self.sandbox.install_timeout = Duration::from_secs(secs);
        }
        if let Some(val) = lookup("FORGE_SANDBOX_ROOT") {
            if !val.trim().is_empty() {
                self.sandbox.work_root = Some(PathBuf::from(val));
            }
        }

        if let Some(val) = lookup("FORGE_RETRY_ATTEMPTS") {
            self.retry.attempts = parse_env_value(&val, "FORGE_RETRY_ATTEMPTS")?;
        }
        if let Some(val) = lookup("FORGE_RETRY_DELAY_MS") {
            let ms: u64 = parse_env_value(&val, "FORGE_RETRY_DELAY_MS")?;
            self.retry.delay = Duration::from_millis(ms);
        }

        if let Some(val) = lookup("USE_LOCAL_LLM") {
            self.generation.backend_mode = if parse_env_bool(&val, "USE_LOCAL_LLM")? {
                BackendMode::Local
            } else {
                BackendMode::Remote
            };
        }

        self.endpoints.apply_lookup(&lookup);
        Ok(())
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iterations == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_iterations must be greater than 0".to_string(),
            ));
        }

        if self.event_buffer == 0 {
            return Err(ConfigError::ValidationFailed(
                "event_buffer must be greater than 0".to_string(),
            ));
        }

        if self.sandbox.test_command.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "sandbox test_command cannot be empty".to_string(),
            ));
        }

        if self.sandbox.timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "sandbox timeout must be greater than 0".to_string(),
            ));
        }

        if self.sandbox.idle_read_wait.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "sandbox idle_read_wait must be greater than 0".to_string(),
            ));
        }

        if self.retry.attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "retry attempts must be at least 1".to_string(),
            ));
        }

        if self.generation.target_language.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "target_language cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Builder method to set the auto-fix ceiling.
    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    /// Builder method to set the event channel capacity.
    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity;
        self
    }

    /// Builder method to set the sandbox configuration.
    pub fn with_sandbox(mut self, sandbox: SandboxConfig) -> Self {
        self.sandbox = sandbox;
        self
    }

    /// Builder method to set the backend endpoints.
    pub fn with_endpoints(mut self, endpoints: BackendEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Builder method to set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Builder method to set the default generation settings.
    pub fn with_generation(mut self, generation: GenerationConfig) -> Self {
        self.generation = generation;
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_iterations, 15);
        assert_eq!(config.event_buffer, 64);
        assert_eq!(config.retry.attempts, 3);
        assert_eq!(config.retry.delay, Duration::from_secs(2));
        assert_eq!(config.generation.target_language, "Python");
        assert_eq!(config.generation.backend_mode, BackendMode::Local);
        assert!(!config.generation.auto_fix);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_generation_config_serde_defaults() {
        let config: GenerationConfig =
            serde_json::from_str(r#"{"auto_fix": true, "backend_mode": "remote", "api_key": "k"}"#)
                .unwrap();
        assert!(config.auto_fix);
        assert_eq!(config.backend_mode, BackendMode::Remote);
        assert_eq!(config.target_language, "Python");
        assert_eq!(config.api_key.as_deref(), Some("k"));

        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("api_key"));
        assert!(!format!("{:?}", config).contains("\"k\""));
    }

    #[test]
    fn test_apply_lookup() {
        let mut config = PipelineConfig::default();
        config
            .apply_lookup(lookup(&[
                ("FORGE_MAX_ITERATIONS", "4"),
                ("FORGE_SANDBOX_TIMEOUT_SECS", "20"),
                ("FORGE_PYTHON", "python3.12"),
                ("FORGE_RETRY_DELAY_MS", "10"),
                ("USE_LOCAL_LLM", "false"),
                ("OPENAI_API_KEY", "sk-env"),
            ]))
            .unwrap();

        assert_eq!(config.max_iterations, 4);
        assert_eq!(config.sandbox.timeout, Duration::from_secs(20));
        assert_eq!(config.sandbox.test_command[0], "python3.12");
        assert_eq!(config.retry.delay, Duration::from_millis(10));
        assert_eq!(config.generation.backend_mode, BackendMode::Remote);
        assert_eq!(config.endpoints.remote_api_key.as_deref(), Some("sk-env"));
    }

    #[test]
    fn test_apply_lookup_rejects_garbage() {
        let mut config = PipelineConfig::default();
        let err = config
            .apply_lookup(lookup(&[("FORGE_EVENT_BUFFER", "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains("FORGE_EVENT_BUFFER"));

        let err = config
            .apply_lookup(lookup(&[("USE_LOCAL_LLM", "maybe")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_yaml_overlay() {
        let yaml = r#"
max_iterations: 5
sandbox:
  timeout_secs: 30
  test_command: ["sh", "-c", "exit 0"]
  skip_install: true
backend:
  local_model: qwen2.5-coder
retry:
  attempts: 2
  delay_ms: 100
generation:
  target_language: Rust
  auto_fix: true
"#;
        let config = PipelineConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.max_iterations, 5);
        assert_eq!(config.sandbox.timeout, Duration::from_secs(30));
        assert_eq!(config.sandbox.test_command, vec!["sh", "-c", "exit 0"]);
        assert!(config.sandbox.install_command.is_none());
        assert_eq!(config.endpoints.local_model, "qwen2.5-coder");
        assert_eq!(config.retry.attempts, 2);
        assert_eq!(config.generation.target_language, "Rust");
        assert!(config.generation.auto_fix);
    }

    #[test]
    fn test_env_python_keeps_yaml_commands() {
        let yaml = r#"
sandbox:
  test_command: ["make", "test"]
  skip_install: true
"#;
        let mut config = PipelineConfig::from_yaml_str(yaml).unwrap();
        config
            .apply_lookup(lookup(&[("FORGE_PYTHON", "python3.12")]))
            .unwrap();

        assert_eq!(config.sandbox.python, "python3.12");
        assert_eq!(config.sandbox.test_command, vec!["make", "test"]);
        assert!(config.sandbox.install_command.is_none());
    }

    #[test]
    fn test_yaml_unknown_field_is_an_error() {
        let err = PipelineConfig::from_yaml_str("max_iteration: 3").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)));
        assert!(PipelineConfig::from_yaml_str("").is_ok());
    }

    #[test]
    fn test_yaml_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("forgeflow.yaml");
        std::fs::write(&path, "event_buffer: 8\n").unwrap();
        assert_eq!(PipelineConfig::from_yaml_file(&path).unwrap().event_buffer, 8);

        let missing = PipelineConfig::from_yaml_file(&dir.path().join("nope.yaml"));
        assert!(matches!(missing, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_validation() {
        let err = PipelineConfig::default()
            .with_max_iterations(0)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("max_iterations"));

        let err = PipelineConfig::default()
            .with_event_buffer(0)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("event_buffer"));

        let err = PipelineConfig::default()
            .with_sandbox(SandboxConfig::default().with_test_command(Vec::<String>::new()))
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("test_command"));

        let err = PipelineConfig::default()
            .with_retry(RetryPolicy {
                attempts: 0,
                delay: Duration::ZERO,
            })
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("retry"));
    }
}
