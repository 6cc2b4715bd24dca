//! Endpoint resolution: which server, key, model and timeout a call uses.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::LlmError;

/// Default base URL of a local LM Studio server.
pub const DEFAULT_LOCAL_BASE_URL: &str = "http://localhost:1234/v1";
/// Local server as seen from inside a container.
pub const DOCKER_LOCAL_BASE_URL: &str = "http://host.docker.internal:1234/v1";
/// Default base URL of the hosted API.
pub const DEFAULT_REMOTE_BASE_URL: &str = "https://api.openai.com/v1";
/// Placeholder key accepted by LM Studio.
pub const LOCAL_API_KEY: &str = "lm-studio";
/// Default model name for the local server.
pub const DEFAULT_LOCAL_MODEL: &str = "local-model";
/// Default hosted model.
pub const DEFAULT_REMOTE_MODEL: &str = "gpt-4o";
/// Local models are slow; allow four minutes per call.
pub const DEFAULT_LOCAL_TIMEOUT_SECS: u64 = 240;
/// Per-call timeout for the hosted API.
pub const DEFAULT_REMOTE_TIMEOUT_SECS: u64 = 60;

/// Where generation requests go.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendMode {
    /// A local OpenAI-compatible server (LM Studio, llama.cpp, ...).
    #[default]
    Local,
    /// The hosted API, authenticated with an API key.
    Remote,
}

impl fmt::Display for BackendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendMode::Local => write!(f, "local"),
            BackendMode::Remote => write!(f, "remote"),
        }
    }
}

impl FromStr for BackendMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(BackendMode::Local),
            "remote" => Ok(BackendMode::Remote),
            other => Err(format!("unknown backend mode '{}'", other)),
        }
    }
}

/// A fully resolved target for one generation call.
#[derive(Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Endpoint settings read once at startup.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendEndpoints {
    /// Overrides the base URL for both modes (`OPENAI_BASE_URL`).
    pub base_url_override: Option<String>,
    /// Whether the process runs inside a container (`RUNNING_IN_DOCKER`).
    pub running_in_docker: bool,
    /// Key for remote mode when the run does not supply one (`OPENAI_API_KEY`).
    #[serde(skip_serializing)]
    pub remote_api_key: Option<String>,
    /// Model for local mode (`LLM_MODEL`).
    pub local_model: String,
    /// Model for remote mode (`REMOTE_LLM_MODEL`).
    pub remote_model: String,
    /// Per-call timeout in local mode, seconds.
    pub local_timeout_secs: u64,
    /// Per-call timeout in remote mode, seconds.
    pub remote_timeout_secs: u64,
}

impl fmt::Debug for BackendEndpoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendEndpoints")
            .field("base_url_override", &self.base_url_override)
            .field("running_in_docker", &self.running_in_docker)
            .field("remote_api_key", &self.remote_api_key.as_ref().map(|_| "<redacted>"))
            .field("local_model", &self.local_model)
            .field("remote_model", &self.remote_model)
            .field("local_timeout_secs", &self.local_timeout_secs)
            .field("remote_timeout_secs", &self.remote_timeout_secs)
            .finish()
    }
}

impl Default for BackendEndpoints {
    fn default() -> Self {
        Self {
            base_url_override: None,
            running_in_docker: false,
            remote_api_key: None,
            local_model: DEFAULT_LOCAL_MODEL.to_string(),
            remote_model: DEFAULT_REMOTE_MODEL.to_string(),
            local_timeout_secs: DEFAULT_LOCAL_TIMEOUT_SECS,
            remote_timeout_secs: DEFAULT_REMOTE_TIMEOUT_SECS,
        }
    }
}

impl BackendEndpoints {
    /// Reads endpoint settings from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads endpoint settings through `lookup`, which maps a variable name to its value.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut endpoints = Self::default();
        endpoints.apply_lookup(lookup);
        endpoints
    }

    /// Overrides fields with any variable `lookup` provides. Empty values are ignored.
    pub fn apply_lookup<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = non_empty("OPENAI_BASE_URL") {
            self.base_url_override = Some(url);
        }
        if let Some(flag) = non_empty("RUNNING_IN_DOCKER") {
            self.running_in_docker =
                matches!(flag.trim().to_lowercase().as_str(), "true" | "1" | "yes");
        }
        if let Some(key) = non_empty("OPENAI_API_KEY") {
            self.remote_api_key = Some(key);
        }
        if let Some(model) = non_empty("LLM_MODEL") {
            self.local_model = model;
        }
        if let Some(model) = non_empty("REMOTE_LLM_MODEL") {
            self.remote_model = model;
        }
    }

    /// Resolves the endpoint for one call.
    ///
    /// `api_key` is the per-run override; it only applies in remote mode.
    pub fn resolve(&self, mode: BackendMode, api_key: Option<&str>) -> Result<Endpoint, LlmError> {
        match mode {
            BackendMode::Local => {
                let base_url = self.base_url_override.clone().unwrap_or_else(|| {
                    if self.running_in_docker {
                        DOCKER_LOCAL_BASE_URL.to_string()
                    } else {
                        DEFAULT_LOCAL_BASE_URL.to_string()
                    }
                });
                Ok(Endpoint {
                    base_url,
                    api_key: LOCAL_API_KEY.to_string(),
                    model: self.local_model.clone(),
                    timeout: Duration::from_secs(self.local_timeout_secs),
                })
            }
            BackendMode::Remote => {
                let api_key = api_key
                    .map(str::trim)
                    .filter(|k| !k.is_empty())
                    .map(str::to_string)
                    .or_else(|| self.remote_api_key.clone())
                    .ok_or(LlmError::MissingApiKey)?;
                Ok(Endpoint {
                    base_url: self
                        .base_url_override
                        .clone()
                        .unwrap_or_else(|| DEFAULT_REMOTE_BASE_URL.to_string()),
                    api_key,
                    model: self.remote_model.clone(),
                    timeout: Duration::from_secs(self.remote_timeout_secs),
                })
            }
        }
    }
}
