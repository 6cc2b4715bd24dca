//! Configuration for sandboxed test runs.

use std::path::PathBuf;
use std::time::Duration;

/// Default interpreter for tests, installs and single scripts.
pub const DEFAULT_PYTHON: &str = "python3";
/// Dependency manifest that triggers the install step.
pub const DEFAULT_MANIFEST: &str = "requirements.txt";

/// How the sandbox installs dependencies and runs the test suite.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Interpreter used by the default commands and by single-script runs.
    pub python: String,
    /// argv of the test command, run inside the sandbox directory.
    pub test_command: Vec<String>,
    /// argv of the install command. `None` disables installation.
    pub install_command: Option<Vec<String>>,
    /// File whose presence triggers the install command.
    pub manifest: String,
    /// Lifetime of the test command.
    pub timeout: Duration,
    /// Lifetime of the install command.
    pub install_timeout: Duration,
    /// Longest single wait for a line of output before re-checking the deadline.
    pub idle_read_wait: Duration,
    /// Parent directory for sandbox directories. System temp dir when `None`.
    pub work_root: Option<PathBuf>,
    /// Extra environment variables for every spawned process.
    pub env_vars: Vec<(String, String)>,
}

impl SandboxConfig {
    /// Creates a configuration that runs pytest with `python`.
    pub fn for_python(python: impl Into<String>) -> Self {
        let python = python.into();
        Self {
            test_command: vec![
                python.clone(),
                "-m".to_string(),
                "pytest".to_string(),
                ".".to_string(),
            ],
            install_command: Some(vec![
                python.clone(),
                "-m".to_string(),
                "pip".to_string(),
                "install".to_string(),
                "-q".to_string(),
                "-r".to_string(),
                DEFAULT_MANIFEST.to_string(),
            ]),
            python,
            manifest: DEFAULT_MANIFEST.to_string(),
            timeout: Duration::from_secs(300),
            install_timeout: Duration::from_secs(180),
            idle_read_wait: Duration::from_millis(250),
            work_root: None,
            env_vars: Vec::new(),
        }
    }

    /// Switches the interpreter.
    ///
    /// Commands that start with the previous interpreter are rewritten; custom
    /// commands are kept as they are.
    pub fn with_python(mut self, python: impl Into<String>) -> Self {
        let python = python.into();
        let previous = std::mem::replace(&mut self.python, python.clone());
        let swap = |argv: &mut Vec<String>| {
            if let Some(program) = argv.first_mut() {
                if *program == previous {
                    *program = python.clone();
                }
            }
        };
        swap(&mut self.test_command);
        if let Some(install) = self.install_command.as_mut() {
            swap(install);
        }
        self
    }

    /// Sets the test command argv.
    pub fn with_test_command<I, S>(mut self, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.test_command = argv.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the install command argv.
    pub fn with_install_command<I, S>(mut self, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.install_command = Some(argv.into_iter().map(Into::into).collect());
        self
    }

    /// Disables dependency installation.
    pub fn without_install(mut self) -> Self {
        self.install_command = None;
        self
    }

    /// Sets the test command lifetime.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the install command lifetime.
    pub fn with_install_timeout(mut self, timeout: Duration) -> Self {
        self.install_timeout = timeout;
        self
    }

    /// Sets the per-read idle wait.
    pub fn with_idle_read_wait(mut self, wait: Duration) -> Self {
        self.idle_read_wait = wait;
        self
    }

    /// Places sandbox directories under `root`.
    pub fn with_work_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.work_root = Some(root.into());
        self
    }

    /// Adds an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.push((key.into(), value.into()));
        self
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self::for_python(DEFAULT_PYTHON)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_python_keeps_custom_commands() {
        let config = SandboxConfig::default().with_python("python3.12");
        assert_eq!(config.python, "python3.12");
        assert_eq!(config.test_command, vec!["python3.12", "-m", "pytest", "."]);
        assert_eq!(
            config.install_command.as_deref().map(|c| c[0].as_str()),
            Some("python3.12")
        );

        let config = SandboxConfig::default()
            .with_test_command(["make", "test"])
            .without_install()
            .with_python("python3.12");
        assert_eq!(config.python, "python3.12");
        assert_eq!(config.test_command, vec!["make", "test"]);
        assert!(config.install_command.is_none());
    }

    #[test]
    fn test_default_commands() {
        let config = SandboxConfig::default();
        assert_eq!(config.test_command, vec!["python3", "-m", "pytest", "."]);
        assert_eq!(
            config.install_command.as_deref().map(|c| c[0].as_str()),
            Some("python3")
        );
        assert_eq!(config.timeout, Duration::from_secs(300));
        assert_eq!(config.idle_read_wait, Duration::from_millis(250));
    }

    #[test]
    fn test_builder() {
        let config = SandboxConfig::for_python("/usr/bin/python3.12")
            .with_test_command(["sh", "-c", "exit 0"])
            .without_install()
            .with_timeout(Duration::from_secs(5))
            .with_work_root("/tmp/forge")
            .with_env("CI", "1");

        assert_eq!(config.python, "/usr/bin/python3.12");
        assert_eq!(config.test_command, vec!["sh", "-c", "exit 0"]);
        assert!(config.install_command.is_none());
        assert_eq!(config.work_root, Some(PathBuf::from("/tmp/forge")));
        assert_eq!(config.env_vars, vec![("CI".to_string(), "1".to_string())]);
    }
}
