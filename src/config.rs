//! Supervisor configuration parsing and validation.

use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::manager::table::AppId;
use crate::{AppError, Result};

/// File name of the worker runner binary.
pub const RUNNER_BIN: &str = "appvisor-runner";

fn default_base_port() -> u16 {
    12345
}

fn default_startup_timeout_seconds() -> u64 {
    10
}

fn default_close_linger_ms() -> u64 {
    1000
}

/// One app the CLI launches at startup.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AppEntry {
    /// Caller-chosen id (integer or string).
    pub id: AppId,
    /// App module name.
    pub module: String,
    /// App function name.
    pub function: String,
    /// Extra arguments forwarded to the app.
    #[serde(default)]
    pub args: Vec<String>,
}

/// Supervisor configuration parsed from a TOML file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SupervisorConfig {
    /// Lowest port handed to a worker.
    #[serde(default = "default_base_port")]
    pub base_port: u16,
    /// Runner executable; defaults to `appvisor-runner` next to the
    /// current executable.
    #[serde(default)]
    pub runner: Option<PathBuf>,
    /// Arguments placed before the port on every runner invocation.
    #[serde(default)]
    pub runner_args: Vec<String>,
    /// Deadline for a freshly spawned worker to answer its first ping.
    #[serde(default = "default_startup_timeout_seconds")]
    pub startup_timeout_seconds: u64,
    /// Per-round-trip timeout; 0 means wait indefinitely.
    #[serde(default)]
    pub request_timeout_seconds: u64,
    /// Upper bound on socket and process close during teardown.
    #[serde(default = "default_close_linger_ms")]
    pub close_linger_ms: u64,
    /// Apps launched by the `run` subcommand.
    #[serde(default)]
    pub apps: Vec<AppEntry>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            base_port: default_base_port(),
            runner: None,
            runner_args: Vec::new(),
            startup_timeout_seconds: default_startup_timeout_seconds(),
            request_timeout_seconds: 0,
            close_linger_ms: default_close_linger_ms(),
            apps: Vec::new(),
        }
    }
}

impl SupervisorConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the runner executable.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if no runner is configured and the current
    /// executable's directory cannot be determined.
    pub fn runner_path(&self) -> Result<PathBuf> {
        if let Some(runner) = &self.runner {
            return Ok(runner.clone());
        }
        let exe = env::current_exe()
            .map_err(|err| AppError::Config(format!("cannot locate current executable: {err}")))?;
        let dir = exe
            .parent()
            .ok_or_else(|| AppError::Config("current executable has no parent directory".into()))?;
        Ok(dir.join(format!("{RUNNER_BIN}{}", env::consts::EXE_SUFFIX)))
    }

    /// Readiness handshake deadline.
    #[must_use]
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_seconds)
    }

    /// Per-round-trip deadline, if any.
    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_seconds > 0).then_some(Duration::from_secs(self.request_timeout_seconds))
    }

    /// Close linger for sockets and processes.
    #[must_use]
    pub fn close_linger(&self) -> Duration {
        Duration::from_millis(self.close_linger_ms)
    }

    /// Check field ranges and app id uniqueness.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` describing the first violation.
    pub fn validate(&self) -> Result<()> {
        if self.base_port == 0 {
            return Err(AppError::Config("base_port must be greater than zero".into()));
        }

        if self.startup_timeout_seconds == 0 {
            return Err(AppError::Config(
                "startup_timeout_seconds must be greater than zero".into(),
            ));
        }

        let mut seen = HashSet::new();
        for entry in &self.apps {
            if !seen.insert(&entry.id) {
                return Err(AppError::Config(format!("duplicate app id '{}'", entry.id)));
            }
        }

        Ok(())
    }
}
