//! Core types and the supervision trait.

use std::{collections::HashMap, fmt, path::PathBuf, process::ExitStatus};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Session identifier allocated by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Borrow the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// What to launch and with which environment overlay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Program to execute.
    pub program: PathBuf,
    /// Program arguments.
    pub args: Vec<String>,
    /// Variables merged onto the inherited environment.
    pub env: HashMap<String, String>,
}

impl LaunchSpec {
    /// Create a launch spec with no arguments or environment.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: HashMap::new(),
        }
    }

    /// Add an environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Supervisor error.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),
    #[error("Executable not found: {0}")]
    ExecutableNotFound(String),
    #[error("Runner already started")]
    AlreadyRunning,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Owns the runner process for the lifetime of a session.
#[async_trait]
pub trait Supervisor: Send {
    /// Launch the runner and start capturing its output.
    ///
    /// Returns once the process exists; output capture runs in the background.
    async fn start(&mut self, spec: &LaunchSpec) -> Result<(), SupervisorError>;

    /// Terminate the runner and stop output capture.
    ///
    /// Idempotent: calling it before `start`, after the process exited on its
    /// own, or twice in a row succeeds. Returns the exit status when a
    /// process was reaped by this call.
    async fn shutdown(&mut self) -> Result<Option<ExitStatus>, SupervisorError>;

    /// Kill the runner without waiting for it.
    ///
    /// Used when a session is dropped before `shutdown` could run. No-op
    /// when nothing is running.
    fn abort(&mut self);
}
