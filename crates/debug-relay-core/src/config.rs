//! Configuration for a debug session.

use std::{collections::HashMap, time::Duration};

use serde::{Deserialize, Serialize};

/// Pause inserted after each debug pause before the next command is sent.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(2);

/// Gateway used when none is configured.
pub const DEFAULT_GATEWAY: &str = "https://app.actionforge.dev";

/// Runner command used when none is configured.
pub const DEFAULT_RUNNER: &str = "actrun";

/// Runner version required by the `run` command.
pub const DEFAULT_REQUIRED_VERSION: &str = "v0.0.0";

/// Session configuration passed to the orchestrator.
///
/// Everything the session needs from the outside world lives here so tests
/// can substitute their own gateway, runner and pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Gateway URL (allocator and relay host).
    pub gateway: String,

    /// Runner command line (program plus arguments).
    pub runner_command: String,

    /// Graph document sent with the `run` command.
    pub graph_payload: String,

    /// Delay between a debug pause and the next step/resume command.
    #[serde(default = "default_settle_delay", with = "duration_millis")]
    pub settle_delay: Duration,

    /// Runner version the graph requires.
    #[serde(default = "default_required_version")]
    pub required_version: String,

    /// Initial breakpoints (node ids).
    #[serde(default)]
    pub breakpoints: Vec<String>,

    /// Run without stopping at breakpoints.
    #[serde(default)]
    pub ignore_breakpoints: bool,

    /// Extra environment for the runner, applied before the session variables.
    #[serde(default)]
    pub runner_env: HashMap<String, String>,
}

impl SessionConfig {
    /// Create a config for the given graph with default gateway and runner.
    #[must_use]
    pub fn new(graph_payload: impl Into<String>) -> Self {
        Self {
            gateway: DEFAULT_GATEWAY.to_string(),
            runner_command: DEFAULT_RUNNER.to_string(),
            graph_payload: graph_payload.into(),
            settle_delay: DEFAULT_SETTLE_DELAY,
            required_version: DEFAULT_REQUIRED_VERSION.to_string(),
            breakpoints: Vec::new(),
            ignore_breakpoints: false,
            runner_env: HashMap::new(),
        }
    }

    /// Set the gateway URL.
    #[must_use]
    pub fn with_gateway(mut self, gateway: impl Into<String>) -> Self {
        self.gateway = gateway.into();
        self
    }

    /// Set the runner command line.
    #[must_use]
    pub fn with_runner_command(mut self, command: impl Into<String>) -> Self {
        self.runner_command = command.into();
        self
    }

    /// Override the settling delay.
    #[must_use]
    pub const fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Set a runner environment variable.
    pub fn set_runner_env(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.runner_env.insert(key.into(), value.into());
    }

    /// Parsed gateway address.
    #[must_use]
    pub fn gateway(&self) -> Gateway {
        Gateway::parse(&self.gateway)
    }
}

fn default_settle_delay() -> Duration {
    DEFAULT_SETTLE_DELAY
}

fn default_required_version() -> String {
    DEFAULT_REQUIRED_VERSION.to_string()
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Gateway address split into the forms each collaborator needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gateway {
    secure: bool,
    host: String,
}

impl Gateway {
    /// Parse a gateway URL or bare host.
    ///
    /// Bare hosts use plain HTTP for `localhost` and TLS everywhere else.
    #[must_use]
    pub fn parse(input: &str) -> Self {
        let input = input.trim().trim_end_matches('/');
        let (secure, host) = if let Some(rest) = input.strip_prefix("https://") {
            (true, rest)
        } else if let Some(rest) = input.strip_prefix("http://") {
            (false, rest)
        } else {
            let local = input == "localhost" || input.starts_with("localhost:");
            (!local, input)
        };
        Self {
            secure,
            host: host.to_string(),
        }
    }

    /// Host (and port) without scheme, as handed to the runner.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Base URL for HTTP requests.
    #[must_use]
    pub fn http_base(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{scheme}://{}", self.host)
    }

    /// Base URL for websocket connections.
    #[must_use]
    pub fn ws_base(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{scheme}://{}", self.host)
    }
}
