//! Lines captured during a session.

use serde::{Deserialize, Serialize};

/// One captured line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", content = "line", rename_all = "snake_case")]
pub enum LogMsg {
    /// Runner standard output.
    Stdout(String),
    /// Runner standard error.
    Stderr(String),
    /// Log line the runner reported over the relay.
    Relay(String),
    /// A slow listener missed this many lines.
    Dropped(u64),
    /// Capture is complete.
    Finished,
}

impl LogMsg {
    /// Approximate heap size, used for history accounting.
    #[must_use]
    pub fn approx_bytes(&self) -> usize {
        const OVERHEAD: usize = 8;
        match self {
            Self::Stdout(s) | Self::Stderr(s) | Self::Relay(s) => s.len() + OVERHEAD,
            Self::Dropped(_) | Self::Finished => OVERHEAD,
        }
    }

    /// The line text, if any.
    #[must_use]
    pub fn line(&self) -> Option<&str> {
        match self {
            Self::Stdout(s) | Self::Stderr(s) | Self::Relay(s) => Some(s),
            Self::Dropped(_) | Self::Finished => None,
        }
    }
}

impl std::fmt::Display for LogMsg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdout(s) => write!(f, "{s}"),
            Self::Stderr(s) => write!(f, "[stderr] {s}"),
            Self::Relay(s) => write!(f, "Log: {s}"),
            Self::Dropped(n) => write!(f, "[output] {n} lines dropped"),
            Self::Finished => Ok(()),
        }
    }
}
