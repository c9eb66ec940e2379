//! Relay connection abstraction.

use async_trait::async_trait;
use debug_relay_core::SessionId;
use thiserror::Error;

use crate::protocol::Envelope;

/// Relay error.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Failed to connect to relay: {0}")]
    Connect(String),
    #[error("Relay connection closed")]
    Closed,
    #[error("Relay transport error: {0}")]
    Transport(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Path of the controlling side's relay endpoint for a session.
#[must_use]
pub fn relay_path(session_id: &SessionId) -> String {
    format!("/api/v2/ws/browser/{session_id}")
}

/// An open, bidirectional relay connection.
#[async_trait]
pub trait RelayConnection: Send {
    /// Send one envelope.
    async fn send(&mut self, envelope: &Envelope) -> Result<(), RelayError>;

    /// Receive the next well-formed envelope.
    ///
    /// Frames that do not parse are skipped. Returns `None` once the relay
    /// closes the connection.
    async fn recv(&mut self) -> Result<Option<Envelope>, RelayError>;

    /// Close the connection. Safe to call more than once.
    async fn close(&mut self);
}

/// Opens relay connections for sessions.
#[async_trait]
pub trait RelayConnector: Send + Sync {
    /// Connection type produced by this connector.
    type Connection: RelayConnection;

    /// Connect to the relay endpoint for `session_id`.
    async fn connect(&self, session_id: &SessionId) -> Result<Self::Connection, RelayError>;
}
