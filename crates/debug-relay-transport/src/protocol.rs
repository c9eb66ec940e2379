//! Wire protocol between this side and the runner.
//!
//! Every relay frame is an [`Envelope`]. `control` envelopes are plaintext
//! signalling from the relay itself; `data` envelopes carry an encrypted
//! [`DebugMessage`] that only the two session ends can read.

use debug_relay_core::{CipherError, SessionCipher};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Control message sent by the relay once the runner has joined.
pub const RUNNER_CONNECTED: &str = "runner_connected";

/// Protocol error.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Message has no type field")]
    MissingType,
    #[error("Unknown message type: {0}")]
    UnknownType(String),
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Outer relay frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    /// Plaintext relay signalling.
    Control { message: String },
    /// Encrypted payload (base64 of nonce + ciphertext).
    Data { payload: String },
}

impl Envelope {
    const KINDS: &'static [&'static str] = &["control", "data"];

    /// Create a control envelope.
    #[must_use]
    pub fn control(message: impl Into<String>) -> Self {
        Self::Control {
            message: message.into(),
        }
    }

    /// Encrypt `message` into a data envelope.
    ///
    /// # Errors
    /// Returns error if the message cannot be serialized.
    pub fn seal(cipher: &SessionCipher, message: &DebugMessage) -> Result<Self, CipherError> {
        Ok(Self::Data {
            payload: cipher.encrypt(message)?,
        })
    }

    /// Parse a relay frame.
    ///
    /// # Errors
    /// Returns error if the frame is not JSON, has an unknown type, or lacks
    /// the fields of its type.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text)?;
        check_kind(&value, Self::KINDS)?;
        Ok(serde_json::from_value(value)?)
    }

    /// Serialize for the wire.
    ///
    /// # Errors
    /// Returns error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Body of the `run` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    /// Graph document to execute.
    pub payload: String,
    #[serde(default)]
    pub start_paused: bool,
    #[serde(default)]
    pub ignore_breakpoints: bool,
    #[serde(default)]
    pub breakpoints: Vec<String>,
    #[serde(default)]
    pub required_version: String,
}

/// Decrypted message, in either direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DebugMessage {
    /// Start executing a graph.
    Run(RunRequest),
    /// Execute one node, then pause again.
    DebugStep,
    /// Continue until the next breakpoint or the end.
    DebugResume,
    /// Runner log line.
    Log { message: String },
    /// Runner error log line.
    LogError { message: String },
    /// Runner warning.
    Warning { message: String },
    /// Runner paused at a node.
    DebugState {
        #[serde(rename = "fullPath", default, skip_serializing_if = "Option::is_none")]
        full_path: Option<String>,
    },
    /// Graph completed.
    JobFinished,
    /// Graph failed.
    JobError { error: String },
}

impl DebugMessage {
    const KINDS: &'static [&'static str] = &[
        "run",
        "debug_step",
        "debug_resume",
        "log",
        "log_error",
        "warning",
        "debug_state",
        "job_finished",
        "job_error",
    ];

    /// Validate a decrypted value into a message.
    ///
    /// # Errors
    /// Returns error on a missing or unknown type, or missing fields.
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        check_kind(&value, Self::KINDS)?;
        Ok(serde_json::from_value(value)?)
    }

    /// Wire name of this message kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Run(_) => "run",
            Self::DebugStep => "debug_step",
            Self::DebugResume => "debug_resume",
            Self::Log { .. } => "log",
            Self::LogError { .. } => "log_error",
            Self::Warning { .. } => "warning",
            Self::DebugState { .. } => "debug_state",
            Self::JobFinished => "job_finished",
            Self::JobError { .. } => "job_error",
        }
    }
}

fn check_kind(value: &Value, known: &[&str]) -> Result<(), ProtocolError> {
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingType)?;
    if known.contains(&kind) {
        Ok(())
    } else {
        Err(ProtocolError::UnknownType(kind.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use debug_relay_core::SharedKey;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_envelope_wire_format() {
        let control = Envelope::parse(r#"{"type":"control","message":"runner_connected"}"#).unwrap();
        assert_eq!(control, Envelope::control(RUNNER_CONNECTED));

        let data = Envelope::Data {
            payload: "abc=".into(),
        };
        let json: Value = serde_json::from_str(&data.to_json().unwrap()).unwrap();
        assert_eq!(json, json!({"type": "data", "payload": "abc="}));
    }

    #[test]
    fn test_envelope_rejects_unknown_and_malformed() {
        assert!(matches!(
            Envelope::parse(r#"{"type":"stream","payload":"x"}"#),
            Err(ProtocolError::UnknownType(t)) if t == "stream"
        ));
        assert!(matches!(
            Envelope::parse(r#"{"message":"x"}"#),
            Err(ProtocolError::MissingType)
        ));
        assert!(matches!(
            Envelope::parse(r#"{"type":"data"}"#),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(Envelope::parse("not json"), Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn test_run_command_serialization() {
        let msg = DebugMessage::Run(RunRequest {
            payload: "{\"entry\":\"start\"}".into(),
            start_paused: true,
            ignore_breakpoints: false,
            breakpoints: vec![],
            required_version: "v0.0.0".into(),
        });

        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({
                "type": "run",
                "payload": "{\"entry\":\"start\"}",
                "start_paused": true,
                "ignore_breakpoints": false,
                "breakpoints": [],
                "required_version": "v0.0.0"
            })
        );
        assert_eq!(
            serde_json::to_value(DebugMessage::DebugStep).unwrap(),
            json!({"type": "debug_step"})
        );
        assert_eq!(
            serde_json::to_value(DebugMessage::DebugResume).unwrap(),
            json!({"type": "debug_resume"})
        );
    }

    #[test]
    fn test_inbound_events() {
        let state = DebugMessage::from_value(json!({
            "type": "debug_state",
            "fullPath": "nodeA",
            "nodes": {"nodeA": {"inputs": {}}}
        }))
        .unwrap();
        assert_eq!(
            state,
            DebugMessage::DebugState {
                full_path: Some("nodeA".into())
            }
        );

        let bare = DebugMessage::from_value(json!({"type": "debug_state"})).unwrap();
        assert_eq!(bare, DebugMessage::DebugState { full_path: None });

        let error = DebugMessage::from_value(json!({"type": "job_error", "error": "boom"})).unwrap();
        assert_eq!(error.kind(), "job_error");

        assert!(matches!(
            DebugMessage::from_value(json!({"type": "debug_teleport"})),
            Err(ProtocolError::UnknownType(_))
        ));
        assert!(matches!(
            DebugMessage::from_value(json!({"type": "log"})),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_seal_and_open() {
        let cipher = SessionCipher::new(&SharedKey::generate());
        let envelope = Envelope::seal(&cipher, &DebugMessage::DebugStep).unwrap();

        let Envelope::Data { payload } = envelope else {
            panic!("Expected data envelope");
        };
        let value: Value = cipher.decrypt(&payload).unwrap();
        assert_eq!(DebugMessage::from_value(value).unwrap(), DebugMessage::DebugStep);
    }
}
