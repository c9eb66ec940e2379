//! Core building blocks for remote debug sessions.
//!
//! This crate provides:
//! - `token` - Session token generation and decoding
//! - `SessionCipher` - AES-256-GCM payload encryption
//! - `SessionConfig` - Explicit session configuration
//! - `OutputStore` - Broadcast + history sink for captured output
//! - `Supervisor` trait for runner process ownership

pub mod cipher;
pub mod config;
pub mod log_msg;
pub mod msg_store;
pub mod token;
pub mod traits;

pub use cipher::{CipherError, SessionCipher};
pub use config::{DEFAULT_SETTLE_DELAY, Gateway, SessionConfig};
pub use log_msg::LogMsg;
pub use msg_store::OutputStore;
pub use token::{DecodedToken, GeneratedToken, SharedKey, TokenError};
pub use traits::{LaunchSpec, SessionId, Supervisor, SupervisorError};
