//! Relay transport for remote debug sessions.
//!
//! Provides:
//! - Wire protocol (control/data envelopes, decrypted debug messages)
//! - Relay connection traits
//! - WebSocket relay client (feature: websocket)
//! - HTTP session allocator

pub mod allocator;
pub mod protocol;
pub mod relay;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use allocator::{AllocationError, HttpSessionAllocator, SessionAllocator};
pub use protocol::{DebugMessage, Envelope, ProtocolError, RUNNER_CONNECTED, RunRequest};
pub use relay::{RelayConnection, RelayConnector, RelayError};

#[cfg(feature = "websocket")]
pub use websocket::{WsRelayConnection, WsRelayConnector};
