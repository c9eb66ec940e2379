//! Debug session control.
//!
//! Provides:
//! - `DebugController` - Pause/step/resume state machine
//! - `SessionOrchestrator` - Allocate, launch, relay, control, tear down

pub mod controller;
pub mod orchestrator;

pub use controller::{ControllerState, DebugController, DebugState, Reaction};
pub use orchestrator::{
    ENV_GATEWAY, ENV_NO_COLOR, ENV_TOKEN, SessionError, SessionOrchestrator, SessionOutcome,
};
