//! Runner process supervision.
//!
//! Provides:
//! - `ProcessSupervisor` - Launch, capture and terminate the runner
//! - Runner command parsing and executable resolution

pub mod command;
pub mod resolve;
pub mod supervisor;

pub use command::{CommandBuildError, CommandParts};
pub use resolve::resolve_executable_path;
pub use supervisor::{ProcessSupervisor, clean_line, output_lines, stream_output};
