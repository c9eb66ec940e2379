//! Debug pause/step/resume state machine.
//!
//! The controller is pure: it consumes observed relay events and answers with
//! a [`Reaction`] for the message loop to carry out. It never sleeps or does
//! I/O itself.
//!
//! Pause policy: the first pause is answered with a single `debug_step`,
//! every later pause with `debug_resume`. This is a fixed policy, not a
//! general breakpoint navigator.

use debug_relay_transport::{DebugMessage, RUNNER_CONNECTED, RunRequest};

/// Controller state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerState {
    /// No relay connection yet.
    Idle,
    /// Connected, waiting for the runner to join.
    AwaitingRunner,
    /// `run` sent, graph executing.
    Running,
    /// Runner paused; carries the number of pauses seen so far.
    Paused(u64),
    /// Graph completed.
    Finished,
    /// Graph failed with the given error.
    Errored(String),
}

impl ControllerState {
    /// Whether the session is over.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Errored(_))
    }
}

/// Pause bookkeeping for the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugState {
    /// Pauses observed so far; never decreases.
    pub pause_count: u64,
}

/// What the message loop must do in response to an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reaction {
    /// Nothing.
    Ignore,
    /// Encrypt and send a command now.
    Send(DebugMessage),
    /// Wait the settling delay, then encrypt and send a command.
    SendAfterSettle(DebugMessage),
    /// Show a runner log line.
    Surface(String),
    /// Stop: the job succeeded.
    Finished,
    /// Stop: the job failed.
    Failed(String),
}

/// Decides the next command from observed debug events.
#[derive(Debug)]
pub struct DebugController {
    state: ControllerState,
    debug: DebugState,
    run: RunRequest,
}

impl DebugController {
    /// Create a controller that will start `run` once the runner joins.
    ///
    /// The run always starts paused.
    #[must_use]
    pub fn new(mut run: RunRequest) -> Self {
        run.start_paused = true;
        Self {
            state: ControllerState::Idle,
            debug: DebugState::default(),
            run,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> &ControllerState {
        &self.state
    }

    /// Pause bookkeeping.
    #[must_use]
    pub const fn debug_state(&self) -> DebugState {
        self.debug
    }

    /// The relay connection is open.
    pub fn connection_opened(&mut self) {
        if self.state == ControllerState::Idle {
            self.state = ControllerState::AwaitingRunner;
        }
    }

    /// Handle a plaintext control message from the relay.
    pub fn on_control(&mut self, message: &str) -> Reaction {
        if message != RUNNER_CONNECTED {
            tracing::debug!(message, "Ignoring control message");
            return Reaction::Ignore;
        }

        match self.state {
            ControllerState::AwaitingRunner => {
                tracing::info!("Runner connected, sending graph (paused)");
                self.state = ControllerState::Running;
                Reaction::Send(DebugMessage::Run(self.run.clone()))
            }
            _ => {
                tracing::warn!(state = ?self.state, "Ignoring runner_connected");
                Reaction::Ignore
            }
        }
    }

    /// Handle a decrypted message from the runner.
    pub fn on_message(&mut self, message: &DebugMessage) -> Reaction {
        if self.state.is_terminal() {
            return Reaction::Ignore;
        }

        match message {
            DebugMessage::Log { message } => Reaction::Surface(message.clone()),
            DebugMessage::LogError { message } => Reaction::Surface(format!("[error] {message}")),
            DebugMessage::Warning { message } => Reaction::Surface(format!("[warning] {message}")),
            DebugMessage::DebugState { full_path } => self.on_pause(full_path.as_deref()),
            DebugMessage::JobFinished => {
                self.state = ControllerState::Finished;
                Reaction::Finished
            }
            DebugMessage::JobError { error } => {
                self.state = ControllerState::Errored(error.clone());
                Reaction::Failed(error.clone())
            }
            DebugMessage::Run(_) | DebugMessage::DebugStep | DebugMessage::DebugResume => {
                tracing::debug!(kind = message.kind(), "Ignoring command addressed to runner");
                Reaction::Ignore
            }
        }
    }

    fn on_pause(&mut self, full_path: Option<&str>) -> Reaction {
        let node = full_path.unwrap_or("unknown");
        match self.state {
            ControllerState::Running | ControllerState::Paused(_) => {}
            _ => {
                tracing::warn!(node, "Pause reported before run was sent, ignoring");
                return Reaction::Ignore;
            }
        }

        self.debug.pause_count += 1;
        let count = self.debug.pause_count;
        self.state = ControllerState::Paused(count);

        let command = if count == 1 {
            DebugMessage::DebugStep
        } else {
            DebugMessage::DebugResume
        };
        tracing::info!(pause_count = count, node, next = command.kind(), "Debug paused");
        Reaction::SendAfterSettle(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_request() -> RunRequest {
        RunRequest {
            payload: "{}".into(),
            start_paused: false,
            ignore_breakpoints: false,
            breakpoints: vec![],
            required_version: "v0.0.0".into(),
        }
    }

    fn pause(node: &str) -> DebugMessage {
        DebugMessage::DebugState {
            full_path: Some(node.into()),
        }
    }

    fn running() -> DebugController {
        let mut controller = DebugController::new(run_request());
        controller.connection_opened();
        controller.on_control(RUNNER_CONNECTED);
        controller
    }

    #[test]
    fn test_runner_connected_sends_paused_run() {
        let mut controller = DebugController::new(run_request());
        assert_eq!(controller.state(), &ControllerState::Idle);

        controller.connection_opened();
        assert_eq!(controller.state(), &ControllerState::AwaitingRunner);

        let Reaction::Send(DebugMessage::Run(run)) = controller.on_control(RUNNER_CONNECTED) else {
            panic!("Expected run command");
        };
        assert!(run.start_paused);
        assert_eq!(run.payload, "{}");
        assert_eq!(controller.state(), &ControllerState::Running);

        assert_eq!(controller.on_control(RUNNER_CONNECTED), Reaction::Ignore);
    }

    #[test]
    fn test_step_once_then_resume() {
        let mut controller = running();

        let commands: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|node| controller.on_message(&pause(node)))
            .collect();

        assert_eq!(
            commands,
            vec![
                Reaction::SendAfterSettle(DebugMessage::DebugStep),
                Reaction::SendAfterSettle(DebugMessage::DebugResume),
                Reaction::SendAfterSettle(DebugMessage::DebugResume),
            ]
        );
        assert_eq!(controller.state(), &ControllerState::Paused(3));
        assert_eq!(controller.debug_state().pause_count, 3);
    }

    #[test]
    fn test_job_finished_from_any_state() {
        for steps in 0..4 {
            let mut controller = DebugController::new(run_request());
            if steps > 0 {
                controller.connection_opened();
            }
            if steps > 1 {
                controller.on_control(RUNNER_CONNECTED);
            }
            if steps > 2 {
                controller.on_message(&pause("a"));
            }

            assert_eq!(controller.on_message(&DebugMessage::JobFinished), Reaction::Finished);
            assert_eq!(controller.state(), &ControllerState::Finished);
            assert_eq!(controller.on_message(&pause("b")), Reaction::Ignore);
            assert_eq!(controller.on_control(RUNNER_CONNECTED), Reaction::Ignore);
        }
    }

    #[test]
    fn test_job_error_is_terminal() {
        let mut controller = running();
        let reaction = controller.on_message(&DebugMessage::JobError {
            error: "boom".into(),
        });

        assert_eq!(reaction, Reaction::Failed("boom".into()));
        assert_eq!(controller.state(), &ControllerState::Errored("boom".into()));
        assert!(controller.state().is_terminal());
        assert_eq!(controller.on_message(&DebugMessage::JobFinished), Reaction::Ignore);
    }

    #[test]
    fn test_logs_do_not_transition() {
        let mut controller = running();
        controller.on_message(&pause("a"));

        assert_eq!(
            controller.on_message(&DebugMessage::Log {
                message: "hello".into()
            }),
            Reaction::Surface("hello".into())
        );
        assert_eq!(
            controller.on_message(&DebugMessage::Warning {
                message: "careful".into()
            }),
            Reaction::Surface("[warning] careful".into())
        );
        assert_eq!(controller.state(), &ControllerState::Paused(1));
    }

    #[test]
    fn test_no_command_before_run() {
        let mut controller = DebugController::new(run_request());
        controller.connection_opened();

        assert_eq!(controller.on_message(&pause("a")), Reaction::Ignore);
        assert_eq!(controller.debug_state().pause_count, 0);
        assert_eq!(controller.on_control("browser_connected"), Reaction::Ignore);
        assert_eq!(controller.state(), &ControllerState::AwaitingRunner);
    }

    #[test]
    fn test_runner_commands_are_ignored() {
        let mut controller = running();
        assert_eq!(controller.on_message(&DebugMessage::DebugStep), Reaction::Ignore);
        assert_eq!(controller.state(), &ControllerState::Running);
    }
}
