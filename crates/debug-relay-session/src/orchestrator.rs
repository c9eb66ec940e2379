//! End-to-end debug session orchestration.

use std::{collections::HashMap, sync::Arc};

use debug_relay_core::{
    CipherError, OutputStore, SessionCipher, SessionConfig, Supervisor, SupervisorError,
    TokenError, token,
};
use debug_relay_supervisor::{CommandBuildError, CommandParts};
use debug_relay_transport::{
    AllocationError, DebugMessage, Envelope, RelayConnection, RelayConnector, RelayError,
    RunRequest, SessionAllocator,
};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::controller::{DebugController, Reaction};

/// Gateway host handed to the runner.
pub const ENV_GATEWAY: &str = "ACT_SESSION_GATEWAY";
/// Session token handed to the runner.
pub const ENV_TOKEN: &str = "ACT_SESSION_TOKEN";
/// Disables colored runner output.
pub const ENV_NO_COLOR: &str = "ACT_NOCOLOR";

/// Session error.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session allocation failed: {0}")]
    Allocation(#[from] AllocationError),
    #[error("Token error: {0}")]
    Token(#[from] TokenError),
    #[error("Runner command error: {0}")]
    Command(#[from] CommandBuildError),
    #[error("Runner error: {0}")]
    Supervisor(#[from] SupervisorError),
    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),
    #[error("Relay closed before the job finished")]
    RelayClosed,
    #[error("Encryption error: {0}")]
    Cipher(#[from] CipherError),
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The runner reported `job_finished`.
    Succeeded,
    /// The runner reported `job_error`.
    JobFailed(String),
    /// Cancelled before the job ended.
    Aborted,
}

impl SessionOutcome {
    /// Whether the job succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// Failure reason reported by the runner, if any.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::JobFailed(error) => Some(error),
            _ => None,
        }
    }
}

/// Runs one debug session: allocate, launch, relay, control, tear down.
pub struct SessionOrchestrator<A, R, S>
where
    A: SessionAllocator,
    R: RelayConnector,
    S: Supervisor,
{
    config: SessionConfig,
    allocator: A,
    connector: R,
    supervisor: S,
    output: Arc<OutputStore>,
    cancel: CancellationToken,
}

impl<A, R, S> SessionOrchestrator<A, R, S>
where
    A: SessionAllocator,
    R: RelayConnector,
    S: Supervisor,
{
    /// Create an orchestrator. Runner log lines go to `output`.
    #[must_use]
    pub fn new(
        config: SessionConfig,
        allocator: A,
        connector: R,
        supervisor: S,
        output: Arc<OutputStore>,
    ) -> Self {
        Self {
            config,
            allocator,
            connector,
            supervisor,
            output,
            cancel: CancellationToken::new(),
        }
    }

    /// Abort the session when `cancel` fires.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// The supervisor driving the runner.
    #[must_use]
    pub const fn supervisor(&self) -> &S {
        &self.supervisor
    }

    /// Run the session to completion.
    ///
    /// The runner is shut down on every exit path, including errors and
    /// cancellation. If this future is dropped before it completes, the
    /// runner is killed without waiting.
    ///
    /// # Errors
    /// Returns error if allocation, launch, or the relay fails before the
    /// runner reports a terminal event.
    pub async fn run(&mut self) -> Result<SessionOutcome, SessionError> {
        let Self {
            config,
            allocator,
            connector,
            supervisor,
            output,
            cancel,
        } = self;

        let mut teardown = Teardown::new(supervisor);
        let result = run_session(config, allocator, connector, teardown.supervisor(), output, cancel).await;
        teardown.shutdown().await;

        match &result {
            Ok(SessionOutcome::Succeeded) => tracing::info!("Job finished successfully"),
            Ok(SessionOutcome::JobFailed(error)) => tracing::warn!(%error, "Job failed"),
            Ok(SessionOutcome::Aborted) => tracing::info!("Session aborted"),
            Err(e) => tracing::error!("Session failed: {e}"),
        }
        output.push_finished();
        result
    }
}

/// Guarantees the runner is stopped when a session ends.
///
/// `shutdown` stops it gracefully; if the session future is dropped first,
/// `Drop` kills it.
struct Teardown<'a, S: Supervisor> {
    supervisor: &'a mut S,
    done: bool,
}

impl<'a, S: Supervisor> Teardown<'a, S> {
    const fn new(supervisor: &'a mut S) -> Self {
        Self {
            supervisor,
            done: false,
        }
    }

    fn supervisor(&mut self) -> &mut S {
        self.supervisor
    }

    async fn shutdown(&mut self) {
        match self.supervisor.shutdown().await {
            Ok(Some(status)) => tracing::debug!(%status, "Runner exited"),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("Failed to stop runner: {e}");
                self.supervisor.abort();
            }
        }
        self.done = true;
    }
}

impl<S: Supervisor> Drop for Teardown<'_, S> {
    fn drop(&mut self) {
        if !self.done {
            tracing::warn!("Session dropped before teardown, killing runner");
            self.supervisor.abort();
        }
    }
}

async fn run_session<A, R, S>(
    config: &SessionConfig,
    allocator: &A,
    connector: &R,
    supervisor: &mut S,
    output: &OutputStore,
    cancel: &CancellationToken,
) -> Result<SessionOutcome, SessionError>
where
    A: SessionAllocator,
    R: RelayConnector,
    S: Supervisor,
{
    let session_id = tokio::select! {
        () = cancel.cancelled() => return Ok(SessionOutcome::Aborted),
        allocated = allocator.allocate() => allocated?,
    };

    let generated = token::generate(&session_id)?;
    let spec = CommandParts::parse(&config.runner_command)?
        .with_env(runner_env(config, &generated.token));

    tracing::info!(program = %spec.program.display(), %session_id, "Launching runner");
    tokio::select! {
        () = cancel.cancelled() => return Ok(SessionOutcome::Aborted),
        started = supervisor.start(&spec) => started?,
    }

    let mut conn = tokio::select! {
        () = cancel.cancelled() => return Ok(SessionOutcome::Aborted),
        connected = connector.connect(&session_id) => connected?,
    };
    let cipher = SessionCipher::new(&generated.key);
    let result = drive(
        &mut conn,
        &cipher,
        DebugController::new(run_request(config)),
        config,
        output,
        cancel,
    )
    .await;
    conn.close().await;
    result
}

fn runner_env(config: &SessionConfig, token: &str) -> HashMap<String, String> {
    let mut env = config.runner_env.clone();
    env.insert(ENV_GATEWAY.into(), config.gateway().host().to_string());
    env.insert(ENV_TOKEN.into(), token.to_string());
    env.insert(ENV_NO_COLOR.into(), "true".into());
    env
}

fn run_request(config: &SessionConfig) -> RunRequest {
    RunRequest {
        payload: config.graph_payload.clone(),
        start_paused: true,
        ignore_breakpoints: config.ignore_breakpoints,
        breakpoints: config.breakpoints.clone(),
        required_version: config.required_version.clone(),
    }
}

/// Message loop: feed relay events to the controller and carry out its
/// reactions until a terminal event, cancellation, or relay failure.
async fn drive<C: RelayConnection>(
    conn: &mut C,
    cipher: &SessionCipher,
    mut controller: DebugController,
    config: &SessionConfig,
    output: &OutputStore,
    cancel: &CancellationToken,
) -> Result<SessionOutcome, SessionError> {
    controller.connection_opened();

    loop {
        let received = tokio::select! {
            () = cancel.cancelled() => return Ok(SessionOutcome::Aborted),
            received = conn.recv() => received?,
        };
        let Some(envelope) = received else {
            return Err(SessionError::RelayClosed);
        };

        let reaction = match envelope {
            Envelope::Control { message } => controller.on_control(&message),
            Envelope::Data { payload } => match open(cipher, &payload) {
                Some(message) => controller.on_message(&message),
                None => continue,
            },
        };

        match reaction {
            Reaction::Ignore => {}
            Reaction::Surface(line) => output.push_relay(line),
            Reaction::Send(command) => send(conn, cipher, &command).await?,
            Reaction::SendAfterSettle(command) => {
                tokio::select! {
                    () = cancel.cancelled() => return Ok(SessionOutcome::Aborted),
                    () = tokio::time::sleep(config.settle_delay) => {}
                }
                send(conn, cipher, &command).await?;
            }
            Reaction::Finished => return Ok(SessionOutcome::Succeeded),
            Reaction::Failed(error) => return Ok(SessionOutcome::JobFailed(error)),
        }
    }
}

/// Decrypt and validate a data payload. Anything unreadable is dropped.
fn open(cipher: &SessionCipher, payload: &str) -> Option<DebugMessage> {
    let value: Value = match cipher.decrypt(payload) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!("Dropping undecryptable message: {e}");
            return None;
        }
    };
    match DebugMessage::from_value(value) {
        Ok(message) => Some(message),
        Err(e) => {
            tracing::warn!("Dropping message: {e}");
            None
        }
    }
}

async fn send<C: RelayConnection>(
    conn: &mut C,
    cipher: &SessionCipher,
    command: &DebugMessage,
) -> Result<(), SessionError> {
    tracing::debug!(kind = command.kind(), "Sending command");
    conn.send(&Envelope::seal(cipher, command)?).await?;
    Ok(())
}
