//! Runner process supervision.
//!
//! The runner is spawned in its own process group with stdout and stderr
//! piped. Each pipe gets a forwarding task that pushes cleaned lines into the
//! shared [`OutputStore`]; both tasks live exactly as long as the process.

use std::{io, process::ExitStatus, process::Stdio, sync::Arc, time::Duration};

use async_trait::async_trait;
use command_group::{AsyncCommandGroup, AsyncGroupChild};
use debug_relay_core::{LaunchSpec, LogMsg, OutputStore, Supervisor, SupervisorError};
use futures::{Stream, StreamExt};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::Command,
    task::JoinHandle,
};

/// How long `shutdown` lets the output tasks drain after the runner exits.
pub const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

struct RunnerProcess {
    child: AsyncGroupChild,
    stdout_task: JoinHandle<()>,
    stderr_task: JoinHandle<()>,
    reaped: bool,
}

impl RunnerProcess {
    /// Best-effort SIGKILL to the whole process group.
    ///
    /// Fails harmlessly (ESRCH) once every member of the group is gone.
    fn kill_group(&mut self) {
        if let Err(e) = self.child.start_kill() {
            tracing::debug!("Process group kill skipped: {e}");
        }
    }

    async fn drain(&mut self) {
        for task in [&mut self.stdout_task, &mut self.stderr_task] {
            if tokio::time::timeout(DRAIN_TIMEOUT, &mut *task).await.is_err() {
                tracing::debug!("Output task still running after runner exit, cancelling");
                task.abort();
            }
        }
    }
}

impl Drop for RunnerProcess {
    fn drop(&mut self) {
        if !self.reaped {
            self.kill_group();
        }
        self.stdout_task.abort();
        self.stderr_task.abort();
    }
}

/// Supervises a single runner process.
pub struct ProcessSupervisor {
    output: Arc<OutputStore>,
    runner: Option<RunnerProcess>,
}

impl ProcessSupervisor {
    /// Create a supervisor that captures output into `output`.
    #[must_use]
    pub const fn new(output: Arc<OutputStore>) -> Self {
        Self {
            output,
            runner: None,
        }
    }

    /// The sink receiving captured output.
    #[must_use]
    pub const fn output(&self) -> &Arc<OutputStore> {
        &self.output
    }

    /// OS process id of the runner, while one is supervised.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.runner.as_ref().and_then(|r| r.child.id())
    }

    /// Launch the runner described by `spec`.
    ///
    /// # Errors
    /// Returns error if a runner is already supervised or spawning fails.
    pub fn start(&mut self, spec: &LaunchSpec) -> Result<(), SupervisorError> {
        if self.runner.is_some() {
            return Err(SupervisorError::AlreadyRunning);
        }

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.group_spawn().map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => {
                SupervisorError::ExecutableNotFound(spec.program.display().to_string())
            }
            _ => SupervisorError::SpawnFailed(e.to_string()),
        })?;

        let stdout = child
            .inner()
            .stdout
            .take()
            .ok_or_else(|| SupervisorError::SpawnFailed("stdout not captured".into()))?;
        let stderr = child
            .inner()
            .stderr
            .take()
            .ok_or_else(|| SupervisorError::SpawnFailed("stderr not captured".into()))?;

        tracing::info!(
            program = %spec.program.display(),
            pid = ?child.id(),
            "Runner started"
        );

        self.runner = Some(RunnerProcess {
            child,
            stdout_task: stream_output(stdout, Arc::clone(&self.output), LogMsg::Stdout),
            stderr_task: stream_output(stderr, Arc::clone(&self.output), LogMsg::Stderr),
            reaped: false,
        });
        Ok(())
    }

    /// Terminate the runner and wait for it to exit.
    ///
    /// The kill goes to the whole process group, so processes the runner left
    /// behind are stopped even when the runner itself already exited.
    /// Postcondition: no runner is running. A runner that already exited, or
    /// exits while the kill is in flight, counts as success.
    ///
    /// # Errors
    /// Returns error only if the runner could not be killed or reaped.
    pub async fn shutdown(&mut self) -> Result<Option<ExitStatus>, SupervisorError> {
        let Some(mut runner) = self.runner.take() else {
            return Ok(None);
        };

        let status = if let Some(status) = runner.child.try_wait()? {
            tracing::debug!(%status, "Runner had already exited");
            runner.kill_group();
            status
        } else {
            if let Err(err) = runner.child.start_kill() {
                match runner.child.try_wait()? {
                    Some(status) => {
                        tracing::debug!(%status, "Runner exited before it could be killed");
                    }
                    None => return Err(err.into()),
                }
            }
            runner.child.wait().await?
        };
        runner.reaped = true;

        runner.drain().await;
        tracing::info!(%status, "Runner stopped");
        Ok(Some(status))
    }

    /// Kill the runner group without waiting for it to exit.
    pub fn abort(&mut self) {
        if let Some(runner) = self.runner.take() {
            tracing::warn!(pid = ?runner.child.id(), "Killing runner without waiting");
            drop(runner);
        }
    }
}

#[async_trait]
impl Supervisor for ProcessSupervisor {
    async fn start(&mut self, spec: &LaunchSpec) -> Result<(), SupervisorError> {
        Self::start(self, spec)
    }

    async fn shutdown(&mut self) -> Result<Option<ExitStatus>, SupervisorError> {
        Self::shutdown(self).await
    }

    fn abort(&mut self) {
        Self::abort(self);
    }
}

/// Spawn a task forwarding cleaned lines from `reader` into `sink`.
///
/// The task ends at end of input; `wrap` tags each line with its source.
pub fn stream_output<R>(
    reader: R,
    sink: Arc<OutputStore>,
    wrap: fn(String) -> LogMsg,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let lines = output_lines(reader).filter_map(move |line| {
        futures::future::ready(match line {
            Ok(raw) => clean_line(&raw).map(|l| Ok(wrap(l))),
            Err(e) => Some(Err(e)),
        })
    });
    sink.spawn_forwarder(lines)
}

/// Lazily read lines from `reader`, decoding invalid UTF-8 lossily.
///
/// The stream ends at end of input or after the first read error.
pub fn output_lines<R>(reader: R) -> impl Stream<Item = io::Result<String>> + Send
where
    R: AsyncRead + Unpin + Send + 'static,
{
    futures::stream::unfold(Some(BufReader::new(reader)), |state| async move {
        let mut reader = state?;
        let mut buf = Vec::new();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => None,
            Ok(_) => Some((Ok(String::from_utf8_lossy(&buf).into_owned()), Some(reader))),
            Err(e) => Some((Err(e), None)),
        }
    })
}

/// Trim a raw line; blank lines are dropped.
#[must_use]
pub fn clean_line(raw: &str) -> Option<String> {
    let line = raw.trim();
    (!line.is_empty()).then(|| line.to_string())
}
