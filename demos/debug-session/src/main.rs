//! Run a graph on a local runner under a remote debug session.
//!
//! Run with: cargo run -p debug-session -- --graph my-graph.act
//!
//! The runner is started paused, stepped once at the first pause and resumed
//! at every later one. Its output is printed as it arrives.

use std::{path::PathBuf, process::ExitCode, sync::Arc, time::Duration};

use anyhow::{Context, bail};
use clap::Parser;
use debug_relay_core::{
    OutputStore, SessionConfig,
    config::{DEFAULT_GATEWAY, DEFAULT_RUNNER},
};
use debug_relay_session::{SessionOrchestrator, SessionOutcome};
use debug_relay_supervisor::{CommandParts, ProcessSupervisor, resolve_executable_path};
use debug_relay_transport::{HttpSessionAllocator, WsRelayConnector};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Graph used when `--graph` is not given.
const HELLO_GRAPH: &str = include_str!("../graphs/hello.act");

/// Exit code for a session interrupted with Ctrl-C.
const EXIT_ABORTED: u8 = 130;

#[derive(Debug, Parser)]
#[command(name = "debug-session", version, about)]
struct Cli {
    /// Gateway URL; bare hosts default to https, localhost to http.
    #[arg(long, env = "ACT_SESSION_GATEWAY", default_value = DEFAULT_GATEWAY)]
    gateway: String,

    /// Runner command line.
    #[arg(long, default_value = DEFAULT_RUNNER)]
    runner: String,

    /// Graph file to execute.
    #[arg(long)]
    graph: Option<PathBuf>,

    /// Delay before answering each pause, in milliseconds.
    #[arg(long)]
    settle_delay_ms: Option<u64>,

    /// Node to break at (repeatable).
    #[arg(long = "breakpoint")]
    breakpoints: Vec<String>,

    /// Run without stopping at breakpoints.
    #[arg(long)]
    ignore_breakpoints: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    let graph = match &cli.graph {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read graph {}", path.display()))?,
        None => HELLO_GRAPH.to_string(),
    };

    // Fail before a session is allocated if the runner is missing.
    let parts = CommandParts::parse(&cli.runner)?;
    if resolve_executable_path(&parts.program).await.is_none() {
        bail!("Runner executable not found: {}", parts.program);
    }

    let mut config = SessionConfig::new(graph)
        .with_gateway(cli.gateway)
        .with_runner_command(cli.runner);
    if let Some(ms) = cli.settle_delay_ms {
        config = config.with_settle_delay(Duration::from_millis(ms));
    }
    config.breakpoints = cli.breakpoints;
    config.ignore_breakpoints = cli.ignore_breakpoints;

    let gateway = config.gateway();
    let allocator = HttpSessionAllocator::new(&gateway)?;
    let connector = WsRelayConnector::new(&gateway);

    let output = Arc::new(OutputStore::new());
    let printer = tokio::spawn(print_output(Arc::clone(&output)));

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupted, stopping session");
                cancel.cancel();
            }
        }
    });

    let mut orchestrator = SessionOrchestrator::new(
        config,
        allocator,
        connector,
        ProcessSupervisor::new(Arc::clone(&output)),
        Arc::clone(&output),
    )
    .with_cancellation(cancel);

    let result = orchestrator.run().await;
    if let Err(e) = printer.await {
        tracing::debug!("Output printer ended abnormally: {e}");
    }

    match result? {
        SessionOutcome::Succeeded => Ok(ExitCode::SUCCESS),
        SessionOutcome::JobFailed(error) => {
            eprintln!("Job failed: {error}");
            Ok(ExitCode::FAILURE)
        }
        SessionOutcome::Aborted => Ok(ExitCode::from(EXIT_ABORTED)),
    }
}

async fn print_output(output: Arc<OutputStore>) {
    let mut lines = output.history_plus_stream();
    while let Some(msg) = lines.next().await {
        println!("{msg}");
    }
}
