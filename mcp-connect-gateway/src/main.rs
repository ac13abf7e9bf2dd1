//! `mcp-connect`: HTTP gateway for stdio MCP servers.
//!
//! Startup order: parse flags, initialize logging, resolve configuration,
//! bind the listener, start the sweeps, serve until SIGINT/SIGTERM. A bad
//! configuration or a failed bind exits with status 1.

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use mcp_connect_gateway::cli::Cli;
use mcp_connect_gateway::{Gateway, StartupError};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // The guard flushes buffered log lines on drop; hold it until exit.
    let (non_blocking, _guard) = tracing_appender::non_blocking(std::io::stdout());
    tracing_subscriber::fmt()
        .json()
        .with_writer(non_blocking)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "mcp-connect failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), StartupError> {
    let lookup = |name: &str| std::env::var(name).ok();
    let config = cli.into_config(&lookup)?;

    let addr = format!("{}:{}", config.listen.host, config.listen.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| StartupError::Bind {
            addr: addr.clone(),
            source,
        })?;

    let gateway = Arc::new(Gateway::with_stdio(config));
    let router = gateway.router();
    gateway.spawn_background_tasks();

    let shutdown = gateway.shutdown_token();
    setup_signal_handlers(shutdown.clone());

    let local_url = format!("http://localhost:{}", gateway.config().listen.port);
    info!(
        addr = %addr,
        servers = ?gateway.config().streamable.servers.keys().collect::<Vec<_>>(),
        "mcp-connect listening"
    );
    info!(url = %format!("{local_url}/health"), "health check URL");
    info!(url = %format!("{local_url}/bridge"), "bridge URL");
    info!(url = %format!("{local_url}/mcp/{{server_id}}"), "streamable URL");

    // Sessions are closed before the drain so open event streams can finish.
    let draining = Arc::clone(&gateway);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            info!("shutting down");
            draining.shutdown().await;
        })
        .await
        .map_err(StartupError::Serve)
}

fn setup_signal_handlers(shutdown: CancellationToken) {
    let shutdown_sigint = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received SIGINT, initiating graceful shutdown");
                shutdown_sigint.cancel();
            }
            Err(e) => error!(error = %e, "failed to listen for SIGINT"),
        }
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("received SIGTERM, initiating graceful shutdown");
                shutdown.cancel();
            }
            Err(e) => error!(error = %e, "failed to listen for SIGTERM"),
        }
    });
}
