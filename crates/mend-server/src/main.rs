//! Mend server binary
//!
//! Loads configuration, connects the isolation backend and serves the
//! planner API until Ctrl+C or SIGTERM.

use anyhow::Context;
use clap::Parser;
use mend_capability::{InMemoryRetriever, OpenAiGenerator};
use mend_core::{MendConfig, Orchestrator};
use mend_sandbox::{DockerBackend, IsolationBackend, SandboxExecutor};
use mend_server::{routes, LogFormat};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Mend server CLI
#[derive(Parser)]
#[command(name = "mend-server")]
#[command(about = "Staged candidate-fix planner with sandboxed validation", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "MEND_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overrides `server.bind`
    #[arg(short, long, env = "MEND_BIND")]
    bind: Option<SocketAddr>,

    /// Log level when RUST_LOG is unset
    #[arg(long, env = "MEND_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, env = "MEND_LOG_FORMAT", default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_format);

    let mut config = match &cli.config {
        Some(path) => MendConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => MendConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config = config.with_bind(bind);
    }

    let generator = Arc::new(
        OpenAiGenerator::from_env(config.generation.clone())
            .context("building text generation client")?,
    );
    let retriever = Arc::new(match &config.retrieval.corpus_path {
        Some(path) => InMemoryRetriever::from_path(path)
            .await
            .with_context(|| format!("loading corpus from {}", path.display()))?,
        None => {
            warn!("no corpus configured, explain will return no documents");
            InMemoryRetriever::new(Vec::new())
        }
    });

    let backend: Arc<dyn IsolationBackend> = Arc::new(
        DockerBackend::connect(&config.sandbox)
            .await
            .context("connecting to the container runtime")?,
    );
    let executor = SandboxExecutor::new(Arc::clone(&backend), config.sandbox.clone())
        .context("invalid sandbox configuration")?;
    let orchestrator = Orchestrator::from_config(generator, retriever, executor, &config);

    let shutdown = {
        let orchestrator = orchestrator.clone();
        async move {
            shutdown_signal().await;
            orchestrator.set_ready(false);
        }
    };
    let (addr, server) = warp::serve(routes(orchestrator, &config.server))
        .try_bind_with_graceful_shutdown(config.server.bind, shutdown)
        .with_context(|| format!("binding {}", config.server.bind))?;

    info!(
        version = mend_server::VERSION,
        addr = %addr,
        backend = backend.name(),
        image = %config.sandbox.image,
        "mend server listening"
    );
    server.await;

    info!("draining sandbox environments");
    if let Err(e) = backend.shutdown().await {
        warn!(error = %e, "sandbox shutdown incomplete");
    }
    info!("mend server stopped");
    Ok(())
}

fn init_tracing(level: &str, format: LogFormat) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received terminate signal, shutting down"),
    }
}
