//! Router server binary.
//!
//! Loads the graph document and provider configuration, wires up the
//! connection pool, session registry, dispatcher and transition API, then
//! serves the agent-facing JSON-RPC surface over its own stdin/stdout.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use router::{AgentSurface, ConnectionPool, Dispatcher, ProvidersConfig, RouterProcessConfig};
use router::{SessionRegistry, SessionRegistryConfig, TransitionApi};

#[derive(Parser)]
#[command(name = "router-server")]
#[command(about = "Policy-gated tool-call router, serving an agent-facing JSON-RPC surface over stdio")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Graph document path. Overrides ROUTER_GRAPH_PATH.
    #[arg(long)]
    graph_path: Option<PathBuf>,

    /// Provider configuration path. Overrides ROUTER_PROVIDERS_PATH.
    #[arg(long)]
    providers_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let mut process_config = RouterProcessConfig::load()?;
    if let Some(graph_path) = cli.graph_path {
        process_config.graph_path = graph_path;
    }
    if let Some(providers_path) = &cli.providers_path {
        std::env::set_var("ROUTER_PROVIDERS_PATH", providers_path);
    }

    tracing_subscriber::fmt()
        .with_env_filter(process_config.log_filter.clone())
        .init();

    tracing::info!(graph_path = %process_config.graph_path.display(), "loading graph document");
    let graph = router_core::load_from_path(&process_config.graph_path)
        .map_err(|e| format!("failed to load graph '{}': {e}", process_config.graph_path.display()))?;

    tracing::info!("loading provider configuration");
    let providers = ProvidersConfig::load()?;
    tracing::info!(providers = ?providers.providers.keys().collect::<Vec<_>>(), "providers configured");

    let pool = Arc::new(ConnectionPool::new(providers));
    let sessions = Arc::new(SessionRegistry::new(
        Arc::new(graph),
        SessionRegistryConfig {
            state_dir: process_config.state_dir.clone(),
            default_session: process_config.default_session.clone(),
        },
    ));
    let dispatcher = Arc::new(Dispatcher::new(pool.clone(), sessions.clone()));
    let api = Arc::new(TransitionApi::new(sessions));
    let surface = AgentSurface::new(dispatcher, api);

    tracing::info!("router ready, serving agent-facing JSON-RPC on stdio");
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    let result = tokio::select! {
        result = surface.run(stdin, stdout) => result,
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
            Ok(())
        }
    };

    tracing::info!("shutting down provider connections");
    pool.close_all().await;

    result?;
    tracing::info!("router shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL-C signal handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received CTRL-C"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }
}
