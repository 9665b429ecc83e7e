mod analyze_cmd;
mod status_cmd;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use picscribe_config::{load_and_prepare, AppConfig, PreparedConfig};
use picscribe_executor::BatchCoordinator;
use picscribe_gateway::{start_server, GatewayState};
use picscribe_logging::init_logger;
use picscribe_understanding::OllamaClient;

#[derive(Parser)]
#[command(name = "picscribe")]
#[command(about = "Picscribe: image descriptions from a local vision model")]
#[command(version)]
struct Cli {
    /// Path to the YAML config file
    #[arg(long, global = true, env = "PICSCRIBE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to bind the HTTP server to
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Query a running server's status
    Status,
    /// Analyze local images without starting the server
    Analyze {
        /// Image files to analyze, in order
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Instruction sent with every image
        #[arg(short, long)]
        prompt: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let PreparedConfig {
        mut config,
        warnings,
    } = load_and_prepare(cli.config.as_deref()).await?;

    let _log_guard = init_logger(&config.logging);
    for warning in &warnings {
        warn!(path = %warning.path, "{}", warning.message);
    }

    match cli.command {
        Commands::Serve { port } => {
            if let Some(port) = port {
                if port == 0 {
                    bail!("--port must be non-zero");
                }
                config.server.port = port;
            }
            run_server(config).await
        }
        Commands::Status => status_cmd::run(&config.server).await,
        Commands::Analyze { files, prompt } => {
            let coordinator = build_coordinator(config).await?;
            analyze_cmd::run(&coordinator, &files, prompt).await
        }
    }
}

async fn build_coordinator(config: AppConfig) -> Result<Arc<BatchCoordinator>> {
    let backend = Arc::new(OllamaClient::new(&config.backend)?);
    let coordinator = BatchCoordinator::new(Arc::new(config), backend);
    coordinator.files().ensure_dir().await?;
    Ok(Arc::new(coordinator))
}

async fn run_server(config: AppConfig) -> Result<()> {
    let coordinator = build_coordinator(config).await?;
    let config = coordinator.config();
    let addr = config.server.addr();

    info!(
        addr = %addr,
        backend = coordinator.backend().name(),
        backend_url = %config.backend.base_url,
        model = %config.backend.model,
        environment = ?config.environment,
        "Starting Picscribe server"
    );

    // Leftovers from a previous run that did not shut down cleanly.
    coordinator.files().sweep_stale().await;

    if !coordinator.backend().check_liveness().await {
        warn!(
            backend = %config.backend.base_url,
            "Inference backend not reachable; analysis requests will fail until it is up"
        );
    }

    let result = start_server(&addr, GatewayState::new(Arc::clone(&coordinator))).await;

    coordinator.files().sweep_stale().await;
    info!("Server stopped");
    result
}
