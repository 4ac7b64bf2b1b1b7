//! CLI commands implementation.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::config::Settings;
use crate::llm::ModelClient;
use crate::pipeline::Orchestrator;
use crate::repository::InMemoryContentRepository;
use crate::server;

/// Sweeper cadence for expired-task cleanup.
const SWEEP_PERIOD: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "noteflow")]
#[command(about = "Asynchronous AI note enrichment pipeline")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Run the task API server
    Serve {
        /// Bind address
        #[arg(short, long, default_value = "127.0.0.1:8080")]
        bind: String,
    },

    /// Probe the configured model endpoint
    CheckModel,
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::from_env();

    match cli.command {
        Commands::Serve { bind } => cmd_serve(settings, &bind).await,
        Commands::CheckModel => cmd_check_model(settings).await,
    }
}

async fn cmd_serve(settings: Settings, bind: &str) -> anyhow::Result<()> {
    let model = Arc::new(ModelClient::new(settings.model.clone()));
    // Default wiring uses the in-memory repository; a deployment substitutes
    // its own ContentRepository implementation here.
    let repository = Arc::new(InMemoryContentRepository::new());
    let orchestrator = Arc::new(Orchestrator::new(settings, model, repository));

    let sweeper = orchestrator.registry().clone().spawn_sweeper(SWEEP_PERIOD);
    let result = server::serve(orchestrator, bind).await;
    sweeper.abort();
    result
}

async fn cmd_check_model(settings: Settings) -> anyhow::Result<()> {
    let endpoint = settings.model.endpoint.clone();
    let client = ModelClient::new(settings.model);
    if client.is_available().await {
        println!("model endpoint {endpoint} is reachable");
        Ok(())
    } else {
        anyhow::bail!("model endpoint {endpoint} is not reachable")
    }
}
