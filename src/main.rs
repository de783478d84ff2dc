//! Coachflow - conversational workflow orchestrator
//!
//! Main entry point: initializes tracing, loads configuration, wires
//! the orchestrator, and dispatches to the server or the chat REPL.

use anyhow::Result;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use coachflow::cli::{Cli, Commands};
use coachflow::config::Config;
use coachflow::orchestrator::ChatOrchestrator;
use coachflow::providers::create_provider;
use coachflow::{repl, server};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();
    init_tracing(cli.verbose);

    let config = Config::load(&cli.config)?;
    config.validate()?;

    let provider = create_provider(&config.provider)?;
    let orchestrator = Arc::new(ChatOrchestrator::new(&config, provider)?);

    match cli.command {
        Commands::Serve { bind } => {
            let bind_address = bind.unwrap_or_else(|| config.server.bind_address.clone());
            tracing::info!("Starting server");
            server::serve(orchestrator, &bind_address).await?;
        }
        Commands::Chat => {
            tracing::info!("Starting interactive chat");
            repl::run_chat(orchestrator).await?;
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "coachflow=debug"
    } else {
        "coachflow=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
