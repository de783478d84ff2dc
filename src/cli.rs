//! Command-line interface definition for Coachflow
//!
//! Defines the CLI structure using clap's derive API, with commands
//! for running the server and the interactive chat.

use clap::{Parser, Subcommand};

/// Coachflow - conversational workflow orchestrator
///
/// Manages chat sessions with domain-keyed workflows, approval gating,
/// and context-aware query answering over an LLM provider.
#[derive(Parser, Debug, Clone)]
#[command(name = "coachflow")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    pub config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for Coachflow
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the HTTP/WebSocket server
    Serve {
        /// Override the bind address from config (host:port)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Start an interactive chat session in the terminal
    Chat,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
