//! Coachflow - conversational workflow orchestrator library
//!
//! Core functionality for a single-process conversational system that
//! manages chat sessions with domain-keyed concurrent workflows,
//! pending-approval gating, and context aggregation for LLM queries.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `session`: domain models, conversation history, and the expiring
//!   session registry
//! - `context`: per-domain context aggregation into bounded prompt text
//! - `query`: query answering over aggregated context
//! - `triage`: intent classification and routing decisions
//! - `orchestrator`: the confirmation gate tying it all together
//! - `workflow`: the background plan/research/summarize runner
//! - `providers`: LLM provider abstraction and the HTTP implementation
//! - `server` / `repl`: HTTP+WebSocket and terminal surfaces
//! - `config`: configuration management and validation
//! - `error`: error types and result aliases
//!
//! # Example
//!
//! ```no_run
//! use coachflow::config::Config;
//! use coachflow::orchestrator::ChatOrchestrator;
//! use coachflow::providers::create_provider;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     config.validate()?;
//!
//!     let provider = create_provider(&config.provider)?;
//!     let orchestrator = ChatOrchestrator::new(&config, provider)?;
//!     let response = orchestrator.handle_message("demo", "hello").await;
//!     println!("{}", response.message);
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod providers;
pub mod query;
pub mod repl;
pub mod server;
pub mod session;
pub mod triage;
pub mod workflow;

// Re-export commonly used types
pub use config::Config;
pub use error::{CoachflowError, Result};
pub use orchestrator::{ChatOrchestrator, ChatResponse};
pub use session::{ChatSession, PendingApproval, RunningWorkflow, SessionManager};
