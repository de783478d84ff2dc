//! Interactive chat REPL
//!
//! A readline-based loop that submits each line to the orchestrator
//! and prints the reply. Workflow progress envelopes for the session
//! are printed asynchronously as they arrive on the event bus.

use crate::error::Result;
use crate::orchestrator::ChatOrchestrator;
use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::sync::Arc;
use uuid::Uuid;

/// Runs the interactive chat loop until exit or EOF
pub async fn run_chat(orchestrator: Arc<ChatOrchestrator>) -> Result<()> {
    let session_id = Uuid::new_v4().to_string();
    let mut rl = DefaultEditor::new()?;

    print_welcome_banner(&session_id);
    let event_printer = spawn_event_printer(&orchestrator, session_id.clone());

    loop {
        let prompt = format!("{} ", "you>".cyan().bold());
        match rl.readline(&prompt) {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match trimmed {
                    "/exit" | "/quit" | "exit" | "quit" => break,
                    "/help" => {
                        print_help();
                        continue;
                    }
                    "/status" => {
                        print_status(&orchestrator, &session_id).await;
                        continue;
                    }
                    _ => {}
                }
                let _ = rl.add_history_entry(trimmed);

                let response = orchestrator.handle_message(&session_id, trimmed).await;
                let status_tag = colored_status(&response.status);
                println!("\n{} {}\n", status_tag, response.message);
            }
            Err(ReadlineError::Interrupted) => {
                println!("CTRL-C");
                break;
            }
            Err(ReadlineError::Eof) => {
                println!("CTRL-D");
                break;
            }
            Err(err) => {
                tracing::error!("Readline error: {:?}", err);
                break;
            }
        }
    }

    event_printer.abort();
    orchestrator.manager().shutdown().await;
    println!("Goodbye!");
    Ok(())
}

/// Prints event envelopes for this session as they arrive
fn spawn_event_printer(
    orchestrator: &ChatOrchestrator,
    session_id: String,
) -> tokio::task::JoinHandle<()> {
    let mut events = orchestrator.events().subscribe();
    tokio::spawn(async move {
        while let Ok(envelope) = events.recv().await {
            if envelope.session_id != session_id {
                continue;
            }
            let tag = match envelope.event_type.as_str() {
                "error" => format!("[{}]", envelope.event_type).red().to_string(),
                "final_plan" => format!("[{}]", envelope.event_type).green().to_string(),
                other => format!("[{}]", other).yellow().to_string(),
            };
            println!("\n{} {}", tag, envelope.content);
        }
    })
}

async fn print_status(orchestrator: &ChatOrchestrator, session_id: &str) {
    match orchestrator.manager().get(session_id).await {
        Some(session) => {
            let snapshot = session.lock().await.snapshot();
            match serde_json::to_string_pretty(&snapshot) {
                Ok(text) => println!("{}", text),
                Err(_) => println!("{}", snapshot),
            }
        }
        None => println!("No session state yet. Say something first."),
    }
}

fn colored_status(status: &str) -> String {
    let tag = format!("[{}]", status);
    match status {
        "completed" => tag.green().to_string(),
        "processing" | "updated" => tag.yellow().to_string(),
        "confirmation_pending" => tag.cyan().to_string(),
        "error" | "rejected" => tag.red().to_string(),
        _ => tag.normal().to_string(),
    }
}

fn print_welcome_banner(session_id: &str) {
    println!("{}", "Coachflow interactive chat".bold());
    println!("Session: {}", session_id.dimmed());
    println!("Type /help for commands, /exit to quit.\n");
}

fn print_help() {
    println!("Commands:");
    println!("  /status  Show the current session snapshot");
    println!("  /help    Show this help");
    println!("  /exit    Quit the chat");
    println!("Anything else is sent to the assistant.\n");
}
