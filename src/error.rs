//! Error types for Coachflow
//!
//! This module defines all error types used throughout the application,
//! using `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for Coachflow operations
///
/// This enum encompasses all possible errors that can occur during
/// session management, triage, query processing, workflow execution,
/// and provider interactions.
#[derive(Error, Debug)]
pub enum CoachflowError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Provider-related errors (API calls, malformed responses, etc.)
    #[error("Provider error: {0}")]
    Provider(String),

    /// Session registry errors
    #[error("Session error: {0}")]
    Session(String),

    /// Workflow execution errors
    #[error("Workflow error: {0}")]
    Workflow(String),

    /// Web search tool errors
    #[error("Search error: {0}")]
    Search(String),

    /// Intent classification errors
    #[error("Triage error: {0}")]
    Triage(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for Coachflow operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;
