//! Configuration management for Coachflow
//!
//! This module handles loading, parsing, and validating configuration
//! from YAML files. Every timeout, TTL, and size limit used by the
//! session registry, the context aggregator, and the triage gate is
//! explicit configuration here rather than a hard-coded constant.

use crate::error::{CoachflowError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure for Coachflow
///
/// Holds all configuration needed by the orchestrator: provider
/// settings, session lifecycle thresholds, context aggregation limits,
/// triage behavior, and the server bind address.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Provider configuration
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Session lifecycle configuration
    #[serde(default)]
    pub session: SessionConfig,

    /// Context aggregation configuration
    #[serde(default)]
    pub context: ContextConfig,

    /// Triage/classification configuration
    #[serde(default)]
    pub triage: TriageConfig,

    /// Workflow runner configuration
    #[serde(default)]
    pub workflow: WorkflowConfig,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,
}

/// Provider configuration
///
/// Specifies the LLM endpoint used for classification and generation.
/// The endpoint speaks the OpenAI-compatible chat completions protocol,
/// which keeps the provider pointable at local servers and test mocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Base URL of the chat completions API
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Model name sent with each request
    #[serde(default = "default_model")]
    pub model: String,

    /// Optional bearer token for the API
    #[serde(default)]
    pub api_key: Option<String>,

    /// Sampling temperature for generation requests
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

fn default_api_base() -> String {
    "http://localhost:11434/v1".to_string()
}

fn default_model() -> String {
    "llama3.2:latest".to_string()
}

fn default_temperature() -> f32 {
    0.3
}

fn default_request_timeout() -> u64 {
    120
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            model: default_model(),
            api_key: None,
            temperature: default_temperature(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

/// Session lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Idle minutes before a session is eligible for deletion
    #[serde(default = "default_idle_timeout_minutes")]
    pub idle_timeout_minutes: i64,

    /// Seconds between background cleanup sweeps
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,

    /// Minutes before a pending approval expires
    #[serde(default = "default_approval_ttl_minutes")]
    pub approval_ttl_minutes: i64,

    /// Maximum messages retained in a session's sliding window
    #[serde(default = "default_history_window")]
    pub history_window: usize,
}

fn default_idle_timeout_minutes() -> i64 {
    30
}

fn default_sweep_interval_seconds() -> u64 {
    60
}

fn default_approval_ttl_minutes() -> i64 {
    10
}

fn default_history_window() -> usize {
    50
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_minutes: default_idle_timeout_minutes(),
            sweep_interval_seconds: default_sweep_interval_seconds(),
            approval_ttl_minutes: default_approval_ttl_minutes(),
            history_window: default_history_window(),
        }
    }
}

/// Context aggregation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Maximum characters in an aggregated context block
    #[serde(default = "default_max_context_size")]
    pub max_context_size: usize,

    /// Maximum characters in the context given to query processing
    #[serde(default = "default_query_context_size")]
    pub query_context_size: usize,
}

fn default_max_context_size() -> usize {
    10_000
}

fn default_query_context_size() -> usize {
    8_000
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_context_size: default_max_context_size(),
            query_context_size: default_query_context_size(),
        }
    }
}

/// Triage/classification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageConfig {
    /// Confidence at or above which a create request requires confirmation
    #[serde(default = "default_confidence_threshold")]
    pub high_confidence_threshold: f64,

    /// Domains this deployment supports; everything else is redirected
    #[serde(default = "default_supported_domains")]
    pub supported_domains: Vec<String>,
}

fn default_confidence_threshold() -> f64 {
    0.8
}

fn default_supported_domains() -> Vec<String> {
    vec!["exercise_planning".to_string()]
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            high_confidence_threshold: default_confidence_threshold(),
            supported_domains: default_supported_domains(),
        }
    }
}

/// Workflow runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Endpoint of the web search service used by research steps
    ///
    /// `None` disables research; workflows still complete with the
    /// provider alone.
    #[serde(default = "default_search_endpoint")]
    pub search_endpoint: Option<String>,

    /// Search request timeout in seconds
    #[serde(default = "default_search_timeout")]
    pub search_timeout_seconds: u64,
}

fn default_search_endpoint() -> Option<String> {
    Some("https://lite.duckduckgo.com/lite/".to_string())
}

fn default_search_timeout() -> u64 {
    30
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            search_endpoint: default_search_endpoint(),
            search_timeout_seconds: default_search_timeout(),
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the HTTP/WebSocket server
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

fn default_bind_address() -> String {
    "127.0.0.1:8000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    ///
    /// A missing file is not an error: defaults are used so the binary
    /// runs out of the box against a local provider.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the YAML configuration file
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!("Config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns `CoachflowError::Config` for out-of-range values.
    pub fn validate(&self) -> Result<()> {
        if self.session.idle_timeout_minutes <= 0 {
            return Err(CoachflowError::Config(
                "session.idle_timeout_minutes must be positive".to_string(),
            )
            .into());
        }
        if self.session.sweep_interval_seconds == 0 {
            return Err(CoachflowError::Config(
                "session.sweep_interval_seconds must be positive".to_string(),
            )
            .into());
        }
        if self.session.approval_ttl_minutes <= 0 {
            return Err(CoachflowError::Config(
                "session.approval_ttl_minutes must be positive".to_string(),
            )
            .into());
        }
        if self.session.history_window == 0 {
            return Err(CoachflowError::Config(
                "session.history_window must be at least 1".to_string(),
            )
            .into());
        }
        // Truncation reserves 200 characters for the marker, so anything
        // smaller cannot hold a truncated context.
        if self.context.max_context_size <= 200 {
            return Err(CoachflowError::Config(
                "context.max_context_size must be greater than 200".to_string(),
            )
            .into());
        }
        if !(0.0..=1.0).contains(&self.triage.high_confidence_threshold) {
            return Err(CoachflowError::Config(
                "triage.high_confidence_threshold must be in [0.0, 1.0]".to_string(),
            )
            .into());
        }
        if self.triage.supported_domains.is_empty() {
            return Err(CoachflowError::Config(
                "triage.supported_domains must not be empty".to_string(),
            )
            .into());
        }
        Ok(())
    }
}
