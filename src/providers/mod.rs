//! Provider module for Coachflow
//!
//! Contains the LLM provider abstraction and the OpenAI-compatible
//! HTTP implementation.

pub mod base;
pub mod openai;

pub use base::{ChatMessage, CompletionRequest, Provider};
pub use openai::OpenAiProvider;

#[cfg(test)]
pub use base::MockProvider;

use crate::config::ProviderConfig;
use crate::error::Result;
use std::sync::Arc;

/// Create a provider instance from configuration
///
/// # Errors
///
/// Returns an error if the HTTP client cannot be constructed.
pub fn create_provider(config: &ProviderConfig) -> Result<Arc<dyn Provider>> {
    Ok(Arc::new(OpenAiProvider::new(config.clone())?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_provider_from_defaults() {
        let config = ProviderConfig::default();
        assert!(create_provider(&config).is_ok());
    }
}
