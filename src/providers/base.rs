//! Base provider trait and wire types for Coachflow
//!
//! This module defines the Provider trait that all LLM providers must
//! implement, along with the wire-level message shapes. The core treats
//! the provider as an opaque async text-in/text-out service; prompt
//! construction and response parsing live with the callers.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Wire-level message for provider requests
///
/// Represents a single role-tagged message as sent to the completion
/// API. Session history uses the richer [`crate::session::Message`]
/// type and converts to this shape at the provider boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role of the message sender (user, assistant, system)
    pub role: String,
    /// Content of the message
    pub content: String,
}

impl ChatMessage {
    /// Creates a new user message
    ///
    /// # Examples
    ///
    /// ```
    /// use coachflow::providers::ChatMessage;
    ///
    /// let msg = ChatMessage::user("Hello!");
    /// assert_eq!(msg.role, "user");
    /// ```
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    /// Creates a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }

    /// Creates a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }
}

/// A single completion request
///
/// Bundles the optional system instruction with the conversation to
/// send. The system instruction is kept separate from the message list
/// so providers can place it wherever their API expects.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Optional system instruction prepended to the conversation
    pub system_instruction: Option<String>,
    /// Role-tagged conversation messages
    pub messages: Vec<ChatMessage>,
    /// Sampling temperature override (provider default when `None`)
    pub temperature: Option<f32>,
    /// Maximum tokens to generate (provider default when `None`)
    pub max_output_tokens: Option<u32>,
}

impl CompletionRequest {
    /// Creates a request from a message list with no system instruction
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            system_instruction: None,
            messages,
            temperature: None,
            max_output_tokens: None,
        }
    }

    /// Sets the system instruction
    pub fn with_system(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    /// Sets the sampling temperature
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Sets the output token cap
    pub fn with_max_output_tokens(mut self, max: u32) -> Self {
        self.max_output_tokens = Some(max);
        self
    }
}

/// Provider trait for LLM backends
///
/// The orchestration core only ever needs a single text completion per
/// call; classification callers layer structured-output parsing on top
/// of the returned text.
///
/// # Examples
///
/// ```no_run
/// use coachflow::providers::{ChatMessage, CompletionRequest, Provider};
/// use coachflow::error::Result;
/// use async_trait::async_trait;
///
/// struct EchoProvider;
///
/// #[async_trait]
/// impl Provider for EchoProvider {
///     async fn complete(&self, request: CompletionRequest) -> Result<String> {
///         Ok(request.messages.last().map(|m| m.content.clone()).unwrap_or_default())
///     }
/// }
/// ```
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Provider: Send + Sync {
    /// Completes a conversation and returns the model's text reply
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails or the response is
    /// malformed. Callers are expected to degrade gracefully rather
    /// than propagate provider errors to users.
    async fn complete(&self, request: CompletionRequest) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_message_constructors() {
        assert_eq!(ChatMessage::user("hi").role, "user");
        assert_eq!(ChatMessage::assistant("hi").role, "assistant");
        assert_eq!(ChatMessage::system("hi").role, "system");
        assert_eq!(ChatMessage::user("hello").content, "hello");
    }

    #[test]
    fn test_completion_request_builder() {
        let request = CompletionRequest::new(vec![ChatMessage::user("q")])
            .with_system("be brief")
            .with_temperature(0.0)
            .with_max_output_tokens(800);

        assert_eq!(request.system_instruction.as_deref(), Some("be brief"));
        assert_eq!(request.temperature, Some(0.0));
        assert_eq!(request.max_output_tokens, Some(800));
        assert_eq!(request.messages.len(), 1);
    }

    #[test]
    fn test_chat_message_serialization() {
        let msg = ChatMessage::user("hello");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"], "hello");
    }
}
