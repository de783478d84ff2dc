//! Message types and conversation utilities
//!
//! A normalized message record shared by every component that touches
//! conversation history, plus the sliding-window trimmer and the
//! provider wire conversion. Messages are immutable once created;
//! conversion to the wire shape is a pure function of their fields.

use crate::providers::ChatMessage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
    System,
}

impl Role {
    /// Lowercase display name ("user", "model", "system")
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Model => "model",
            Self::System => "system",
        }
    }

    /// Title-cased display name for transcripts
    pub fn title(&self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Model => "Model",
            Self::System => "System",
        }
    }
}

/// A single conversation message
///
/// `source` records which component authored the message ("user",
/// "query_processor", "triage_agent", "workflow_runner", ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Who the message speaks as
    pub role: Role,
    /// Message text
    pub content: String,
    /// Creation timestamp
    pub timestamp: DateTime<Utc>,
    /// Component that authored the message
    pub source: String,
}

impl Message {
    /// Creates a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp: Utc::now(),
            source: "user".to_string(),
        }
    }

    /// Creates a model message attributed to `source`
    pub fn model(content: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            content: content.into(),
            timestamp: Utc::now(),
            source: source.into(),
        }
    }

    /// Creates a system message attributed to `source`
    pub fn system(content: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            timestamp: Utc::now(),
            source: source.into(),
        }
    }

    /// Converts to the provider wire shape
    ///
    /// Model messages become the wire's "assistant" role; the mapping
    /// is inverted exactly by [`Message::from_wire`].
    pub fn to_wire(&self) -> ChatMessage {
        match self.role {
            Role::User => ChatMessage::user(self.content.clone()),
            Role::Model => ChatMessage::assistant(self.content.clone()),
            Role::System => ChatMessage::system(self.content.clone()),
        }
    }

    /// Builds a message from the provider wire shape
    ///
    /// Unknown wire roles default to user, mirroring how unclassified
    /// input is treated elsewhere.
    pub fn from_wire(wire: &ChatMessage, source: impl Into<String>) -> Self {
        let role = match wire.role.as_str() {
            "assistant" | "model" => Role::Model,
            "system" => Role::System,
            _ => Role::User,
        };
        Self {
            role,
            content: wire.content.clone(),
            timestamp: Utc::now(),
            source: source.into(),
        }
    }
}

/// Sliding-window conversation trimmer and formatting helpers
#[derive(Debug, Clone, Copy)]
pub struct ConversationWindow {
    max_messages: usize,
}

impl ConversationWindow {
    /// Creates a window retaining at most `max_messages` messages
    pub fn new(max_messages: usize) -> Self {
        Self { max_messages }
    }

    /// Maximum number of messages retained
    pub fn max_messages(&self) -> usize {
        self.max_messages
    }

    /// Trims `messages` in place to the most recent window
    ///
    /// Retained messages keep their original relative order.
    pub fn apply(&self, messages: &mut Vec<Message>) {
        if messages.len() > self.max_messages {
            let excess = messages.len() - self.max_messages;
            messages.drain(..excess);
        }
    }

    /// Converts messages to the provider wire format
    pub fn to_wire(messages: &[Message]) -> Vec<ChatMessage> {
        messages.iter().map(Message::to_wire).collect()
    }

    /// Most recent user message, if any
    pub fn latest_user_message(messages: &[Message]) -> Option<&Message> {
        messages.iter().rev().find(|m| m.role == Role::User)
    }

    /// Formats messages as a "Role: content" transcript
    pub fn transcript(messages: &[Message], include_system: bool) -> String {
        messages
            .iter()
            .filter(|m| include_system || m.role != Role::System)
            .map(|m| format!("{}: {}", m.role.title(), m.content))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        let msg = Message::user("hello");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.source, "user");

        let msg = Message::model("plan ready", "workflow_runner");
        assert_eq!(msg.role, Role::Model);
        assert_eq!(msg.source, "workflow_runner");

        let msg = Message::system("instructions", "system");
        assert_eq!(msg.role, Role::System);
    }

    #[test]
    fn test_wire_round_trip_preserves_role_and_content() {
        for original in [
            Message::user("a question"),
            Message::model("an answer", "query_processor"),
            Message::system("a directive", "system"),
        ] {
            let restored = Message::from_wire(&original.to_wire(), "restored");
            assert_eq!(restored.role, original.role);
            assert_eq!(restored.content, original.content);
        }
    }

    #[test]
    fn test_model_maps_to_assistant_on_wire() {
        let wire = Message::model("hi", "ai").to_wire();
        assert_eq!(wire.role, "assistant");
    }

    #[test]
    fn test_from_wire_unknown_role_defaults_to_user() {
        let wire = ChatMessage {
            role: "tool".to_string(),
            content: "output".to_string(),
        };
        assert_eq!(Message::from_wire(&wire, "x").role, Role::User);
    }

    #[test]
    fn test_sliding_window_keeps_most_recent_in_order() {
        let window = ConversationWindow::new(5);
        let mut messages: Vec<Message> = (0..20)
            .map(|i| {
                if i % 2 == 0 {
                    Message::user(format!("user {}", i))
                } else {
                    Message::model(format!("model {}", i), "ai")
                }
            })
            .collect();

        window.apply(&mut messages);

        assert_eq!(messages.len(), 5);
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(
            contents,
            vec!["model 15", "user 16", "model 17", "user 18", "model 19"]
        );
    }

    #[test]
    fn test_sliding_window_noop_under_capacity() {
        let window = ConversationWindow::new(10);
        let mut messages = vec![Message::user("a"), Message::user("b")];
        window.apply(&mut messages);
        assert_eq!(messages.len(), 2);
    }

    #[test]
    fn test_latest_user_message() {
        let messages = vec![
            Message::user("first"),
            Message::model("reply", "ai"),
            Message::user("second"),
            Message::model("reply 2", "ai"),
        ];
        let latest = ConversationWindow::latest_user_message(&messages).unwrap();
        assert_eq!(latest.content, "second");

        let only_model = vec![Message::model("reply", "ai")];
        assert!(ConversationWindow::latest_user_message(&only_model).is_none());
    }

    #[test]
    fn test_transcript_formatting() {
        let messages = vec![
            Message::system("rules", "system"),
            Message::user("question"),
            Message::model("answer", "ai"),
        ];

        let with_system = ConversationWindow::transcript(&messages, true);
        assert_eq!(with_system, "System: rules\nUser: question\nModel: answer");

        let without_system = ConversationWindow::transcript(&messages, false);
        assert_eq!(without_system, "User: question\nModel: answer");
    }

    #[test]
    fn test_role_serde_lowercase() {
        assert_eq!(serde_json::to_value(Role::Model).unwrap(), "model");
        assert_eq!(Role::User.as_str(), "user");
    }
}
