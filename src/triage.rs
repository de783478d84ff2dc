//! Intent classification and routing
//!
//! A single structured-output provider call classifies the latest
//! message into domain/type/confidence tags; the triage agent turns the
//! primary tag into a routing decision (confirm, direct process, or
//! reject). Classification failures never propagate: they degrade to a
//! zero-confidence fallback tag that routes to direct processing.
//!
//! Confirmation replies are matched against fixed word lists, not
//! re-classified.

use crate::providers::{CompletionRequest, Provider};
use crate::session::{ConversationWindow, Message, SharedSession};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Intent type wire names used by the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntentType {
    Query,
    #[serde(rename = "Create Request")]
    CreateRequest,
    #[serde(rename = "Update Request")]
    UpdateRequest,
    #[serde(rename = "Delete Request")]
    DeleteRequest,
}

impl IntentType {
    /// Wire name as emitted by the classifier
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Query => "Query",
            Self::CreateRequest => "Create Request",
            Self::UpdateRequest => "Update Request",
            Self::DeleteRequest => "Delete Request",
        }
    }
}

/// One classified intent for the latest message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
    /// Classified domain ("exercise_planning", "other", ...)
    pub intent_domain: String,
    /// Classified intent type
    pub intent_type: IntentType,
    /// Classifier confidence in [0, 1]
    pub confidence_score: f64,
    /// Words from the input that drove the classification
    pub tagged_sentences: String,
    /// Context captured for the user's intent
    #[serde(default)]
    pub context: String,
}

impl Tag {
    /// Zero-confidence fallback tag used when classification fails
    pub fn fallback(tagged_sentences: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            intent_domain: "other".to_string(),
            intent_type: IntentType::Query,
            confidence_score: 0.0,
            tagged_sentences: tagged_sentences.into(),
            context: context.into(),
        }
    }
}

/// Classifies the latest message via one structured-output call
pub struct MessageTagger {
    provider: Arc<dyn Provider>,
    system_prompt: String,
}

impl MessageTagger {
    /// Creates a tagger whose prompt lists the supported domains
    pub fn new(provider: Arc<dyn Provider>, supported_domains: &[String]) -> Self {
        Self {
            provider,
            system_prompt: build_classification_prompt(supported_domains),
        }
    }

    /// Classifies the latest message against the conversation history
    ///
    /// Always returns at least one tag; parse failures and provider
    /// errors fall back to an `other`/Query/0.0 tag.
    pub async fn classify(&self, conversation: &[Message]) -> Vec<Tag> {
        let latest_text = conversation
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();

        let request = CompletionRequest::new(ConversationWindow::to_wire(conversation))
            .with_system(self.system_prompt.clone())
            .with_temperature(0.0);

        let raw = match self.provider.complete(request).await {
            Ok(raw) => raw,
            Err(error) => {
                warn!(%error, "Classification call failed, using fallback tag");
                return vec![Tag::fallback(
                    latest_text,
                    format!("Classification error: {}", error),
                )];
            }
        };

        match parse_tags(&raw) {
            Some(tags) if !tags.is_empty() => {
                debug!(count = tags.len(), "Classified message");
                tags
            }
            _ => {
                warn!("Classifier returned no parseable tags, using fallback");
                vec![Tag::fallback(
                    latest_text,
                    "Unable to classify message, defaulting to direct processing",
                )]
            }
        }
    }
}

/// Parses the classifier reply, tolerating markdown code fences and a
/// single bare object instead of an array
fn parse_tags(raw: &str) -> Option<Vec<Tag>> {
    let stripped = strip_code_fences(raw);
    if let Ok(tags) = serde_json::from_str::<Vec<Tag>>(stripped) {
        return Some(tags);
    }
    serde_json::from_str::<Tag>(stripped).ok().map(|tag| vec![tag])
}

fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the language hint line and the closing fence
    let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn build_classification_prompt(supported_domains: &[String]) -> String {
    let mut domain_lines: Vec<String> = supported_domains
        .iter()
        .map(|domain| {
            format!(
                "- \"{}\": Requests related to {}.",
                domain,
                domain.replace('_', " ")
            )
        })
        .collect();
    domain_lines.push("- \"social_interaction\": Casual conversation or greetings.".to_string());
    domain_lines.push("- \"creative_generation\": Requests for creative content.".to_string());
    domain_lines.push("- \"other\": Unclassified intent domains.".to_string());

    format!(
        "Analyze the user and agent's chat history, classify the LATEST MESSAGE's intent domain \
         and intent type, determine the input type, and capture the context for the user's intent. \
         The input can have one or multiple intents.\n\n\
         **Intent domain:**\n{}\n\n\
         **Intent type:**\n\
         - \"Query\": User searches or asks about something that already exists or information already available.\n\
         - \"Create Request\": User explicitly requests the creation of something new.\n\
         - \"Update Request\": User requests changes or modifications to something previously created.\n\
         - \"Delete Request\": User explicitly requests deleting the previous requests.\n\n\
         Respond with ONLY a JSON array of tag objects, each with the fields:\n\
         intent_domain, intent_type, confidence_score, tagged_sentences, context\n\n\
         Confidence scores should reflect how certain you are about the classification \
         (0.0 = very uncertain, 1.0 = very certain). If any part of the input does not \
         clearly fit into the categories, classify it as \"other\".",
        domain_lines.join("\n")
    )
}

/// Routing decision for one inbound message
#[derive(Debug, Clone)]
pub enum RoutingDecision {
    /// Ask the user before launching the action
    Confirm {
        tag: Tag,
        confirmation_message: String,
    },
    /// Handle immediately (query or low-confidence action)
    DirectProcess { tag: Tag },
    /// Outside supported domains; redirect the user
    Reject { tag: Tag, redirect_message: String },
}

impl RoutingDecision {
    /// The tag the decision was derived from
    pub fn tag(&self) -> &Tag {
        match self {
            Self::Confirm { tag, .. } | Self::DirectProcess { tag } | Self::Reject { tag, .. } => {
                tag
            }
        }
    }
}

/// Classifies messages and produces routing decisions
///
/// Pure routing logic: owns no session state and sends nothing to the
/// user itself.
pub struct TriageAgent {
    tagger: MessageTagger,
    high_confidence_threshold: f64,
    supported_domains: Vec<String>,
}

impl TriageAgent {
    /// Creates an agent with the given threshold and domain allow-list
    pub fn new(
        provider: Arc<dyn Provider>,
        high_confidence_threshold: f64,
        supported_domains: Vec<String>,
    ) -> Self {
        Self {
            tagger: MessageTagger::new(provider, &supported_domains),
            high_confidence_threshold,
            supported_domains,
        }
    }

    /// Supported-domain allow-list
    pub fn supported_domains(&self) -> &[String] {
        &self.supported_domains
    }

    /// Classifies the session's latest message into a routing decision
    pub async fn classify_and_route(&self, session: &SharedSession) -> RoutingDecision {
        let (conversation, latest_text) = {
            let guard = session.lock().await;
            let latest = guard
                .latest_user_message()
                .map(|m| m.content.clone())
                .unwrap_or_default();
            (guard.conversation(false), latest)
        };

        if conversation.is_empty() {
            return RoutingDecision::DirectProcess {
                tag: Tag::fallback(latest_text, "No conversation history to classify"),
            };
        }

        let tags = self.tagger.classify(&conversation).await;
        let tag = tags.into_iter().next().unwrap_or_else(|| {
            Tag::fallback(
                latest_text,
                "Unable to classify message, defaulting to direct processing",
            )
        });

        debug!(
            domain = %tag.intent_domain,
            intent = tag.intent_type.as_str(),
            confidence = tag.confidence_score,
            "Triage classification"
        );
        self.route(tag)
    }

    fn route(&self, tag: Tag) -> RoutingDecision {
        let supported = self.supported_domains.contains(&tag.intent_domain);

        if supported
            && tag.intent_type == IntentType::CreateRequest
            && tag.confidence_score >= self.high_confidence_threshold
        {
            let confirmation_message = format!(
                "I detected you want to create a new {} plan: '{}'. Should I proceed with creating your plan?",
                tag.intent_domain.replace('_', " "),
                tag.tagged_sentences
            );
            return RoutingDecision::Confirm {
                tag,
                confirmation_message,
            };
        }

        // Fallback tags ("other" from a failed classification) also land
        // here so the user still gets an answer
        if supported || tag.intent_domain == "other" {
            return RoutingDecision::DirectProcess { tag };
        }

        let redirect_message = format!(
            "I can help with {}. Your message seems to be about '{}'. Could you tell me more about what you need?",
            self.supported_domains
                .iter()
                .map(|d| d.replace('_', " "))
                .collect::<Vec<_>>()
                .join(", "),
            tag.intent_domain
        );
        RoutingDecision::Reject {
            tag,
            redirect_message,
        }
    }
}

/// Parsed confirmation reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationReply {
    Yes,
    No,
    Unclear,
}

impl ConfirmationReply {
    /// Matches a reply against the fixed yes/no vocabularies
    ///
    /// Case-insensitive exact match after trimming; anything else is
    /// unclear. Deliberately not an LLM call.
    pub fn parse(message: &str) -> Self {
        const YES: [&str; 10] = [
            "yes", "y", "confirm", "proceed", "go ahead", "sure", "ok", "okay", "yep", "yeah",
        ];
        const NO: [&str; 8] = ["no", "n", "cancel", "stop", "abort", "nope", "nah", "don't"];

        let normalized = message.trim().to_lowercase();
        if YES.contains(&normalized.as_str()) {
            Self::Yes
        } else if NO.contains(&normalized.as_str()) {
            Self::No
        } else {
            Self::Unclear
        }
    }
}
