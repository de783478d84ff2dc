//! Query answering over aggregated multi-domain context
//!
//! One provider call per query: the session's prior conversation plus a
//! system instruction carrying the summarized, size-bounded context.
//! Results are structured payloads with a status discriminator rather
//! than errors; provider failures degrade to an apologetic reply.

use crate::context::{AggregateOptions, AggregatedContext, ContextAggregator};
use crate::providers::{CompletionRequest, Provider};
use crate::session::{ChatSession, ConversationWindow, SharedSession};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

fn domain_header_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?m)^Domain: (\w+)").expect("static pattern compiles"))
}

/// Structured result of one query call
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum QueryOutcome {
    /// Provider answered; the reply was appended to history
    Completed {
        response: String,
        domains_referenced: Vec<String>,
        confidence: f64,
        timestamp: DateTime<Utc>,
        context_summary: String,
    },
    /// Precondition or provider failure; history untouched
    Error {
        response: String,
        error_type: String,
        domains_referenced: Vec<String>,
        confidence: f64,
        timestamp: DateTime<Utc>,
    },
}

impl QueryOutcome {
    fn error(error_type: &str, response: impl Into<String>) -> Self {
        Self::Error {
            response: response.into(),
            error_type: error_type.to_string(),
            domains_referenced: Vec::new(),
            confidence: 0.0,
            timestamp: Utc::now(),
        }
    }

    /// User-facing reply text for either outcome
    pub fn response(&self) -> &str {
        match self {
            Self::Completed { response, .. } | Self::Error { response, .. } => response,
        }
    }

    /// True for the completed variant
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// Answers queries with session context through the provider
pub struct QueryProcessor {
    provider: Arc<dyn Provider>,
    aggregator: ContextAggregator,
}

impl QueryProcessor {
    /// Creates a processor over a provider and an aggregator
    pub fn new(provider: Arc<dyn Provider>, aggregator: ContextAggregator) -> Self {
        Self {
            provider,
            aggregator,
        }
    }

    /// Processes the session's latest user query
    ///
    /// Requires at least one prior user message; without one the
    /// provider is never invoked and a `no_user_message` error payload
    /// is returned. The session lock is released while the provider
    /// call is in flight and re-taken to append the reply.
    pub async fn process_query(
        &self,
        session: &SharedSession,
        intent_domain: Option<&str>,
    ) -> QueryOutcome {
        let (query, context, conversation) = {
            let guard = session.lock().await;
            let query = match guard.latest_user_message() {
                Some(message) => message.content.clone(),
                None => {
                    return QueryOutcome::error(
                        "no_user_message",
                        "No user message found in conversation history.",
                    );
                }
            };

            let options = AggregateOptions::for_query(intent_domain);
            let context = self.aggregator.aggregate(Some(&*guard), &options);
            let conversation = guard.conversation(false);
            (query, context, conversation)
        };

        let domains_referenced = extract_domain_names(&context.formatted_context);
        let system_prompt = build_system_prompt(&context.formatted_context, conversation.len());
        let request =
            CompletionRequest::new(ConversationWindow::to_wire(&conversation))
                .with_system(system_prompt);

        debug!(
            domains = ?domains_referenced,
            truncated = context.truncated,
            "Dispatching query to provider"
        );

        let response = match self.provider.complete(request).await {
            Ok(response) => response,
            Err(error) => {
                warn!(%error, "Provider call failed during query processing");
                return QueryOutcome::error(
                    "llm_error",
                    format!(
                        "I encountered an error while processing your query: {}",
                        error
                    ),
                );
            }
        };

        let confidence = calculate_confidence(&context, &query, &response);
        session
            .lock()
            .await
            .add_model_message(response.clone(), "query_processor");

        QueryOutcome::Completed {
            response,
            domains_referenced,
            confidence,
            timestamp: Utc::now(),
            context_summary: summarize_context(&context),
        }
    }

    /// Relevance of a domain to a query, for routing decisions
    ///
    /// Deterministic heuristic in [0, 1]: direct mention, live
    /// workflow, entity-value overlap, description overlap, and a
    /// static per-domain keyword list.
    pub fn domain_relevance(&self, query: &str, domain: &str, session: &ChatSession) -> f64 {
        let query_lower = query.to_lowercase();
        let mut relevance: f64 = 0.0;

        if query_lower.contains(&domain.to_lowercase()) {
            relevance += 0.5;
        }

        if let Some(workflow) = session.get_workflow(domain) {
            relevance += 0.2;

            if let Some(entities) = workflow.context.get("entities").and_then(|v| v.as_object()) {
                let mentioned = entities.values().any(|value| {
                    let text = match value.as_str() {
                        Some(s) => s.to_lowercase(),
                        None => value.to_string().to_lowercase(),
                    };
                    !text.is_empty() && query_lower.contains(&text)
                });
                if mentioned {
                    relevance += 0.2;
                }
            }

            if query_lower.contains(&workflow.description.to_lowercase()) {
                relevance += 0.1;
            }
        }

        let keywords: &[&str] = match domain {
            "finance" => &["portfolio", "stock", "investment", "money", "transfer", "analysis"],
            "hr" => &["employee", "onboard", "documents", "orientation", "hiring"],
            "it" => &["access", "provision", "system", "server", "deployment"],
            "analytics" => &["data", "analysis", "report", "dashboard", "metrics"],
            _ => &[],
        };
        if keywords.iter().any(|k| query_lower.contains(k)) {
            relevance += 0.1;
        }

        relevance.clamp(0.0, 1.0)
    }
}

/// Domain names scanned from `Domain: <name>` section headers
fn extract_domain_names(formatted_context: &str) -> Vec<String> {
    domain_header_pattern()
        .captures_iter(formatted_context)
        .map(|caps| caps[1].to_string())
        .collect()
}

fn build_system_prompt(formatted_context: &str, conversation_length: usize) -> String {
    if formatted_context.is_empty() || formatted_context == "No active workflows" {
        format!(
            "You are a helpful assistant for a multi-domain workflow management system.\n\
             The user currently has no active workflows in their session.\n\n\
             Conversation Context: This conversation has {} previous messages. \
             Use the conversation history to understand context and references.\n\n\
             Instructions:\n\
             - Provide helpful, concise responses to their queries\n\
             - Reference previous parts of the conversation when relevant\n\
             - If they ask about \"it\", \"that\", or \"the previous one\", use conversation context to understand what they mean\n\
             - Maintain a professional but friendly tone",
            conversation_length
        )
    } else {
        format!(
            "You are a helpful assistant for a multi-domain workflow management system.\n\n\
             Current Session Context:\n{}\n\n\
             Conversation Context: This conversation has {} previous messages. \
             Use the conversation history to understand context and references.\n\n\
             Instructions:\n\
             - Use the provided context to answer the user's query accurately\n\
             - Reference previous parts of the conversation when relevant\n\
             - Be concise and relevant to their specific question\n\
             - Reference specific workflow details when relevant\n\
             - If asking about status, provide current progress and next steps\n\
             - If no relevant context exists, acknowledge this clearly\n\
             - If they use pronouns like \"it\", \"that\", or \"the previous one\", use conversation context to understand what they mean\n\
             - Maintain a professional but friendly tone",
            formatted_context, conversation_length
        )
    }
}

/// Deterministic confidence score in [0, 1], not a probability
fn calculate_confidence(context: &AggregatedContext, query: &str, response: &str) -> f64 {
    let mut confidence: f64 = 0.5;
    let formatted = &context.formatted_context;

    if !formatted.is_empty() && formatted != "No active workflows" {
        confidence += 0.2;
    }

    let query_lower = query.to_lowercase();
    let domains = extract_domain_names(formatted);
    if domains
        .iter()
        .any(|domain| query_lower.contains(&domain.to_lowercase()))
    {
        confidence += 0.1;
    }

    if response.split_whitespace().count() > 10 {
        confidence += 0.1;
    }

    if context.truncated {
        confidence -= 0.1;
    }

    if domains.len() > 1 {
        confidence += 0.1;
    }

    confidence.clamp(0.0, 1.0)
}

/// One-line description of the context a query was answered with
fn summarize_context(context: &AggregatedContext) -> String {
    let formatted = &context.formatted_context;
    if formatted.is_empty() || formatted == "No active workflows" {
        return "No active workflows".to_string();
    }

    let domains = extract_domain_names(formatted);
    let workflow_count = formatted.matches("  Workflow:").count();
    let mut summary = format!(
        "{} workflow(s) across {} domain(s): {}",
        workflow_count,
        domains.len(),
        domains.join(", ")
    );
    if context.truncated {
        summary.push_str(" (context truncated)");
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::MockProvider;
    use crate::session::RunningWorkflow;
    use serde_json::json;
    use tokio::sync::Mutex;

    fn shared_session() -> SharedSession {
        Arc::new(Mutex::new(ChatSession::new(
            "s1",
            ConversationWindow::new(50),
        )))
    }

    fn processor(provider: MockProvider) -> QueryProcessor {
        QueryProcessor::new(Arc::new(provider), ContextAggregator::new(8_000))
    }

    fn finance_workflow() -> RunningWorkflow {
        let mut workflow = RunningWorkflow::new("finance", "Portfolio analysis");
        workflow
            .context
            .insert("intent".to_string(), json!("analyze"));
        workflow
    }

    #[tokio::test]
    async fn test_empty_history_never_calls_provider() {
        // No expectation set: any provider call would panic the mock
        let processor = processor(MockProvider::new());
        let session = shared_session();

        let outcome = processor.process_query(&session, None).await;
        match outcome {
            QueryOutcome::Error {
                error_type,
                confidence,
                ..
            } => {
                assert_eq!(error_type, "no_user_message");
                assert_eq!(confidence, 0.0);
            }
            other => panic!("expected error outcome, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_successful_query_appends_reply() {
        let mut provider = MockProvider::new();
        provider
            .expect_complete()
            .times(1)
            .returning(|_| Ok("Your portfolio analysis is underway.".to_string()));
        let processor = processor(provider);

        let session = shared_session();
        {
            let mut guard = session.lock().await;
            guard.add_workflow("finance", finance_workflow());
            guard.add_user_message("How is my finance workflow doing?");
        }

        let outcome = processor.process_query(&session, None).await;
        match &outcome {
            QueryOutcome::Completed {
                domains_referenced,
                context_summary,
                ..
            } => {
                assert_eq!(domains_referenced, &vec!["finance".to_string()]);
                assert!(context_summary.contains("1 workflow(s)"));
            }
            other => panic!("expected completed outcome, got {:?}", other),
        }

        let guard = session.lock().await;
        let last = guard.history().last().unwrap();
        assert_eq!(last.content, "Your portfolio analysis is underway.");
        assert_eq!(last.source, "query_processor");
    }

    #[tokio::test]
    async fn test_provider_failure_leaves_history_untouched() {
        let mut provider = MockProvider::new();
        provider
            .expect_complete()
            .times(1)
            .returning(|_| Err(anyhow::anyhow!("connection refused")));
        let processor = processor(provider);

        let session = shared_session();
        session.lock().await.add_user_message("hello?");

        let outcome = processor.process_query(&session, None).await;
        match outcome {
            QueryOutcome::Error {
                error_type,
                response,
                ..
            } => {
                assert_eq!(error_type, "llm_error");
                assert!(response.contains("connection refused"));
            }
            other => panic!("expected error outcome, got {:?}", other),
        }

        // Only the original user message remains
        assert_eq!(session.lock().await.history().len(), 1);
    }

    #[tokio::test]
    async fn test_intent_domain_filters_context() {
        let mut provider = MockProvider::new();
        provider
            .expect_complete()
            .times(1)
            .returning(|_| Ok("done".to_string()));
        let processor = processor(provider);

        let session = shared_session();
        {
            let mut guard = session.lock().await;
            guard.add_workflow("finance", finance_workflow());
            guard.add_workflow("hr", RunningWorkflow::new("hr", "Onboarding"));
            guard.add_user_message("status of hr?");
        }

        let outcome = processor.process_query(&session, Some("hr")).await;
        match outcome {
            QueryOutcome::Completed {
                domains_referenced, ..
            } => assert_eq!(domains_referenced, vec!["hr".to_string()]),
            other => panic!("expected completed outcome, got {:?}", other),
        }
    }

    #[test]
    fn test_extract_domain_names() {
        let text = "Domain: finance\n  Workflow: a\n\nDomain: hr\n  Workflow: b\n  Sub Domain: nope";
        assert_eq!(extract_domain_names(text), vec!["finance", "hr"]);
    }

    #[test]
    fn test_confidence_clamped_with_all_boosts() {
        let context = AggregatedContext {
            session_id: Some("s1".to_string()),
            formatted_context: "Domain: finance\n  Workflow: a\n\nDomain: hr\n  Workflow: b"
                .to_string(),
            truncated: false,
            truncation_info: None,
            recent_messages: None,
            error: None,
        };
        let response = "word ".repeat(20);
        let score = calculate_confidence(&context, "finance and hr status", &response);
        // 0.5 + 0.2 + 0.1 + 0.1 + 0.1 capped at 1.0
        assert_eq!(score, 1.0);
    }

    #[test]
    fn test_confidence_truncation_penalty() {
        let context = AggregatedContext {
            session_id: Some("s1".to_string()),
            formatted_context: "No active workflows".to_string(),
            truncated: true,
            truncation_info: None,
            recent_messages: None,
            error: None,
        };
        let score = calculate_confidence(&context, "short", "brief");
        assert!((score - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_system_prompt_variants() {
        let empty = build_system_prompt("No active workflows", 3);
        assert!(empty.contains("no active workflows"));
        assert!(empty.contains("has 3 previous messages"));

        let full = build_system_prompt("Domain: finance\n  Workflow: a", 5);
        assert!(full.contains("Current Session Context:"));
        assert!(full.contains("Domain: finance"));
    }

    #[test]
    fn test_domain_relevance_components() {
        let mut session = ChatSession::new("s1", ConversationWindow::new(50));
        let mut workflow = RunningWorkflow::new("finance", "Portfolio analysis");
        workflow
            .context
            .insert("entities".to_string(), json!({"symbol": "acme"}));
        session.add_workflow("finance", workflow);

        let provider = MockProvider::new();
        let processor = processor(provider);

        // mention (0.5) + workflow (0.2) + entity (0.2) + keyword (0.1)
        let score = processor.domain_relevance(
            "how is my finance portfolio doing on acme",
            "finance",
            &session,
        );
        assert_eq!(score, 1.0);

        let score = processor.domain_relevance("unrelated question", "finance", &session);
        assert!((score - 0.2).abs() < 1e-9);

        let score = processor.domain_relevance("any news", "hr", &session);
        assert_eq!(score, 0.0);
    }

    #[test]
    fn test_summarize_context_counts() {
        let context = AggregatedContext {
            session_id: Some("s1".to_string()),
            formatted_context:
                "Domain: finance\n  Workflow: a\n\nDomain: hr\n  Workflow: b".to_string(),
            truncated: true,
            truncation_info: None,
            recent_messages: None,
            error: None,
        };
        assert_eq!(
            summarize_context(&context),
            "2 workflow(s) across 2 domain(s): finance, hr (context truncated)"
        );
    }
}
