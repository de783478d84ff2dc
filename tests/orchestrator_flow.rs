//! Integration tests for the end-to-end conversation flow
//!
//! Exercises the orchestrator's confirmation gate, query routing, and
//! workflow launch against a scripted provider: each test scripts the
//! exact sequence of provider replies (classification tags, search
//! queries, plans) the conversation will consume.

use async_trait::async_trait;
use coachflow::config::{SessionConfig, TriageConfig};
use coachflow::context::ContextAggregator;
use coachflow::events::EventBus;
use coachflow::orchestrator::ChatOrchestrator;
use coachflow::providers::{CompletionRequest, Provider};
use coachflow::query::QueryProcessor;
use coachflow::session::{SessionManager, WorkflowStatus};
use coachflow::triage::TriageAgent;
use coachflow::workflow::{SearchTool, WorkflowRunner};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Provider returning a fixed sequence of replies
struct ScriptedProvider {
    replies: Mutex<std::vec::IntoIter<String>>,
}

impl ScriptedProvider {
    fn new(replies: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter()),
        })
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn complete(&self, _request: CompletionRequest) -> coachflow::Result<String> {
        self.replies
            .lock()
            .expect("script lock")
            .next()
            .ok_or_else(|| anyhow::anyhow!("provider script exhausted"))
    }
}

/// Search tool returning canned results
struct CannedSearch;

#[async_trait]
impl SearchTool for CannedSearch {
    async fn search(&self, _query: &str) -> String {
        "rows and pulldowns build back width".to_string()
    }
}

fn tag(domain: &str, intent: &str, confidence: f64) -> String {
    format!(
        r#"[{{"intent_domain": "{}", "intent_type": "{}", "confidence_score": {}, "tagged_sentences": "plan an exercise routine", "context": "weekly planning"}}]"#,
        domain, intent, confidence
    )
}

fn orchestrator(provider: Arc<ScriptedProvider>) -> ChatOrchestrator {
    let provider: Arc<dyn Provider> = provider;
    let triage_config = TriageConfig::default();
    let events = EventBus::new(64);
    ChatOrchestrator::with_parts(
        Arc::new(SessionManager::new(SessionConfig::default())),
        TriageAgent::new(
            Arc::clone(&provider),
            triage_config.high_confidence_threshold,
            triage_config.supported_domains,
        ),
        QueryProcessor::new(Arc::clone(&provider), ContextAggregator::new(8_000)),
        WorkflowRunner::new(provider, Arc::new(CannedSearch), events.clone()),
        events,
    )
}

async fn wait_for_terminal_workflow(orchestrator: &ChatOrchestrator, session_id: &str) {
    for _ in 0..300 {
        if let Some(session) = orchestrator.manager().get(session_id).await {
            let guard = session.lock().await;
            if !guard.workflows.is_empty()
                && guard.workflows.values().all(|wf| !wf.is_active())
            {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("workflow never reached a terminal state");
}

#[tokio::test]
async fn confirm_then_yes_runs_workflow_to_completion() {
    let provider = ScriptedProvider::new(vec![
        tag("exercise_planning", "Create Request", 0.95),
        "exercise plan weekly routine search".to_string(),
        "Day 1: pull. Day 2: push. Day 3: legs.".to_string(),
    ]);
    let orchestrator = orchestrator(provider);
    let mut events = orchestrator.events().subscribe();

    let first = orchestrator
        .handle_message("flow-1", "plan an exercise routine for the week")
        .await;
    assert_eq!(first.status, "confirmation_pending");
    assert!(first.message.contains("Should I proceed"));

    let second = orchestrator.handle_message("flow-1", "yes").await;
    assert_eq!(second.status, "processing");

    wait_for_terminal_workflow(&orchestrator, "flow-1").await;

    let session = orchestrator.manager().get("flow-1").await.unwrap();
    let guard = session.lock().await;
    let workflow = guard.get_workflow("exercise_planning").unwrap();
    assert_eq!(workflow.status(), WorkflowStatus::Completed);
    assert_eq!(workflow.progress(), 1.0);
    assert_eq!(
        workflow.context["final_plan"],
        serde_json::json!("Day 1: pull. Day 2: push. Day 3: legs.")
    );
    // The original request survived the confirmation handshake
    assert_eq!(
        workflow.context["user_request"],
        serde_json::json!("plan an exercise routine for the week")
    );
    drop(guard);

    let mut event_types = Vec::new();
    while let Ok(envelope) = events.try_recv() {
        event_types.push(envelope.event_type);
    }
    assert_eq!(
        event_types,
        vec!["planning_start", "search_update", "final_plan"]
    );
}

#[tokio::test]
async fn confirm_then_no_cancels_without_workflow() {
    let provider = ScriptedProvider::new(vec![tag(
        "exercise_planning",
        "Create Request",
        0.9,
    )]);
    let orchestrator = orchestrator(provider);

    orchestrator
        .handle_message("flow-2", "create a muscle building plan")
        .await;
    let reply = orchestrator.handle_message("flow-2", "no").await;
    assert_eq!(reply.status, "cancelled");

    let session = orchestrator.manager().get("flow-2").await.unwrap();
    let guard = session.lock().await;
    assert!(guard.workflows.is_empty());
    assert!(guard.pending_approvals.is_empty());
}

#[tokio::test]
async fn unclear_reply_keeps_the_gate_closed() {
    // Script: classify, then (after two unclear replies) the query path
    // never runs because the approval still captures the next message
    let provider = ScriptedProvider::new(vec![tag(
        "exercise_planning",
        "Create Request",
        0.9,
    )]);
    let orchestrator = orchestrator(provider);

    orchestrator
        .handle_message("flow-3", "create a training plan")
        .await;
    let first = orchestrator.handle_message("flow-3", "hmm let me think").await;
    assert_eq!(first.status, "confirmation_pending");
    let second = orchestrator.handle_message("flow-3", "perhaps").await;
    assert_eq!(second.status, "confirmation_pending");

    let session = orchestrator.manager().get("flow-3").await.unwrap();
    let mut guard = session.lock().await;
    assert!(guard.has_pending_approval("exercise_planning"));
}

#[tokio::test]
async fn query_is_answered_directly() {
    let provider = ScriptedProvider::new(vec![
        tag("exercise_planning", "Query", 0.85),
        "Pull-ups and rows are the staples for back width.".to_string(),
    ]);
    let orchestrator = orchestrator(provider);

    let reply = orchestrator
        .handle_message("flow-4", "what exercises widen the back?")
        .await;
    assert_eq!(reply.status, "completed");
    assert_eq!(
        reply.message,
        "Pull-ups and rows are the staples for back width."
    );

    let session = orchestrator.manager().get("flow-4").await.unwrap();
    let guard = session.lock().await;
    assert_eq!(guard.history().last().unwrap().source, "query_processor");
}

#[tokio::test]
async fn unsupported_domain_is_redirected() {
    let provider = ScriptedProvider::new(vec![tag(
        "creative_generation",
        "Create Request",
        0.9,
    )]);
    let orchestrator = orchestrator(provider);

    let reply = orchestrator
        .handle_message("flow-5", "write a poem about squats")
        .await;
    assert_eq!(reply.status, "rejected");
    assert!(reply.message.contains("exercise planning"));

    let session = orchestrator.manager().get("flow-5").await.unwrap();
    let guard = session.lock().await;
    assert!(guard.workflows.is_empty());
    assert!(guard.pending_approvals.is_empty());
}

#[tokio::test]
async fn classification_failure_still_answers_the_user() {
    // Empty script: the classification call fails, triage degrades to
    // direct processing, and the query path also fails over to an
    // apologetic reply rather than an error propagating out
    let provider = ScriptedProvider::new(vec![]);
    let orchestrator = orchestrator(provider);

    let reply = orchestrator.handle_message("flow-6", "hello there").await;
    assert_eq!(reply.status, "error");
    assert!(reply.message.contains("error while processing your query"));
}

#[tokio::test]
async fn conversation_history_survives_the_whole_flow() {
    let provider = ScriptedProvider::new(vec![
        tag("exercise_planning", "Create Request", 0.95),
        "search query".to_string(),
        "the plan".to_string(),
    ]);
    let orchestrator = orchestrator(provider);

    orchestrator.handle_message("flow-7", "plan my week").await;
    orchestrator.handle_message("flow-7", "yes").await;
    wait_for_terminal_workflow(&orchestrator, "flow-7").await;

    let session = orchestrator.manager().get("flow-7").await.unwrap();
    let guard = session.lock().await;
    let sources: Vec<&str> = guard
        .history()
        .iter()
        .map(|m| m.source.as_str())
        .collect();
    // user ask, confirmation prompt, user yes, launch ack, final plan
    assert_eq!(
        sources,
        vec!["user", "orchestrator", "user", "orchestrator", "workflow_runner"]
    );
}
