//! Background workflow runner
//!
//! Drives a launched workflow through plan, research, and summarize
//! steps in a spawned task (launch and poll: the caller returns as soon
//! as the task exists and observes progress through the session or the
//! event bus). Every state change goes through the session lock; each
//! step publishes a typed envelope.
//!
//! There is no cooperative cancellation checkpoint inside a step: an
//! aborted task abandons whatever step was in flight.

use crate::config::WorkflowConfig;
use crate::events::{Envelope, EventBus};
use crate::providers::{ChatMessage, CompletionRequest, Provider};
use crate::session::{SharedSession, WorkflowStatus};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Free-text web research boundary
///
/// Never fails: transport errors come back as an error string in the
/// result text, and the workflow carries on with whatever it got.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SearchTool: Send + Sync {
    async fn search(&self, query: &str) -> String;
}

/// HTTP search client for an endpoint taking a `q` query parameter
pub struct HttpSearchTool {
    client: reqwest::Client,
    endpoint: Option<String>,
}

impl HttpSearchTool {
    /// Builds the client from workflow configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: &WorkflowConfig) -> crate::error::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.search_timeout_seconds))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.search_endpoint.clone(),
        })
    }
}

#[async_trait]
impl SearchTool for HttpSearchTool {
    async fn search(&self, query: &str) -> String {
        let endpoint = match &self.endpoint {
            Some(endpoint) => endpoint,
            None => return "Search unavailable: no search endpoint configured".to_string(),
        };

        let result = async {
            let response = self
                .client
                .get(endpoint)
                .query(&[("q", query)])
                .send()
                .await?
                .error_for_status()?;
            response.text().await
        }
        .await;

        match result {
            Ok(text) => text,
            Err(error) => {
                warn!(%error, "Search request failed");
                format!("Search failed: {}", error)
            }
        }
    }
}

/// Runs workflows to completion in background tasks
pub struct WorkflowRunner {
    provider: Arc<dyn Provider>,
    search: Arc<dyn SearchTool>,
    events: EventBus,
}

impl WorkflowRunner {
    /// Creates a runner over a provider, a search tool, and the bus
    pub fn new(provider: Arc<dyn Provider>, search: Arc<dyn SearchTool>, events: EventBus) -> Self {
        Self {
            provider,
            search,
            events,
        }
    }

    /// Spawns the driving task for an already-registered workflow
    ///
    /// The workflow must occupy the session's domain slot before this
    /// is called. The task's abort handle is attached to the workflow
    /// so session deletion can cancel it.
    pub async fn spawn(&self, session: SharedSession, domain: String, is_update: bool) {
        let provider = Arc::clone(&self.provider);
        let search = Arc::clone(&self.search);
        let events = self.events.clone();

        let task_session = Arc::clone(&session);
        let task_domain = domain.clone();
        let task = tokio::spawn(async move {
            run_workflow(task_session, task_domain, provider, search, events, is_update).await;
        });

        let mut guard = session.lock().await;
        if let Some(workflow) = guard.get_workflow_mut(&domain) {
            workflow.set_abort_handle(task.abort_handle());
        }
    }

    /// Applies a requirements update and re-runs the workflow steps
    ///
    /// Records the new request in the workflow's requirements history
    /// and spawns a fresh driving pass. Returns false when the domain
    /// has no workflow to update.
    pub async fn update_requirements(
        &self,
        session: SharedSession,
        domain: &str,
        new_request: &str,
    ) -> bool {
        {
            let mut guard = session.lock().await;
            let Some(workflow) = guard.get_workflow_mut(domain) else {
                return false;
            };
            workflow.abort_task();
            workflow
                .context
                .insert("user_request".to_string(), json!(new_request));
            match workflow.context.get_mut("requirements_history") {
                Some(Value::Array(history)) => history.push(json!(new_request)),
                _ => {
                    workflow.context.insert(
                        "requirements_history".to_string(),
                        json!([new_request]),
                    );
                }
            }
            let timestamp = workflow.set_status(WorkflowStatus::Pending);
            workflow.update_progress(0.0, None);
            info!(domain, %timestamp, "Requirements updated, re-running workflow");
        }

        self.events.publish(Envelope::new(
            session.lock().await.session_id.clone(),
            "status_update",
            "Your requirements have changed. I'm updating the research and plan accordingly...",
        ));
        self.spawn(session, domain.to_string(), true).await;
        true
    }
}

async fn run_workflow(
    session: SharedSession,
    domain: String,
    provider: Arc<dyn Provider>,
    search: Arc<dyn SearchTool>,
    events: EventBus,
    is_update: bool,
) {
    let (session_id, user_request) = {
        let mut guard = session.lock().await;
        let session_id = guard.session_id.clone();
        let Some(workflow) = guard.get_workflow_mut(&domain) else {
            warn!(domain, "Workflow task started with no workflow in slot");
            return;
        };
        workflow.update_progress(0.1, Some(WorkflowStatus::Running));
        let user_request = workflow
            .context
            .get("user_request")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        (session_id, user_request)
    };

    let acknowledgment = if is_update {
        "Re-evaluating your updated requirements and adjusting the plan..."
    } else {
        "Got it. I'll create a custom plan for you. This might take a moment..."
    };
    events.publish(Envelope::new(&session_id, "planning_start", acknowledgment));

    // Plan step: derive the research query
    let plan_prompt = format!(
        "Produce a single concise web search query that would find the best reference \
         material for this request. Respond with the query text only, no explanation.\n\n\
         Request: {}",
        user_request
    );
    let search_query = match provider
        .complete(CompletionRequest::new(vec![ChatMessage::user(plan_prompt)]))
        .await
    {
        Ok(query) => query.trim().to_string(),
        Err(e) => {
            fail_workflow(&session, &domain, &session_id, &events, &e.to_string()).await;
            return;
        }
    };
    {
        let mut guard = session.lock().await;
        if let Some(workflow) = guard.get_workflow_mut(&domain) {
            workflow
                .context
                .insert("search_query".to_string(), json!(search_query));
            workflow.update_progress(0.4, None);
        }
    }

    // Research step: the tool reports failures as text, never an error
    let search_results = search.search(&search_query).await;
    {
        let mut guard = session.lock().await;
        if let Some(workflow) = guard.get_workflow_mut(&domain) {
            workflow
                .context
                .insert("search_results".to_string(), json!(search_results));
            workflow.update_progress(0.7, None);
        }
    }
    events.publish(Envelope::new(
        &session_id,
        "search_update",
        "Research complete. Creating your personalized plan...",
    ));

    // Summarize step: turn research into the final plan
    let update_note = if is_update {
        "\n\nNote: This is an updated plan based on revised requirements."
    } else {
        ""
    };
    let summarize_prompt = format!(
        "Based on the user's request: \"{}\"\n\n\
         Research Data:\n{}\n\n\
         Create a comprehensive, structured plan that addresses the user's requirements. Include:\n\
         1. A schedule breakdown\n\
         2. Specific steps with concrete details\n\
         3. A progression strategy\n\
         4. Key focus areas\n\
         5. Tips for success\n\
         6. Any modifications based on the specific requirements\n\n\
         Format it as a clear, actionable plan.{}",
        user_request, search_results, update_note
    );
    let final_plan = match provider
        .complete(CompletionRequest::new(vec![ChatMessage::user(summarize_prompt)]))
        .await
    {
        Ok(plan) => plan,
        Err(e) => {
            fail_workflow(&session, &domain, &session_id, &events, &e.to_string()).await;
            return;
        }
    };

    let progress_context = {
        let mut guard = session.lock().await;
        guard.add_model_message(final_plan.clone(), "workflow_runner");
        match guard.get_workflow_mut(&domain) {
            Some(workflow) => {
                workflow
                    .context
                    .insert("final_plan".to_string(), json!(final_plan));
                workflow.context.insert(
                    "state".to_string(),
                    json!({
                        "status": "completed",
                        "progress": 100,
                        "summary": format!("Plan created for: {}", user_request),
                    }),
                );
                workflow.mark_completed();
                Some(workflow.snapshot())
            }
            None => None,
        }
    };

    info!(domain, session_id, "Workflow completed");
    let plan_kind = if is_update { "updated plan" } else { "plan" };
    let mut envelope = Envelope::new(
        &session_id,
        "final_plan",
        format!("Here is your {}:\n\n{}", plan_kind, final_plan),
    );
    if let Some(context) = progress_context {
        envelope = envelope.with_context(context);
    }
    events.publish(envelope);
}

async fn fail_workflow(
    session: &SharedSession,
    domain: &str,
    session_id: &str,
    events: &EventBus,
    message: &str,
) {
    error!(domain, session_id, error = message, "Workflow failed");
    let user_text = format!("Sorry, there was an error creating your plan: {}", message);
    {
        let mut guard = session.lock().await;
        if let Some(workflow) = guard.get_workflow_mut(domain) {
            workflow.mark_failed(message);
        }
        guard.add_model_message(user_text.clone(), "workflow_runner");
    }
    events.publish(Envelope::new(session_id, "error", user_text));
}
