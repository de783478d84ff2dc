//! Chat orchestration: confirmation gate plus routing
//!
//! One explicitly constructed service object owning the session
//! registry, the triage agent, the query processor, and the workflow
//! runner. Request handlers and the REPL are handed a reference; there
//! are no process-wide registries.
//!
//! Each inbound message passes a three-state gate: with a pending
//! approval the message is read as a yes/no/unclear confirmation;
//! otherwise it is classified and routed to confirm, direct process,
//! or reject. The user always gets a text reply.

use crate::config::Config;
use crate::context::ContextAggregator;
use crate::error::Result;
use crate::events::{Envelope, EventBus};
use crate::providers::Provider;
use crate::query::{QueryOutcome, QueryProcessor};
use crate::session::{
    PendingApproval, RunningWorkflow, SessionManager, SharedSession,
};
use crate::triage::{ConfirmationReply, IntentType, RoutingDecision, Tag, TriageAgent};
use crate::workflow::{HttpSearchTool, SearchTool, WorkflowRunner};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

/// Reply returned for every inbound chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    /// User-facing reply text
    pub message: String,
    /// Session the message belonged to
    pub session_id: String,
    /// Outcome discriminator ("processing", "completed", ...)
    pub status: String,
}

impl ChatResponse {
    fn new(session_id: &str, status: &str, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            session_id: session_id.to_string(),
            status: status.to_string(),
        }
    }
}

/// Orchestrates triage, confirmation, queries, and workflow launches
pub struct ChatOrchestrator {
    manager: Arc<SessionManager>,
    triage: TriageAgent,
    query: QueryProcessor,
    runner: WorkflowRunner,
    events: EventBus,
}

impl ChatOrchestrator {
    /// Wires the orchestrator from configuration and a provider
    pub fn new(config: &Config, provider: Arc<dyn Provider>) -> Result<Self> {
        let events = EventBus::default();
        let search: Arc<dyn SearchTool> = Arc::new(HttpSearchTool::new(&config.workflow)?);
        Ok(Self::with_parts(
            Arc::new(SessionManager::new(config.session.clone())),
            TriageAgent::new(
                Arc::clone(&provider),
                config.triage.high_confidence_threshold,
                config.triage.supported_domains.clone(),
            ),
            QueryProcessor::new(
                Arc::clone(&provider),
                ContextAggregator::new(config.context.query_context_size),
            ),
            WorkflowRunner::new(provider, search, events.clone()),
            events,
        ))
    }

    /// Assembles an orchestrator from prebuilt components
    pub fn with_parts(
        manager: Arc<SessionManager>,
        triage: TriageAgent,
        query: QueryProcessor,
        runner: WorkflowRunner,
        events: EventBus,
    ) -> Self {
        Self {
            manager,
            triage,
            query,
            runner,
            events,
        }
    }

    /// Session registry, for status and history surfaces
    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    /// Event bus carrying progress and error envelopes
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Handles one inbound chat message
    pub async fn handle_message(&self, session_id: &str, text: &str) -> ChatResponse {
        let session = self.manager.create_or_get(session_id).await;

        let pending = {
            let mut guard = session.lock().await;
            guard.add_user_message(text);
            guard.first_pending_approval().cloned()
        };

        match pending {
            Some(approval) => {
                self.handle_confirmation(&session, session_id, text, approval)
                    .await
            }
            None => self.handle_routing(&session, session_id, text).await,
        }
    }

    /// Applies a requirements update to a session's live workflow
    ///
    /// Used by the WebSocket inbound path. Returns false when the
    /// session or workflow does not exist.
    pub async fn update_requirements(&self, session_id: &str, new_request: &str) -> bool {
        let Some(session) = self.manager.get(session_id).await else {
            return false;
        };
        let domains = {
            let guard = session.lock().await;
            guard.all_domains()
        };
        for domain in domains {
            if self
                .runner
                .update_requirements(Arc::clone(&session), &domain, new_request)
                .await
            {
                session.lock().await.add_user_message(new_request);
                return true;
            }
        }
        false
    }

    async fn handle_confirmation(
        &self,
        session: &SharedSession,
        session_id: &str,
        text: &str,
        approval: PendingApproval,
    ) -> ChatResponse {
        match ConfirmationReply::parse(text) {
            ConfirmationReply::Yes => {
                info!(session_id, domain = %approval.domain, "Approval confirmed");
                {
                    let mut guard = session.lock().await;
                    if let Some(mut taken) = guard.remove_pending_approval(&approval.domain) {
                        taken.approve();
                    }
                }
                self.launch_workflow(
                    session,
                    session_id,
                    &approval.domain,
                    &approval.description,
                    approval.triage_result.clone(),
                    &approval.original_message,
                )
                .await
            }
            ConfirmationReply::No => {
                info!(session_id, domain = %approval.domain, "Approval declined");
                {
                    let mut guard = session.lock().await;
                    if let Some(mut taken) = guard.remove_pending_approval(&approval.domain) {
                        taken.reject();
                    }
                }
                self.reply(
                    session,
                    session_id,
                    "cancelled",
                    "No problem, I've cancelled that request. Is there anything else I can help you with?",
                )
                .await
            }
            ConfirmationReply::Unclear => {
                // Approval stays in place; ask again
                self.reply(
                    session,
                    session_id,
                    "confirmation_pending",
                    format!(
                        "I didn't catch that. Please reply yes or no: should I proceed with '{}'?",
                        approval.description
                    ),
                )
                .await
            }
        }
    }

    async fn handle_routing(
        &self,
        session: &SharedSession,
        session_id: &str,
        text: &str,
    ) -> ChatResponse {
        match self.triage.classify_and_route(session).await {
            RoutingDecision::Confirm {
                tag,
                confirmation_message,
            } => {
                let approval = PendingApproval::new(
                    tag.intent_domain.clone(),
                    tag.tagged_sentences.clone(),
                    serde_json::to_value(&tag).unwrap_or(serde_json::Value::Null),
                    text,
                    "create",
                    tag.confidence_score,
                    self.manager.approval_ttl(),
                );

                let stored = session
                    .lock()
                    .await
                    .add_pending_approval(tag.intent_domain.clone(), approval);
                if !stored {
                    warn!(session_id, domain = %tag.intent_domain, "Approval slot occupied");
                }
                self.reply(session, session_id, "confirmation_pending", confirmation_message)
                    .await
            }
            RoutingDecision::DirectProcess { tag } => {
                if tag.intent_type == IntentType::Query {
                    return self.answer_query(session, session_id, &tag).await;
                }
                let triage_result =
                    serde_json::to_value(&tag).unwrap_or(serde_json::Value::Null);
                self.launch_workflow(
                    session,
                    session_id,
                    &tag.intent_domain,
                    &tag.tagged_sentences,
                    triage_result,
                    text,
                )
                .await
            }
            RoutingDecision::Reject {
                redirect_message, ..
            } => {
                self.reply(session, session_id, "rejected", redirect_message)
                    .await
            }
        }
    }

    async fn answer_query(
        &self,
        session: &SharedSession,
        session_id: &str,
        tag: &Tag,
    ) -> ChatResponse {
        let intent_domain = self
            .triage
            .supported_domains()
            .contains(&tag.intent_domain)
            .then_some(tag.intent_domain.as_str());

        match self.query.process_query(session, intent_domain).await {
            QueryOutcome::Completed { response, .. } => {
                ChatResponse::new(session_id, "completed", response)
            }
            outcome @ QueryOutcome::Error { .. } => {
                self.events.publish(Envelope::new(
                    session_id,
                    "error",
                    outcome.response().to_string(),
                ));
                ChatResponse::new(session_id, "error", outcome.response().to_string())
            }
        }
    }

    async fn launch_workflow(
        &self,
        session: &SharedSession,
        session_id: &str,
        domain: &str,
        description: &str,
        triage_result: serde_json::Value,
        user_request: &str,
    ) -> ChatResponse {
        {
            let mut guard = session.lock().await;
            if let Some(existing) = guard.get_workflow(domain) {
                if existing.is_active() {
                    // Treat a repeat request against a live workflow as
                    // a requirements update
                    drop(guard);
                    self.runner
                        .update_requirements(Arc::clone(session), domain, user_request)
                        .await;
                    return self
                        .reply(
                            session,
                            session_id,
                            "updated",
                            "I've received your updated requirements. Let me analyze what needs to be changed...",
                        )
                        .await;
                }
                guard.remove_workflow(domain);
            }

            let mut workflow = RunningWorkflow::new(domain, description);
            workflow.triage_result = triage_result;
            workflow
                .context
                .insert("user_request".to_string(), json!(user_request));
            workflow
                .context
                .insert("requirements_history".to_string(), json!([user_request]));
            if !guard.add_workflow(domain, workflow) {
                return ChatResponse::new(
                    session_id,
                    "error",
                    "I couldn't start that workflow because one is already running for this domain.",
                );
            }
        }

        self.runner
            .spawn(Arc::clone(session), domain.to_string(), false)
            .await;
        self.reply(
            session,
            session_id,
            "processing",
            "I'm working on your plan. You'll receive updates as it progresses.",
        )
        .await
    }

    async fn reply(
        &self,
        session: &SharedSession,
        session_id: &str,
        status: &str,
        message: impl Into<String>,
    ) -> ChatResponse {
        let message = message.into();
        session
            .lock()
            .await
            .add_model_message(message.clone(), "orchestrator");
        ChatResponse::new(session_id, status, message)
    }
}
