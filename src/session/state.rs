//! Chat session state
//!
//! A session owns one workflow slot and one pending-approval slot per
//! domain, plus a bounded conversation history. All conflict rules are
//! local map operations signaled through boolean returns and warning
//! logs; nothing here raises for an expected conflict.

use crate::session::domain::{PendingApproval, RunningWorkflow};
use crate::session::message::{ConversationWindow, Message};
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use tracing::warn;

/// A single chat session with domain-keyed workflows and approvals
#[derive(Debug)]
pub struct ChatSession {
    /// External session identifier
    pub session_id: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Timestamp of the most recent mutating operation
    pub last_activity: DateTime<Utc>,
    /// At most one live workflow per domain
    pub workflows: HashMap<String, RunningWorkflow>,
    /// At most one pending approval per domain
    pub pending_approvals: HashMap<String, PendingApproval>,
    history: Vec<Message>,
    window: ConversationWindow,
}

impl ChatSession {
    /// Creates an empty session with the given history window
    pub fn new(session_id: impl Into<String>, window: ConversationWindow) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            created_at: now,
            last_activity: now,
            workflows: HashMap::new(),
            pending_approvals: HashMap::new(),
            history: Vec::new(),
            window,
        }
    }

    /// Refreshes the activity timestamp
    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    /// Adds a workflow to its domain slot
    ///
    /// Returns false without mutating the slot when a workflow already
    /// occupies the domain; the caller must remove the old one first.
    pub fn add_workflow(&mut self, domain: impl Into<String>, workflow: RunningWorkflow) -> bool {
        let domain = domain.into();
        self.touch();
        if let Some(existing) = self.workflows.get(&domain) {
            warn!(
                session_id = %self.session_id,
                domain = %domain,
                existing_id = %existing.id,
                "Cannot add workflow: domain slot already occupied"
            );
            return false;
        }
        self.workflows.insert(domain, workflow);
        true
    }

    /// Workflow for a domain, if any
    pub fn get_workflow(&self, domain: &str) -> Option<&RunningWorkflow> {
        self.workflows.get(domain)
    }

    /// Mutable workflow access for progress updates
    pub fn get_workflow_mut(&mut self, domain: &str) -> Option<&mut RunningWorkflow> {
        self.touch();
        self.workflows.get_mut(domain)
    }

    /// Removes the workflow for a domain; idempotent
    pub fn remove_workflow(&mut self, domain: &str) -> bool {
        self.workflows.remove(domain).is_some()
    }

    /// Adds a pending approval to its domain slot
    ///
    /// Only blocks when the existing approval is still pending; an
    /// expired or answered entry is silently replaced.
    pub fn add_pending_approval(
        &mut self,
        domain: impl Into<String>,
        approval: PendingApproval,
    ) -> bool {
        let domain = domain.into();
        self.touch();
        if let Some(existing) = self.pending_approvals.get(&domain) {
            if existing.is_pending() {
                warn!(
                    session_id = %self.session_id,
                    domain = %domain,
                    existing_id = %existing.id,
                    "Cannot add approval: one is already pending"
                );
                return false;
            }
        }
        self.pending_approvals.insert(domain, approval);
        true
    }

    /// Checks whether a domain has a pending approval
    ///
    /// Side-effecting read: an expired entry found in the slot is
    /// purged as part of the check.
    pub fn has_pending_approval(&mut self, domain: &str) -> bool {
        match self.pending_approvals.get(domain) {
            Some(approval) if approval.is_pending() => true,
            Some(_) => {
                self.pending_approvals.remove(domain);
                false
            }
            None => false,
        }
    }

    /// Removes and returns the approval for a domain
    pub fn remove_pending_approval(&mut self, domain: &str) -> Option<PendingApproval> {
        self.touch();
        self.pending_approvals.remove(domain)
    }

    /// First still-pending approval, used by the confirmation gate
    ///
    /// Expired entries encountered during the scan are purged, so a
    /// stale approval can never capture the next message.
    pub fn first_pending_approval(&mut self) -> Option<&PendingApproval> {
        let expired: Vec<String> = self
            .pending_approvals
            .iter()
            .filter(|(_, a)| !a.is_pending())
            .map(|(domain, _)| domain.clone())
            .collect();
        for domain in expired {
            self.pending_approvals.remove(&domain);
        }

        // BTreeSet ordering keeps the choice deterministic
        let domain = self
            .pending_approvals
            .keys()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .next()?
            .clone();
        self.pending_approvals.get(&domain)
    }

    /// Removes approvals whose `is_pending()` is false; returns count
    pub fn cleanup_expired_approvals(&mut self) -> usize {
        let expired: Vec<String> = self
            .pending_approvals
            .iter()
            .filter(|(_, approval)| !approval.is_pending())
            .map(|(domain, _)| domain.clone())
            .collect();

        for domain in &expired {
            self.pending_approvals.remove(domain);
        }
        expired.len()
    }

    /// All domains with a workflow or a pending approval
    pub fn all_domains(&self) -> BTreeSet<String> {
        self.workflows
            .keys()
            .chain(self.pending_approvals.keys())
            .cloned()
            .collect()
    }

    /// Appends a message and applies the sliding window
    pub fn add_message(&mut self, message: Message) {
        self.touch();
        self.history.push(message);
        let window = self.window;
        window.apply(&mut self.history);
    }

    /// Appends a user message
    pub fn add_user_message(&mut self, content: impl Into<String>) {
        self.add_message(Message::user(content));
    }

    /// Appends a model message attributed to `source`
    pub fn add_model_message(&mut self, content: impl Into<String>, source: impl Into<String>) {
        self.add_message(Message::model(content, source));
    }

    /// Appends a system message attributed to `source`
    pub fn add_system_message(&mut self, content: impl Into<String>, source: impl Into<String>) {
        self.add_message(Message::system(content, source));
    }

    /// Conversation history, optionally excluding system messages
    pub fn conversation(&self, include_system: bool) -> Vec<Message> {
        self.history
            .iter()
            .filter(|m| include_system || m.role != crate::session::message::Role::System)
            .cloned()
            .collect()
    }

    /// Full history slice
    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Most recent user message, if any
    pub fn latest_user_message(&self) -> Option<&Message> {
        ConversationWindow::latest_user_message(&self.history)
    }

    /// True once the session has been idle longer than `timeout`
    pub fn is_expired(&self, timeout: Duration) -> bool {
        Utc::now() > self.last_activity + timeout
    }

    /// Aborts every workflow task attached to this session
    pub fn abort_workflow_tasks(&mut self) {
        for workflow in self.workflows.values_mut() {
            workflow.abort_task();
        }
    }

    /// Serializable view for monitoring endpoints
    pub fn snapshot(&self) -> Value {
        serde_json::json!({
            "session_id": self.session_id,
            "created_at": self.created_at.to_rfc3339(),
            "last_activity": self.last_activity.to_rfc3339(),
            "message_count": self.history.len(),
            "workflows": self
                .workflows
                .iter()
                .map(|(domain, wf)| (domain.clone(), wf.snapshot()))
                .collect::<serde_json::Map<String, Value>>(),
            "pending_approvals": self
                .pending_approvals
                .iter()
                .map(|(domain, a)| (domain.clone(), a.snapshot()))
                .collect::<serde_json::Map<String, Value>>(),
            "total_domains": self.all_domains().len(),
        })
    }
}
