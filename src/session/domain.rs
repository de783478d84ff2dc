//! Domain models for domain-keyed concurrent workflows
//!
//! Core data structures for workflows and approval requests. These are
//! shared between session management, orchestration, and the context
//! aggregator.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::task::AbortHandle;
use uuid::Uuid;

/// Workflow execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    /// Lowercase wire name, matching the serialized form
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Approval request states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

/// An active workflow in a specific domain
///
/// Holds the workflow state and execution context. A workflow is owned
/// by exactly one session and keyed by its domain name; the session
/// enforces the one-live-workflow-per-domain rule.
///
/// Status and progress are private so that every change goes through
/// the explicit mutators, which keep `last_update` fresh and progress
/// clamped.
#[derive(Debug)]
pub struct RunningWorkflow {
    /// Workflow identifier (generated when not supplied)
    pub id: String,
    /// Domain this workflow belongs to
    pub domain: String,
    /// Human-readable description
    pub description: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Raw classification result that launched this workflow
    pub triage_result: Value,
    /// Free-form execution context (string keys, JSON value variants)
    pub context: Map<String, Value>,
    /// Error message when the workflow failed
    pub error_message: Option<String>,
    status: WorkflowStatus,
    progress: f64,
    last_update: DateTime<Utc>,
    abort_handle: Option<AbortHandle>,
}

impl RunningWorkflow {
    /// Creates a new pending workflow with a generated id
    pub fn new(domain: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            domain: domain.into(),
            description: description.into(),
            created_at: now,
            triage_result: Value::Null,
            context: Map::new(),
            error_message: None,
            status: WorkflowStatus::Pending,
            progress: 0.0,
            last_update: now,
            abort_handle: None,
        }
    }

    /// Current status
    pub fn status(&self) -> WorkflowStatus {
        self.status
    }

    /// Current progress in [0.0, 1.0]
    pub fn progress(&self) -> f64 {
        self.progress
    }

    /// Timestamp of the most recent status or progress change
    pub fn last_update(&self) -> DateTime<Utc> {
        self.last_update
    }

    /// Sets the status and refreshes `last_update`
    ///
    /// Returns the refreshed timestamp so callers can observe the
    /// change explicitly instead of relying on a hidden side effect.
    pub fn set_status(&mut self, status: WorkflowStatus) -> DateTime<Utc> {
        self.status = status;
        self.last_update = Utc::now();
        self.last_update
    }

    /// Updates progress (clamped into [0.0, 1.0]) and optionally status
    ///
    /// Always refreshes `last_update`, even for a progress-only change.
    pub fn update_progress(&mut self, progress: f64, status: Option<WorkflowStatus>) {
        self.progress = progress.clamp(0.0, 1.0);
        match status {
            Some(status) => {
                self.set_status(status);
            }
            None => {
                self.last_update = Utc::now();
            }
        }
    }

    /// Marks the workflow completed with full progress
    pub fn mark_completed(&mut self) {
        self.set_status(WorkflowStatus::Completed);
        self.progress = 1.0;
    }

    /// Marks the workflow failed with an error message
    pub fn mark_failed(&mut self, error_message: impl Into<String>) {
        self.set_status(WorkflowStatus::Failed);
        self.error_message = Some(error_message.into());
    }

    /// True while the workflow has not reached a terminal state
    pub fn is_active(&self) -> bool {
        matches!(
            self.status,
            WorkflowStatus::Pending | WorkflowStatus::Running | WorkflowStatus::Paused
        )
    }

    /// Attaches the abort handle of the task driving this workflow
    pub fn set_abort_handle(&mut self, handle: AbortHandle) {
        self.abort_handle = Some(handle);
    }

    /// Aborts the driving task, if one is attached and still running
    pub fn abort_task(&mut self) {
        if let Some(handle) = self.abort_handle.take() {
            if !handle.is_finished() {
                handle.abort();
            }
        }
    }

    /// Serializable view for status endpoints and debugging
    pub fn snapshot(&self) -> Value {
        serde_json::json!({
            "id": self.id,
            "domain": self.domain,
            "description": self.description,
            "status": self.status.as_str(),
            "progress": self.progress,
            "created_at": self.created_at.to_rfc3339(),
            "last_update": self.last_update.to_rfc3339(),
            "error_message": self.error_message,
            "context": self.context,
        })
    }
}

/// A pending approval request for workflow creation
///
/// Created when triage flags a request as needing human confirmation,
/// consumed when the user answers yes/no, or reaped once expired.
/// Expiry is checked lazily against the wall clock; there is no timer.
#[derive(Debug, Clone)]
pub struct PendingApproval {
    /// Approval identifier
    pub id: String,
    /// Domain the deferred action belongs to
    pub domain: String,
    /// Human-readable description of the deferred action
    pub description: String,
    /// Raw classification result that triggered the approval
    pub triage_result: Value,
    /// Original user message that was classified
    pub original_message: String,
    /// Action type ("create", "update", "delete")
    pub action_type: String,
    /// Classifier confidence for the triggering tag
    pub confidence_score: f64,
    /// Current approval status
    pub status: ApprovalStatus,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Expiry deadline
    pub expires_at: DateTime<Utc>,
}

impl PendingApproval {
    /// Creates a new pending approval expiring after `ttl`
    pub fn new(
        domain: impl Into<String>,
        description: impl Into<String>,
        triage_result: Value,
        original_message: impl Into<String>,
        action_type: impl Into<String>,
        confidence_score: f64,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            domain: domain.into(),
            description: description.into(),
            triage_result,
            original_message: original_message.into(),
            action_type: action_type.into(),
            confidence_score,
            status: ApprovalStatus::Pending,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    /// True once the wall clock has passed the deadline
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// True iff the approval is still awaiting an answer
    ///
    /// Expiry is time-based: once the deadline passes this returns
    /// false even if no explicit `expire()` call happened.
    pub fn is_pending(&self) -> bool {
        self.status == ApprovalStatus::Pending && !self.is_expired()
    }

    /// Marks the approval as approved
    pub fn approve(&mut self) {
        self.status = ApprovalStatus::Approved;
    }

    /// Marks the approval as rejected
    pub fn reject(&mut self) {
        self.status = ApprovalStatus::Rejected;
    }

    /// Marks the approval as expired
    pub fn expire(&mut self) {
        self.status = ApprovalStatus::Expired;
    }

    /// Serializable view for status endpoints and debugging
    pub fn snapshot(&self) -> Value {
        serde_json::json!({
            "id": self.id,
            "domain": self.domain,
            "description": self.description,
            "action_type": self.action_type,
            "original_message": self.original_message,
            "confidence_score": self.confidence_score,
            "status": self.status,
            "created_at": self.created_at.to_rfc3339(),
            "expires_at": self.expires_at.to_rfc3339(),
        })
    }
}
