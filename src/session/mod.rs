//! Session management for Coachflow
//!
//! Domain-keyed workflow and approval state, bounded conversation
//! history, and the expiring session registry.

pub mod domain;
pub mod manager;
pub mod message;
pub mod state;

pub use domain::{ApprovalStatus, PendingApproval, RunningWorkflow, WorkflowStatus};
pub use manager::{CleanupStats, SessionManager, SharedSession};
pub use message::{ConversationWindow, Message, Role};
pub use state::ChatSession;
