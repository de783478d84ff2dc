//! Session registry with idle expiry
//!
//! Sessions live behind a per-session async mutex inside a shared
//! registry map. Handlers and workflow tasks clone the `SharedSession`
//! handle and serialize on its lock; the registry lock is only held for
//! map operations, never across an await on a session.
//!
//! Expiry is enforced two ways: lazily on lookup (an expired session is
//! replaced by a fresh one under the same id) and by a periodic sweeper
//! task that reaps idle sessions and stale approvals.

use crate::config::SessionConfig;
use crate::session::message::ConversationWindow;
use crate::session::state::ChatSession;
use chrono::Duration;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Shared handle to a single session
pub type SharedSession = Arc<Mutex<ChatSession>>;

/// Counters reported by a cleanup pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CleanupStats {
    /// Idle sessions removed
    pub sessions_removed: usize,
    /// Expired approvals removed from surviving sessions
    pub approvals_removed: usize,
}

/// Registry of chat sessions keyed by session id
pub struct SessionManager {
    sessions: RwLock<HashMap<String, SharedSession>>,
    config: SessionConfig,
}

impl SessionManager {
    /// Creates an empty registry
    pub fn new(config: SessionConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            config,
        }
    }

    fn idle_timeout(&self) -> Duration {
        Duration::minutes(self.config.idle_timeout_minutes)
    }

    /// Approval lifetime applied to new approval requests
    pub fn approval_ttl(&self) -> Duration {
        Duration::minutes(self.config.approval_ttl_minutes)
    }

    fn fresh_session(&self, session_id: &str) -> SharedSession {
        Arc::new(Mutex::new(ChatSession::new(
            session_id,
            ConversationWindow::new(self.config.history_window),
        )))
    }

    /// Returns the session for `session_id`, creating it when absent
    ///
    /// Returning an existing session refreshes its activity timestamp.
    /// An expired session found under the id is discarded and replaced
    /// with a fresh one, so callers never observe stale state.
    pub async fn create_or_get(&self, session_id: &str) -> SharedSession {
        if let Some(existing) = self.get(session_id).await {
            let expired = existing.lock().await.is_expired(self.idle_timeout());
            if !expired {
                return existing;
            }
            debug!(session_id, "Replacing expired session on access");
            existing.lock().await.abort_workflow_tasks();
        }

        let mut sessions = self.sessions.write().await;
        // Re-check under the write lock; another task may have won
        if let Some(existing) = sessions.get(session_id) {
            let mut guard = existing.lock().await;
            if !guard.is_expired(self.idle_timeout()) {
                guard.touch();
                drop(guard);
                return Arc::clone(existing);
            }
        }

        info!(session_id, "Creating session");
        let session = self.fresh_session(session_id);
        sessions.insert(session_id.to_string(), Arc::clone(&session));
        session
    }

    /// Returns the session for `session_id` without creating one
    ///
    /// Any access counts as activity: a live session is touched so that
    /// clients polling status or listening on the WebSocket keep it out
    /// of the sweeper's reach. An already-expired session is returned
    /// untouched so lookup cannot resurrect it.
    pub async fn get(&self, session_id: &str) -> Option<SharedSession> {
        let session = self.sessions.read().await.get(session_id).cloned()?;
        {
            let mut guard = session.lock().await;
            if !guard.is_expired(self.idle_timeout()) {
                guard.touch();
            }
        }
        Some(session)
    }

    /// Deletes a session, aborting any workflow tasks it owns
    pub async fn delete(&self, session_id: &str) -> bool {
        let removed = self.sessions.write().await.remove(session_id);
        match removed {
            Some(session) => {
                session.lock().await.abort_workflow_tasks();
                info!(session_id, "Deleted session");
                true
            }
            None => false,
        }
    }

    /// Reaps idle sessions and expired approvals in one pass
    pub async fn cleanup_expired(&self) -> CleanupStats {
        let timeout = self.idle_timeout();
        let mut stats = CleanupStats::default();
        let mut expired_ids = Vec::new();

        {
            let sessions = self.sessions.read().await;
            for (id, session) in sessions.iter() {
                let mut guard = session.lock().await;
                if guard.is_expired(timeout) {
                    expired_ids.push(id.clone());
                } else {
                    stats.approvals_removed += guard.cleanup_expired_approvals();
                }
            }
        }

        if !expired_ids.is_empty() {
            let mut sessions = self.sessions.write().await;
            for id in &expired_ids {
                if let Some(session) = sessions.remove(id) {
                    session.lock().await.abort_workflow_tasks();
                    stats.sessions_removed += 1;
                }
            }
        }

        if stats.sessions_removed > 0 || stats.approvals_removed > 0 {
            info!(
                sessions_removed = stats.sessions_removed,
                approvals_removed = stats.approvals_removed,
                "Cleanup pass finished"
            );
        }
        stats
    }

    /// Spawns the periodic cleanup sweeper
    ///
    /// Runs until the returned handle is aborted.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let interval = std::time::Duration::from_secs(self.config.sweep_interval_seconds);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // First tick fires immediately; skip it so a fresh server
            // does not sweep before any session exists
            ticker.tick().await;
            loop {
                ticker.tick().await;
                manager.cleanup_expired().await;
            }
        })
    }

    /// Aborts every workflow task and drops all sessions
    pub async fn shutdown(&self) {
        let mut sessions = self.sessions.write().await;
        for (_, session) in sessions.drain() {
            session.lock().await.abort_workflow_tasks();
        }
        info!("Session manager shut down");
    }

    /// Number of live sessions
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::domain::{PendingApproval, RunningWorkflow};
    use chrono::Utc;
    use serde_json::Value;

    fn manager() -> SessionManager {
        SessionManager::new(SessionConfig::default())
    }

    fn short_timeout_manager() -> SessionManager {
        SessionManager::new(SessionConfig {
            idle_timeout_minutes: 30,
            sweep_interval_seconds: 60,
            approval_ttl_minutes: 10,
            history_window: 50,
        })
    }

    #[tokio::test]
    async fn test_create_or_get_reuses_live_session() {
        let manager = manager();
        let first = manager.create_or_get("s1").await;
        let second = manager.create_or_get("s1").await;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(manager.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_create_or_get_refreshes_activity_on_existing_hit() {
        let manager = manager();
        let session = manager.create_or_get("s1").await;
        session.lock().await.last_activity = Utc::now() - Duration::minutes(20);

        let again = manager.create_or_get("s1").await;
        assert!(Arc::ptr_eq(&session, &again));
        // Still the same session, but no longer 20 minutes idle
        let idle = Utc::now() - again.lock().await.last_activity;
        assert!(idle < Duration::minutes(1));
    }

    #[tokio::test]
    async fn test_get_refreshes_activity_but_not_for_expired() {
        let manager = manager();
        let session = manager.create_or_get("s1").await;
        session.lock().await.last_activity = Utc::now() - Duration::minutes(20);

        manager.get("s1").await.unwrap();
        let idle = Utc::now() - session.lock().await.last_activity;
        assert!(idle < Duration::minutes(1));

        // A session past the idle timeout is not resurrected by lookup
        let stale = Utc::now() - Duration::minutes(31);
        session.lock().await.last_activity = stale;
        manager.get("s1").await.unwrap();
        assert_eq!(session.lock().await.last_activity, stale);
    }

    #[tokio::test]
    async fn test_create_or_get_replaces_expired_session() {
        let manager = short_timeout_manager();
        let first = manager.create_or_get("s1").await;
        first.lock().await.add_user_message("hello");
        first.lock().await.last_activity = Utc::now() - Duration::minutes(31);

        let second = manager.create_or_get("s1").await;
        assert!(!Arc::ptr_eq(&first, &second));
        // Fresh session starts empty
        assert!(second.lock().await.history().is_empty());
    }

    #[tokio::test]
    async fn test_get_does_not_create() {
        let manager = manager();
        assert!(manager.get("missing").await.is_none());
        assert_eq!(manager.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_delete() {
        let manager = manager();
        manager.create_or_get("s1").await;
        assert!(manager.delete("s1").await);
        assert!(!manager.delete("s1").await);
        assert_eq!(manager.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_cleanup_removes_idle_sessions() {
        let manager = short_timeout_manager();
        let stale = manager.create_or_get("stale").await;
        manager.create_or_get("live").await;
        stale.lock().await.last_activity = Utc::now() - Duration::minutes(31);

        let stats = manager.cleanup_expired().await;
        assert_eq!(stats.sessions_removed, 1);
        assert!(manager.get("stale").await.is_none());
        assert!(manager.get("live").await.is_some());
    }

    #[tokio::test]
    async fn test_cleanup_reaps_expired_approvals_in_live_sessions() {
        let manager = manager();
        let session = manager.create_or_get("s1").await;
        {
            let mut guard = session.lock().await;
            let mut approval = PendingApproval::new(
                "finance",
                "do a thing",
                Value::Null,
                "please do a thing",
                "create",
                0.9,
                Duration::minutes(10),
            );
            approval.expires_at = Utc::now() - Duration::seconds(1);
            guard
                .pending_approvals
                .insert("finance".to_string(), approval);
        }

        let stats = manager.cleanup_expired().await;
        assert_eq!(stats.approvals_removed, 1);
        assert_eq!(stats.sessions_removed, 0);
        assert!(session.lock().await.pending_approvals.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_create_or_get_yields_one_session() {
        let manager = Arc::new(manager());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let manager = Arc::clone(&manager);
            handles.push(tokio::spawn(
                async move { manager.create_or_get("s1").await },
            ));
        }

        let sessions: Vec<SharedSession> =
            futures::future::try_join_all(handles).await.unwrap();
        for session in &sessions[1..] {
            assert!(Arc::ptr_eq(&sessions[0], session));
        }
        assert_eq!(manager.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_progress_writes_never_observed_half_done() {
        let manager = manager();
        let session = manager.create_or_get("s1").await;
        session
            .lock()
            .await
            .add_workflow("finance", RunningWorkflow::new("finance", "analysis"));

        // Writer updates progress and two paired context keys in one
        // critical section per step
        let writer_session = Arc::clone(&session);
        let writer = tokio::spawn(async move {
            for step in 0..200_i64 {
                let mut guard = writer_session.lock().await;
                if let Some(workflow) = guard.get_workflow_mut("finance") {
                    let progress = step as f64 / 200.0;
                    workflow.update_progress(progress, None);
                    workflow
                        .context
                        .insert("step".to_string(), serde_json::json!(step));
                    workflow
                        .context
                        .insert("step_progress".to_string(), serde_json::json!(progress));
                }
                drop(guard);
                tokio::task::yield_now().await;
            }
        });

        for _ in 0..200 {
            {
                let guard = session.lock().await;
                let workflow = guard.get_workflow("finance").unwrap();
                if let (Some(step), Some(step_progress)) = (
                    workflow.context.get("step").and_then(Value::as_i64),
                    workflow.context.get("step_progress").and_then(Value::as_f64),
                ) {
                    // Fields written together must be read together
                    assert!((step_progress - step as f64 / 200.0).abs() < 1e-9);
                    assert!((workflow.progress() - step_progress).abs() < 1e-9);
                }
            }
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_clears_registry() {
        let manager = manager();
        manager.create_or_get("a").await;
        manager.create_or_get("b").await;
        manager.shutdown().await;
        assert_eq!(manager.session_count().await, 0);
    }
}
