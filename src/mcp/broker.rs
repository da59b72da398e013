//! Approval Broker — pending tool-approval requests and their resolution.
//!
//! A pending approval lives in the broker's map between `begin` and exactly
//! one of: resolution, timeout, or cancellation. The response channel is a
//! `oneshot`, so a late second resolution attempt finds no entry and fails
//! fast instead of blocking.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::models::approval::ApprovalDecision;
use crate::{AppError, Result};

/// An unresolved approval request owned by the broker.
struct PendingApproval {
    session_id: String,
    tx: oneshot::Sender<ApprovalDecision>,
    deadline: DateTime<Utc>,
    /// `(channel, message_ts)` of the rendered approval message.
    message: Option<(String, String)>,
}

/// Broker over all pending approvals.
pub struct ApprovalBroker {
    pending: Mutex<HashMap<String, PendingApproval>>,
    timeout: Duration,
}

impl ApprovalBroker {
    /// Create a broker with the configured approval deadline.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// Approval deadline duration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Register a new pending approval.
    ///
    /// Returns the synthesized request id and the receiver the tool handler
    /// blocks on. Request ids are monotonic wall-clock nanoseconds; a
    /// collision fails the call rather than overwriting the earlier entry.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Approval` on a request-id collision.
    pub async fn begin(
        &self,
        session_id: &str,
    ) -> Result<(String, oneshot::Receiver<ApprovalDecision>)> {
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let request_id = format!("req_{nanos}");
        let (tx, rx) = oneshot::channel();

        let deadline = Utc::now()
            + chrono::Duration::from_std(self.timeout)
                .unwrap_or_else(|_| chrono::Duration::seconds(300));

        let mut pending = self.pending.lock().await;
        if pending.contains_key(&request_id) {
            return Err(AppError::Approval(format!(
                "request id collision: {request_id}"
            )));
        }
        pending.insert(
            request_id.clone(),
            PendingApproval {
                session_id: session_id.to_owned(),
                tx,
                deadline,
                message: None,
            },
        );

        info!(request_id, session_id, "approval request registered");
        Ok((request_id, rx))
    }

    /// Record the Slack coordinates of the rendered approval message.
    pub async fn attach_message(&self, request_id: &str, channel: &str, message_ts: &str) {
        let mut pending = self.pending.lock().await;
        if let Some(entry) = pending.get_mut(request_id) {
            entry.message = Some((channel.to_owned(), message_ts.to_owned()));
        }
    }

    /// Resolve a pending approval with an operator decision.
    ///
    /// Removes the entry and delivers the decision; returns the Slack
    /// coordinates of the approval message so the caller can replace the
    /// buttons with the outcome.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no pending entry carries
    /// `request_id` (already resolved, timed out, or never existed).
    pub async fn resolve(
        &self,
        request_id: &str,
        decision: ApprovalDecision,
    ) -> Result<Option<(String, String)>> {
        let entry = {
            let mut pending = self.pending.lock().await;
            pending.remove(request_id)
        };

        let Some(entry) = entry else {
            return Err(AppError::NotFound(format!(
                "approval {request_id} is not pending"
            )));
        };

        if entry.tx.send(decision).is_err() {
            warn!(request_id, "approval receiver already dropped");
        }
        info!(request_id, session_id = %entry.session_id, "approval resolved");
        Ok(entry.message)
    }

    /// Drop a pending entry without delivering a decision.
    ///
    /// Used by the tool handler on deadline expiry or render failure.
    /// Returns whether an entry existed.
    pub async fn abandon(&self, request_id: &str) -> bool {
        let removed = self.pending.lock().await.remove(request_id).is_some();
        if removed {
            debug!(request_id, "approval abandoned");
        }
        removed
    }

    /// Drop every pending entry whose deadline has passed.
    ///
    /// Dropping the sender wakes any receiver still blocked on it. This is a
    /// backstop for handlers whose futures were cancelled mid-wait.
    pub async fn expire_stale(&self) -> usize {
        let now = Utc::now();
        let mut pending = self.pending.lock().await;
        let before = pending.len();
        pending.retain(|request_id, entry| {
            let keep = entry.deadline > now;
            if !keep {
                debug!(request_id, "expiring stale approval");
            }
            keep
        });
        before - pending.len()
    }

    /// Number of currently pending approvals.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}
