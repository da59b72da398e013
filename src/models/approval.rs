//! Approval decision types exchanged between the Slack handlers and the
//! Approval Broker.
//!
//! The pending-approval record itself lives inside the broker; these are the
//! payloads that cross module boundaries.

use serde::{Deserialize, Serialize};

/// Operator verdict on a pending approval.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Tool invocation may proceed.
    Allow,
    /// Tool invocation is refused.
    Deny,
}

/// A resolved decision delivered through a pending approval's channel.
#[derive(Debug, Clone)]
pub struct ApprovalDecision {
    /// Allow or deny.
    pub verdict: Verdict,
    /// Deny reason, when the operator supplied one.
    pub reason: Option<String>,
    /// Operator-edited tool input; `None` means "use the original".
    pub updated_input: Option<serde_json::Value>,
    /// Slack user ID of the deciding operator.
    pub decided_by: String,
}

impl ApprovalDecision {
    /// Plain allow with the original input echoed back by the broker.
    #[must_use]
    pub fn allow(decided_by: String) -> Self {
        Self {
            verdict: Verdict::Allow,
            reason: None,
            updated_input: None,
            decided_by,
        }
    }

    /// Deny with an optional reason.
    #[must_use]
    pub fn deny(decided_by: String, reason: Option<String>) -> Self {
        Self {
            verdict: Verdict::Deny,
            reason,
            updated_input: None,
            decided_by,
        }
    }
}
