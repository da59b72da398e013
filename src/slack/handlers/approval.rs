//! Approval button handler.
//!
//! Routes Approve and Deny presses to the broker's pending entry and
//! replaces the interactive buttons with a static outcome line. "Deny with
//! Reason" opens a modal instead; the pending entry stays untouched until
//! the modal is submitted (or dismissed, in which case the buttons remain
//! live until the deadline).

use std::sync::Arc;

use tracing::{info, warn};

use crate::mcp::server::AppState;
use crate::models::approval::ApprovalDecision;
use crate::slack::blocks;
use crate::slack::gateway::InteractiveEvent;

/// Process one approval button action.
///
/// # Errors
///
/// Returns an error string if processing fails.
pub async fn handle_approval_action(
    event: &InteractiveEvent,
    state: &Arc<AppState>,
) -> Result<(), String> {
    let request_id = event.value.as_str();
    if request_id.is_empty() {
        return Err("approval action missing request_id value".into());
    }

    // "Deny with Reason" opens the free-text modal; the approval stays
    // pending until the modal is submitted.
    if event.action_id == "approve_deny_reason" {
        return state
            .gateway
            .open_deny_reason_modal(&event.trigger_id, request_id)
            .await
            .map_err(|err| format!("failed to open deny-reason modal: {err}"));
    }

    let decision = match event.action_id.as_str() {
        "approve_allow" => ApprovalDecision::allow(event.user.clone()),
        "approve_deny" => ApprovalDecision::deny(event.user.clone(), None),
        other => return Err(format!("unknown approval action_id: {other}")),
    };
    let approved = matches!(decision.verdict, crate::models::approval::Verdict::Allow);
    let reason = decision.reason.clone();

    match state.broker.resolve(request_id, decision).await {
        Ok(_message) => {
            info!(request_id, user = %event.user, approved, "approval decided via button");

            let outcome = blocks::approval_outcome_text(approved, &event.user, reason.as_deref());
            if let Err(err) = state
                .gateway
                .update_message(&event.channel, &event.message_ts, &outcome)
                .await
            {
                warn!(%err, request_id, "failed to replace approval buttons");
            }
            Ok(())
        }
        Err(err) => {
            // Already resolved, timed out, or unknown — tell the clicker.
            warn!(%err, request_id, "approval no longer pending");
            if let Err(update_err) = state
                .gateway
                .update_message(
                    &event.channel,
                    &event.message_ts,
                    "\u{26a0}\u{fe0f} This approval request is no longer pending.",
                )
                .await
            {
                warn!(%update_err, request_id, "failed to update stale approval message");
            }
            Ok(())
        }
    }
}
