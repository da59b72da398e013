//! Deny-reason modal submission handler.
//!
//! The modal's `callback_id` encodes `deny_reason:{request_id}`. The typed
//! reason resolves the pending approval as a deny; the original approval
//! message is located through the broker (the submission payload carries no
//! message context) and updated with the outcome.

use std::sync::Arc;

use slack_morphism::prelude::{
    SlackActionId, SlackBlockId, SlackInteractionViewSubmissionEvent,
};
use tracing::{info, warn};

use crate::mcp::server::AppState;
use crate::models::approval::ApprovalDecision;
use crate::slack::blocks;
use crate::slack::gateway::ModalSubmitEvent;

/// Pull the typed reason out of the modal's view state.
#[must_use]
pub fn extract_deny_reason(event: &SlackInteractionViewSubmissionEvent) -> String {
    event
        .view
        .state_params
        .state
        .as_ref()
        .and_then(|s| s.values.get(&SlackBlockId("deny_reason_block".to_owned())))
        .and_then(|block| block.get(&SlackActionId("deny_reason_text".to_owned())))
        .and_then(|v| v.value.clone())
        .unwrap_or_default()
}

/// Process a deny-reason modal submission.
///
/// # Errors
///
/// Returns an error string if the callback id is malformed or resolution
/// fails.
pub async fn handle_view_submission(
    event: &ModalSubmitEvent,
    state: &Arc<AppState>,
) -> Result<(), String> {
    let (source, request_id) = event
        .callback_id
        .split_once(':')
        .ok_or_else(|| format!("malformed callback_id: {}", event.callback_id))?;

    if source != "deny_reason" {
        return Err(format!("unknown modal source: {source}"));
    }

    let reason = if event.value.is_empty() {
        None
    } else {
        Some(event.value.clone())
    };

    info!(
        request_id,
        user = %event.user,
        reason_len = event.value.len(),
        "deny-with-reason submitted"
    );

    let decision = ApprovalDecision::deny(event.user.clone(), reason.clone());
    match state.broker.resolve(request_id, decision).await {
        Ok(Some((channel, message_ts))) => {
            let outcome = blocks::approval_outcome_text(false, &event.user, reason.as_deref());
            if let Err(err) = state
                .gateway
                .update_message(&channel, &message_ts, &outcome)
                .await
            {
                warn!(%err, request_id, "failed to replace approval buttons after modal deny");
            }
            Ok(())
        }
        Ok(None) => {
            warn!(request_id, "approval resolved but its message is unknown");
            Ok(())
        }
        Err(err) => Err(format!("approval no longer pending: {err}")),
    }
}
