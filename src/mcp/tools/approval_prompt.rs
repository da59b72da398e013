//! `approval_prompt` MCP tool handler.
//!
//! Called by the agent child when its permission gate fires. Correlates the
//! call to a thread, renders an interactive approval message there, and
//! blocks until the operator decides or the deadline elapses.
//!
//! The response is the sole content element of the tool result, as
//! serialized JSON: `{"behavior":"allow","updatedInput":…}` or
//! `{"behavior":"deny","message":…}`. On allow, `updatedInput` is always
//! present — the original input is echoed back when the operator did not
//! edit it.

use std::sync::Arc;

use rmcp::handler::server::tool::ToolCallContext;
use rmcp::model::CallToolResult;
use tracing::{info, info_span, warn, Instrument};

use crate::manager::tool_display;
use crate::mcp::server::RelayServer;
use crate::models::approval::{ApprovalDecision, Verdict};
use crate::slack::gateway::ApprovalRequestView;

/// Input parameters for the `approval_prompt` tool.
#[derive(Debug, serde::Deserialize)]
struct ApprovalPromptInput {
    /// Tool the agent wants to invoke.
    tool_name: String,
    /// Tool input mapping, snapshotted for the approval record.
    #[serde(default)]
    input: Option<serde_json::Map<String, serde_json::Value>>,
    /// Invocation identifier; unused beyond logging.
    #[serde(default)]
    tool_use_id: Option<String>,
}

/// Serialize the deny response payload.
#[must_use]
pub fn deny_response(message: &str) -> serde_json::Value {
    serde_json::json!({
        "behavior": "deny",
        "message": message,
    })
}

/// Shape an operator decision into the wire payload for the child.
///
/// On allow, `updatedInput` is always present: the operator's edited input
/// when one was supplied, the original input echoed back otherwise.
#[must_use]
pub fn decision_payload(
    decision: ApprovalDecision,
    original_input: serde_json::Value,
) -> serde_json::Value {
    match decision.verdict {
        Verdict::Allow => serde_json::json!({
            "behavior": "allow",
            "updatedInput": decision.updated_input.unwrap_or(original_input),
        }),
        Verdict::Deny => deny_response(
            decision
                .reason
                .as_deref()
                .unwrap_or("denied by operator"),
        ),
    }
}

/// Wrap a response payload as the tool result's sole content element.
fn to_result(payload: &serde_json::Value) -> Result<CallToolResult, rmcp::ErrorData> {
    Ok(CallToolResult::success(vec![rmcp::model::Content::text(
        payload.to_string(),
    )]))
}

/// Handle the `approval_prompt` tool call.
///
/// # Errors
///
/// Returns `rmcp::ErrorData` only on malformed parameters; every domain
/// failure (no session, render failure, timeout) resolves as a deny so the
/// child always receives a well-formed decision.
pub async fn handle(
    context: ToolCallContext<'_, RelayServer>,
) -> Result<CallToolResult, rmcp::ErrorData> {
    let state = Arc::clone(context.service.state());
    let args: serde_json::Map<String, serde_json::Value> = context.arguments.unwrap_or_default();

    let input: ApprovalPromptInput = serde_json::from_value(serde_json::Value::Object(args))
        .map_err(|err| {
            rmcp::ErrorData::invalid_params(
                format!("invalid approval_prompt parameters: {err}"),
                None,
            )
        })?;

    let span = info_span!(
        "approval_prompt",
        tool_name = %input.tool_name,
        tool_use_id = input.tool_use_id.as_deref().unwrap_or(""),
    );

    async move {
        let original_input = input
            .input
            .map_or_else(|| serde_json::json!({}), serde_json::Value::Object);

        // ── Correlate to a thread ────────────────────────────
        // The tool transport carries no session identity, so an empty id
        // resolves through the manager's last-active fallback.
        let Some((session_id, channel, thread_ts)) = state.manager.get_session_info("").await
        else {
            warn!("approval_prompt with no resolvable session; denying");
            return to_result(&deny_response(
                "no active session could be correlated with this approval request",
            ));
        };

        // ── Register pending approval ────────────────────────
        let (request_id, rx) = match state.broker.begin(&session_id).await {
            Ok(pair) => pair,
            Err(err) => {
                warn!(%err, "failed to register approval");
                return to_result(&deny_response(&format!(
                    "failed to register approval request: {err}"
                )));
            }
        };

        // ── Render the interactive message ───────────────────
        let view = ApprovalRequestView {
            request_id: request_id.clone(),
            tool_name: input.tool_name.clone(),
            fields: tool_display::approval_fields(&original_input),
        };

        let message_ts = match state
            .gateway
            .render_approval(&channel, &thread_ts, &view)
            .await
        {
            Ok(ts) => ts,
            Err(err) => {
                warn!(%err, request_id, "failed to post approval message; denying");
                state.broker.abandon(&request_id).await;
                return to_result(&deny_response(&format!(
                    "failed to post approval message: {err}"
                )));
            }
        };
        state
            .broker
            .attach_message(&request_id, &channel, &message_ts)
            .await;

        // ── Block on decision or deadline ────────────────────
        let decision = match tokio::time::timeout(state.broker.timeout(), rx).await {
            Ok(Ok(decision)) => decision,
            Ok(Err(_closed)) => {
                // Sender dropped without a decision (expiry sweep/shutdown).
                info!(request_id, "approval channel closed without decision");
                return to_result(&deny_response("approval request was cancelled"));
            }
            Err(_elapsed) => {
                info!(request_id, "approval request timed out");
                state.broker.abandon(&request_id).await;
                let outcome = "\u{23f1}\u{fe0f} Approval request timed out";
                if let Err(err) = state
                    .gateway
                    .update_message(&channel, &message_ts, outcome)
                    .await
                {
                    warn!(%err, request_id, "failed to mark approval message as timed out");
                }
                return to_result(&deny_response("Approval request timed out"));
            }
        };

        info!(
            request_id,
            verdict = ?decision.verdict,
            decided_by = %decision.decided_by,
            "approval decided"
        );

        // The Slack handlers update the message for operator decisions; the
        // timeout branch above is the only update performed here.
        let payload = decision_payload(decision, original_input);
        to_result(&payload)
    }
    .instrument(span)
    .await
}
