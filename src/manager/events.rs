//! Translation of adapter events into thread posts.
//!
//! One consumer task per session drains the adapter's event channel in
//! order, so posts into a thread are a prefix-preserving transform of the
//! child's emission order.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::agent::protocol::{AgentMessage, ContentBlock, InitMessage, ResultMessage};
use crate::agent::AgentEvent;
use crate::models::session::{SessionStatus, SessionUsage};
use crate::persistence::session_repo::SessionRepo;
use crate::slack::gateway::Attribution;

use super::{tool_display, SessionHandle, SessionManager};

/// Drain one session's adapter events until the channel closes or the
/// session reaches a terminal state.
pub async fn run_consumer(
    manager: Arc<SessionManager>,
    handle: Arc<SessionHandle>,
    mut rx: mpsc::Receiver<AgentEvent>,
) {
    while let Some(event) = rx.recv().await {
        match event {
            AgentEvent::Message(message) => {
                on_message(&manager, &handle, message).await;
            }
            AgentEvent::Exited { code } => {
                on_exited(&manager, &handle, code).await;
                break;
            }
            AgentEvent::IoError { message } => {
                manager
                    .fail_session(&handle, &format!("agent stream error: {message}"))
                    .await;
                break;
            }
        }
    }
    debug!("session event consumer exiting");
}

async fn on_message(
    manager: &Arc<SessionManager>,
    handle: &Arc<SessionHandle>,
    message: AgentMessage,
) {
    handle.touch();
    let sid = handle.current_id().await;
    manager.mark_last_active(&sid).await;

    match message {
        AgentMessage::Init(init) => on_init(manager, handle, init).await,
        AgentMessage::Assistant { content } => on_assistant(manager, handle, content).await,
        AgentMessage::ToolResultEcho => {
            // Tool-result echoes are elided from the thread.
            debug!("eliding tool-result echo");
        }
        AgentMessage::Result(result) => on_result(manager, handle, result).await,
    }
}

async fn on_init(manager: &Arc<SessionManager>, handle: &Arc<SessionHandle>, init: InitMessage) {
    if let Err(err) = manager.rename_session(handle, &init.session_id).await {
        // The routing entry still works under the placeholder; a failed
        // rename costs resume, not the live session.
        error!(%err, new_id = %init.session_id, "failed to adopt definitive session id");
    }

    if let Some(ref model) = init.model {
        let sid = handle.current_id().await;
        if let Err(err) = SessionRepo::new(Arc::clone(&manager.db))
            .set_model(&sid, model)
            .await
        {
            error!(%err, session_id = %sid, "failed to record session model");
        }
    }

    let model = init.model.as_deref().unwrap_or("unknown");
    let cwd = init
        .cwd
        .unwrap_or_else(|| handle.workdir.to_string_lossy().into_owned());
    let short_id: String = init.session_id.chars().take(8).collect();
    let text = format!(
        "\u{1f680} Session `{short_id}` started \u{2014} model `{model}`, workdir `{cwd}`"
    );
    post(manager, handle, &text, None).await;
}

async fn on_assistant(
    manager: &Arc<SessionManager>,
    handle: &Arc<SessionHandle>,
    content: Vec<ContentBlock>,
) {
    let mut pending_text: Vec<String> = Vec::new();

    for block in content {
        match block {
            ContentBlock::Text { text } => pending_text.push(text),
            ContentBlock::Thinking { thinking } => {
                if thinking.trim().is_empty() {
                    continue;
                }
                let styled = format!("_{}_", thinking.trim());
                post(
                    manager,
                    handle,
                    &styled,
                    Some(tool_display::display_for("Thinking")),
                )
                .await;
            }
            ContentBlock::ToolUse { id, name, input } => {
                debug!(tool_use_id = %id, tool = %name, "rendering tool invocation");
                let body = tool_display::format_tool_use(&name, &input);
                post(manager, handle, &body, Some(tool_display::display_for(&name))).await;
            }
            ContentBlock::Other => {}
        }
    }

    if !pending_text.is_empty() {
        let combined = pending_text.join("\n\n");
        post(manager, handle, &combined, None).await;
    }
}

async fn on_result(
    manager: &Arc<SessionManager>,
    handle: &Arc<SessionHandle>,
    result: ResultMessage,
) {
    handle.mark_result();

    let summary = format_result_summary(&result);
    post(manager, handle, &summary, None).await;

    // An errored result is still a definitive result: the turn completed
    // and the session stays resumable. `Failed` is reserved for process
    // and write failures.
    let status = SessionStatus::Completed;
    let usage = SessionUsage {
        cost_usd: result.total_cost_usd,
        input_tokens: result.usage.input_tokens,
        output_tokens: result.usage.output_tokens,
        num_turns: result.num_turns,
        duration_ms: result.duration_ms,
    };

    let sid = handle.current_id().await;
    if let Err(err) = SessionRepo::new(Arc::clone(&manager.db))
        .complete(&sid, status, Utc::now(), usage, None)
        .await
    {
        error!(%err, session_id = %sid, "failed to finalize session row");
    }

    // The session row stays for resume-window lookups; the live process and
    // its routing entries are done.
    handle.adapter().close().await;
    manager.remove_session(&sid).await;
}

async fn on_exited(manager: &Arc<SessionManager>, handle: &Arc<SessionHandle>, code: Option<i32>) {
    if handle.saw_result() {
        // A non-zero exit after the terminal result is not fatal.
        debug!(?code, "agent exited after terminal result");
        return;
    }

    let reason = match code {
        Some(c) => format!("agent process exited unexpectedly (code {c})"),
        None => "agent process was terminated by a signal".to_owned(),
    };
    manager.fail_session(handle, &reason).await;
}

/// Render the completion summary posted when a terminal `result` arrives.
#[must_use]
pub fn format_result_summary(result: &ResultMessage) -> String {
    #[allow(clippy::cast_precision_loss)]
    let seconds = result.duration_ms as f64 / 1000.0;
    let stats = format!(
        "{seconds:.1}s \u{2022} {} turn(s) \u{2022} ${:.4} \u{2022} {} in / {} out tokens",
        result.num_turns,
        result.total_cost_usd,
        result.usage.input_tokens,
        result.usage.output_tokens,
    );

    if result.is_error {
        let detail = result
            .result
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or("agent reported an error");
        format!("\u{274c} {detail}\n{stats}")
    } else {
        format!("\u{2705} Done \u{2014} {stats}")
    }
}

async fn post(
    manager: &Arc<SessionManager>,
    handle: &Arc<SessionHandle>,
    text: &str,
    attribution: Option<Attribution>,
) {
    if let Err(err) = manager
        .gateway()
        .post_to_thread(&handle.channel, &handle.thread_ts, text, attribution)
        .await
    {
        // Chat post failures are logged, never session-fatal.
        warn!(%err, "failed to post to thread");
    }
}
