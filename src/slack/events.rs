//! Slack event normalization and dispatch.
//!
//! Socket Mode delivers push events (mentions, thread replies) and
//! interactive payloads (buttons, modal submissions). Both are normalized
//! into the gateway's event types and dispatched against the shared
//! [`AppState`]: thread events to the Session Manager, interactions to the
//! approval handlers.

use std::sync::Arc;

use slack_morphism::prelude::{
    SlackClient, SlackClientEventsUserState, SlackClientHyperHttpsConnector, SlackEventCallbackBody,
    SlackInteractionEvent, SlackPushEventCallback,
};
use tracing::{debug, info, warn};

use crate::mcp::server::AppState;
use crate::slack::gateway::{InteractiveEvent, ModalSubmitEvent, ThreadEvent};
use crate::slack::handlers;

/// Strip a leading `<@U…>` bot mention from message text.
#[must_use]
pub fn strip_mention(text: &str) -> String {
    let trimmed = text.trim_start();
    if let Some(rest) = trimmed.strip_prefix("<@") {
        if let Some(end) = rest.find('>') {
            return rest[end + 1..].trim_start().to_owned();
        }
    }
    trimmed.to_owned()
}

async fn app_state(state: &SlackClientEventsUserState) -> Option<Arc<AppState>> {
    let guard = state.read().await;
    guard.get_user_state::<Arc<AppState>>().cloned()
}

/// Handle push events (mentions and thread replies) from Socket Mode.
///
/// # Errors
///
/// Never returns an error to the listener; processing failures are logged.
pub async fn handle_push_event(
    event: SlackPushEventCallback,
    _client: Arc<SlackClient<SlackClientHyperHttpsConnector>>,
    state: SlackClientEventsUserState,
) -> slack_morphism::UserCallbackResult<()> {
    let Some(app) = app_state(&state).await else {
        warn!("app state not available; cannot process push event");
        return Ok(());
    };

    match event.event {
        SlackEventCallbackBody::AppMention(mention) => {
            let ts = mention.origin.ts.to_string();
            let thread_ts = mention
                .origin
                .thread_ts
                .as_ref()
                .map_or_else(|| ts.clone(), ToString::to_string);

            let thread_event = ThreadEvent {
                channel: mention.channel.to_string(),
                thread_ts,
                ts,
                user: mention.user.to_string(),
                text: strip_mention(mention.content.text.as_deref().unwrap_or_default()),
                is_root_mention: true,
            };

            info!(
                channel = %thread_event.channel,
                thread_ts = %thread_event.thread_ts,
                "app mention received"
            );
            if let Err(err) = app.manager.handle_thread_event(&thread_event).await {
                warn!(%err, "mention handling failed");
            }
        }
        SlackEventCallbackBody::Message(message) => {
            // Only plain user replies inside threads are forwarded. Bot
            // posts, edits, and hidden messages are dropped; mentions arrive
            // separately as AppMention events.
            if message.sender.bot_id.is_some()
                || message.subtype.is_some()
                || message.hidden.unwrap_or(false)
            {
                return Ok(());
            }
            let Some(thread_ts) = message.origin.thread_ts.as_ref() else {
                return Ok(());
            };
            let Some(user) = message.sender.user.as_ref() else {
                return Ok(());
            };
            let Some(channel) = message.origin.channel.as_ref() else {
                return Ok(());
            };

            let text = message
                .content
                .as_ref()
                .and_then(|c| c.text.clone())
                .unwrap_or_default();
            if text.is_empty() {
                return Ok(());
            }

            let bot_user_id = &app.config.slack.bot_user_id;
            if !bot_user_id.is_empty() && text.contains(&format!("<@{bot_user_id}>")) {
                // Handled via the AppMention event for the same message.
                return Ok(());
            }

            let thread_event = ThreadEvent {
                channel: channel.to_string(),
                thread_ts: thread_ts.to_string(),
                ts: message.origin.ts.to_string(),
                user: user.to_string(),
                text,
                is_root_mention: false,
            };

            if let Err(err) = app.manager.handle_thread_event(&thread_event).await {
                warn!(%err, "thread reply handling failed");
            }
        }
        other => {
            debug!(?other, "ignoring push event");
        }
    }

    Ok(())
}

/// Handle interactive payloads (buttons, modals) from Socket Mode.
///
/// # Errors
///
/// Never returns an error to the listener; processing failures are logged.
pub async fn handle_interaction(
    event: SlackInteractionEvent,
    _client: Arc<SlackClient<SlackClientHyperHttpsConnector>>,
    state: SlackClientEventsUserState,
) -> slack_morphism::UserCallbackResult<()> {
    let Some(app) = app_state(&state).await else {
        warn!("app state not available; cannot process interaction");
        return Ok(());
    };

    match &event {
        SlackInteractionEvent::BlockActions(block_event) => {
            let user_id = block_event
                .user
                .as_ref()
                .map(|u| u.id.to_string())
                .unwrap_or_default();
            if user_id.is_empty() {
                warn!("block action with empty user ID; ignoring");
                return Ok(());
            }

            let channel = block_event
                .channel
                .as_ref()
                .map(|c| c.id.to_string())
                .unwrap_or_default();
            let message_ts = block_event
                .message
                .as_ref()
                .map(|m| m.origin.ts.to_string())
                .unwrap_or_default();
            let trigger_id = block_event.trigger_id.to_string();

            let Some(actions) = &block_event.actions else {
                return Ok(());
            };

            for action in actions {
                let action_id = action.action_id.to_string();
                let value = action.value.clone().unwrap_or_default();
                info!(action_id, user_id, "dispatching block action");

                let interactive = InteractiveEvent {
                    channel: channel.clone(),
                    message_ts: message_ts.clone(),
                    trigger_id: trigger_id.clone(),
                    user: user_id.clone(),
                    action_id: action_id.clone(),
                    value,
                };

                if action_id.starts_with("approve_") {
                    if let Err(err) =
                        handlers::approval::handle_approval_action(&interactive, &app).await
                    {
                        warn!(err, action_id, "approval action failed");
                    }
                } else {
                    warn!(action_id, "unknown action_id prefix; ignoring");
                }
            }
        }
        SlackInteractionEvent::ViewSubmission(view_event) => {
            let user_id = view_event.user.id.to_string();

            let callback_id = match &view_event.view.view {
                slack_morphism::prelude::SlackView::Modal(modal) => modal
                    .callback_id
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default(),
                slack_morphism::prelude::SlackView::Home(_) => String::new(),
            };

            let value = handlers::modal::extract_deny_reason(view_event);

            let submit = ModalSubmitEvent {
                user: user_id,
                callback_id,
                value,
            };

            if let Err(err) = handlers::modal::handle_view_submission(&submit, &app).await {
                warn!(err, "view submission handler failed");
            }
        }
        SlackInteractionEvent::ViewClosed(view_event) => {
            debug!(user = %view_event.user.id, "modal dismissed without submission");
        }
        _ => {
            debug!(?event, "unhandled interaction event type");
        }
    }

    Ok(())
}
