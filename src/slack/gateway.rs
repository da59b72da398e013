//! Chat gateway contract.
//!
//! The session manager and the approval broker talk to the chat platform
//! only through [`ChatGateway`]; the Slack implementation lives in
//! [`client`](crate::slack::client). Tests substitute a recording double.
//!
//! Inbound traffic is normalized into [`ThreadEvent`], [`InteractiveEvent`],
//! and [`ModalSubmitEvent`] by the transport layer (Socket Mode here), which
//! also owns authenticity verification.

use std::future::Future;
use std::pin::Pin;

use crate::Result;

/// Display identity attached to a post (pseudo-username and icon).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribution {
    /// Username shown in place of the bot's.
    pub username: String,
    /// Icon emoji, colon-delimited (e.g. `:computer:`).
    pub icon_emoji: String,
}

/// Approval request as rendered to the operator.
#[derive(Debug, Clone)]
pub struct ApprovalRequestView {
    /// Broker request identifier, round-tripped through button values.
    pub request_id: String,
    /// Tool the agent wants to invoke.
    pub tool_name: String,
    /// Salient input fields, already formatted for display.
    pub fields: Vec<(String, String)>,
}

/// A normalized message event inside (or starting) a thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadEvent {
    /// Slack channel ID.
    pub channel: String,
    /// Root timestamp of the thread; for a root message this equals `ts`.
    pub thread_ts: String,
    /// Timestamp of this message.
    pub ts: String,
    /// Posting user.
    pub user: String,
    /// Message text with the bot mention stripped.
    pub text: String,
    /// Whether this event is a root-channel mention of the bot.
    pub is_root_mention: bool,
}

/// A normalized interactive (button) event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InteractiveEvent {
    /// Channel of the interactive message.
    pub channel: String,
    /// Timestamp of the interactive message.
    pub message_ts: String,
    /// Trigger id for opening modals, valid for a few seconds.
    pub trigger_id: String,
    /// Acting user.
    pub user: String,
    /// Action identifier of the pressed button.
    pub action_id: String,
    /// Button value (the broker request id).
    pub value: String,
}

/// A normalized modal submission event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModalSubmitEvent {
    /// Submitting user.
    pub user: String,
    /// Modal callback id, `<source>:<entity-id>`.
    pub callback_id: String,
    /// Free-text input typed into the modal.
    pub value: String,
}

/// Outbound chat operations the core depends on.
///
/// Implementations are expected to handle their platform's rate limits
/// internally; callers treat a returned error as a logged, non-fatal event
/// unless stated otherwise.
pub trait ChatGateway: Send + Sync {
    /// Post a message into a thread, returning the new message's timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Slack`](crate::AppError::Slack) if the post fails after retries.
    fn post_to_thread(
        &self,
        channel: &str,
        thread_ts: &str,
        text: &str,
        attribution: Option<Attribution>,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>>;

    /// Replace the text and blocks of an existing message.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Slack`](crate::AppError::Slack) if the update fails.
    fn update_message(
        &self,
        channel: &str,
        ts: &str,
        text: &str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Render an approval message with Approve / Deny / Deny-with-Reason
    /// buttons, returning its timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Slack`](crate::AppError::Slack) if the post fails; the broker
    /// resolves the pending approval as deny in that case.
    fn render_approval(
        &self,
        channel: &str,
        thread_ts: &str,
        request: &ApprovalRequestView,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>>;

    /// Open the free-text deny-reason modal for a pending approval.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Slack`](crate::AppError::Slack) if the modal cannot be opened.
    fn open_deny_reason_modal(
        &self,
        trigger_id: &str,
        request_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}
