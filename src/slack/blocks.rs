//! Slack Block Kit message builders.
//!
//! Helpers for approval messages with action buttons, outcome lines, and
//! the deny-reason modal.

use slack_morphism::prelude::{
    SlackActionBlockElement, SlackActionId, SlackActionsBlock, SlackBlock,
    SlackBlockButtonElement, SlackBlockId, SlackBlockPlainTextInputElement,
    SlackBlockPlainTextOnly, SlackBlockText, SlackCallbackId, SlackInputBlock,
    SlackInputBlockElement, SlackModalView, SlackSectionBlock, SlackView,
};

use crate::slack::gateway::ApprovalRequestView;

/// Build a plain markdown section block.
#[must_use]
pub fn text_section(text: &str) -> SlackBlock {
    SlackBlock::Section(SlackSectionBlock::new().with_text(SlackBlockText::MarkDown(text.into())))
}

/// Build an actions block with the given `(action_id, label, value)` buttons.
#[must_use]
pub fn action_buttons(block_id: &str, buttons: &[(&str, &str, &str)]) -> SlackBlock {
    let elements: Vec<SlackActionBlockElement> = buttons
        .iter()
        .map(|(action_id, text, value)| {
            SlackActionBlockElement::Button(
                SlackBlockButtonElement::new(
                    (*action_id).into(),
                    SlackBlockPlainTextOnly::from(*text),
                )
                .with_value((*value).into()),
            )
        })
        .collect();
    SlackBlock::Actions(
        SlackActionsBlock::new(elements).with_block_id(SlackBlockId(block_id.into())),
    )
}

/// Build approval action buttons (Approve / Deny / Deny with Reason).
#[must_use]
pub fn approval_buttons(request_id: &str) -> SlackBlock {
    action_buttons(
        &format!("approval_{request_id}"),
        &[
            ("approve_allow", "Approve", request_id),
            ("approve_deny", "Deny", request_id),
            ("approve_deny_reason", "Deny with Reason", request_id),
        ],
    )
}

/// Build the full block list for an approval request message.
#[must_use]
pub fn approval_blocks(request: &ApprovalRequestView) -> Vec<SlackBlock> {
    let mut result = Vec::new();

    result.push(text_section(&format!(
        "\u{1f510} *Approval required:* `{}`",
        request.tool_name
    )));

    if !request.fields.is_empty() {
        let body = request
            .fields
            .iter()
            .map(|(label, value)| format!("*{label}*\n{value}"))
            .collect::<Vec<_>>()
            .join("\n");
        result.push(text_section(&body));
    }

    result.push(approval_buttons(&request.request_id));
    result
}

/// Outcome line replacing the buttons once an approval is decided.
#[must_use]
pub fn approval_outcome_text(approved: bool, user_id: &str, reason: Option<&str>) -> String {
    if approved {
        format!("\u{2705} *Approved* by <@{user_id}>")
    } else {
        match reason {
            Some(r) if !r.is_empty() => {
                format!("\u{274c} *Denied* by <@{user_id}>: {r}")
            }
            _ => format!("\u{274c} *Denied* by <@{user_id}>"),
        }
    }
}

/// Build the deny-reason modal view.
///
/// The modal contains a single multiline plain-text input. The
/// `callback_id` encodes `deny_reason:{request_id}` so the `ViewSubmission`
/// handler can resolve the right pending approval.
#[must_use]
pub fn deny_reason_modal(request_id: &str) -> SlackView {
    let input_element =
        SlackBlockPlainTextInputElement::new(SlackActionId("deny_reason_text".to_owned()))
            .with_multiline(true)
            .with_placeholder(SlackBlockPlainTextOnly::from("Why is this denied?"));

    let input_block = SlackInputBlock::new(
        SlackBlockPlainTextOnly::from("Reason"),
        SlackInputBlockElement::PlainTextInput(input_element),
    )
    .with_block_id(SlackBlockId("deny_reason_block".to_owned()));

    SlackView::Modal(
        SlackModalView::new(
            SlackBlockPlainTextOnly::from("Deny with reason"),
            vec![input_block.into()],
        )
        .with_callback_id(SlackCallbackId(format!("deny_reason:{request_id}")))
        .with_submit(SlackBlockPlainTextOnly::from("Deny")),
    )
}
