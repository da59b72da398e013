use std::path::Path;
use std::time::Duration;

use agent_relay::models::approval::Verdict;
use agent_relay::slack::gateway::InteractiveEvent;
use agent_relay::slack::gateway::ModalSubmitEvent;
use agent_relay::slack::handlers;

use super::test_helpers::{test_app_state, test_config, test_manager};

fn button(action_id: &str, request_id: &str) -> InteractiveEvent {
    InteractiveEvent {
        channel: "C1".into(),
        message_ts: "9999.0000".into(),
        trigger_id: "trig_1".into(),
        user: "U1".into(),
        action_id: action_id.into(),
        value: request_id.into(),
    }
}

async fn state_with_broker() -> (
    std::sync::Arc<agent_relay::mcp::server::AppState>,
    std::sync::Arc<super::test_helpers::RecordingGateway>,
) {
    let dir = std::env::temp_dir();
    let (manager, gateway, database) = test_manager(test_config(&dir, Path::new("true"), 3600)).await;
    let state = test_app_state(&manager, &gateway, &database, Duration::from_secs(300));
    (state, gateway)
}

#[tokio::test]
async fn approve_button_resolves_allow_and_replaces_buttons() {
    let (state, gateway) = state_with_broker().await;

    let (request_id, rx) = state.broker.begin("S-abc").await.expect("begin");
    state
        .broker
        .attach_message(&request_id, "C1", "9999.0000")
        .await;

    handlers::approval::handle_approval_action(&button("approve_allow", &request_id), &state)
        .await
        .expect("handled");

    let decision = rx.await.expect("decision");
    assert_eq!(decision.verdict, Verdict::Allow);
    assert_eq!(decision.decided_by, "U1");
    assert!(decision.updated_input.is_none());

    let updates = gateway.updates.lock().expect("updates lock").clone();
    assert_eq!(updates.len(), 1);
    assert!(updates[0].text.contains("Approved"));
    assert!(updates[0].text.contains("<@U1>"));
    assert_eq!(updates[0].ts, "9999.0000");
}

#[tokio::test]
async fn deny_button_resolves_deny() {
    let (state, gateway) = state_with_broker().await;

    let (request_id, rx) = state.broker.begin("S-abc").await.expect("begin");

    handlers::approval::handle_approval_action(&button("approve_deny", &request_id), &state)
        .await
        .expect("handled");

    let decision = rx.await.expect("decision");
    assert_eq!(decision.verdict, Verdict::Deny);

    let updates = gateway.updates.lock().expect("updates lock").clone();
    assert!(updates[0].text.contains("Denied"));
}

#[tokio::test]
async fn deny_with_reason_opens_the_modal_and_keeps_the_approval_pending() {
    let (state, gateway) = state_with_broker().await;

    let (request_id, rx) = state.broker.begin("S-abc").await.expect("begin");

    handlers::approval::handle_approval_action(
        &button("approve_deny_reason", &request_id),
        &state,
    )
    .await
    .expect("handled");

    let modals = gateway.modals.lock().expect("modals lock").clone();
    assert_eq!(modals.len(), 1);
    assert_eq!(modals[0].1, request_id);

    // Still pending: the modal has not been submitted yet.
    assert_eq!(state.broker.pending_count().await, 1);
    drop(rx);
}

#[tokio::test]
async fn modal_submission_denies_with_the_typed_reason() {
    let (state, gateway) = state_with_broker().await;

    let (request_id, rx) = state.broker.begin("S-abc").await.expect("begin");
    state
        .broker
        .attach_message(&request_id, "C1", "9999.0000")
        .await;

    let submit = ModalSubmitEvent {
        user: "U2".into(),
        callback_id: format!("deny_reason:{request_id}"),
        value: "not on production".into(),
    };
    handlers::modal::handle_view_submission(&submit, &state)
        .await
        .expect("handled");

    let decision = rx.await.expect("decision");
    assert_eq!(decision.verdict, Verdict::Deny);
    assert_eq!(decision.reason.as_deref(), Some("not on production"));
    assert_eq!(decision.decided_by, "U2");

    let updates = gateway.updates.lock().expect("updates lock").clone();
    assert_eq!(updates.len(), 1);
    assert!(updates[0].text.contains("not on production"));
}

#[tokio::test]
async fn malformed_modal_callback_is_rejected() {
    let (state, _gateway) = state_with_broker().await;

    let submit = ModalSubmitEvent {
        user: "U1".into(),
        callback_id: "garbage".into(),
        value: "x".into(),
    };
    assert!(handlers::modal::handle_view_submission(&submit, &state)
        .await
        .is_err());
}

#[tokio::test]
async fn late_click_on_a_resolved_approval_updates_the_message_only() {
    let (state, gateway) = state_with_broker().await;

    let (request_id, rx) = state.broker.begin("S-abc").await.expect("begin");
    handlers::approval::handle_approval_action(&button("approve_allow", &request_id), &state)
        .await
        .expect("first click");
    rx.await.expect("decision");

    // Second click: the pending entry is gone; the handler answers with a
    // stale-approval notice and does not panic or block.
    handlers::approval::handle_approval_action(&button("approve_deny", &request_id), &state)
        .await
        .expect("late click handled");

    let updates = gateway.updates.lock().expect("updates lock").clone();
    assert_eq!(updates.len(), 2);
    assert!(updates[1].text.contains("no longer pending"));
}

#[tokio::test]
async fn unknown_action_id_is_an_error_string() {
    let (state, _gateway) = state_with_broker().await;
    let (request_id, _rx) = state.broker.begin("S-abc").await.expect("begin");

    let result =
        handlers::approval::handle_approval_action(&button("approve_frobnicate", &request_id), &state)
            .await;
    assert!(result.is_err());
}
