#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use agent_relay::models::session::SessionStatus;
use agent_relay::persistence::session_repo::SessionRepo;

use super::test_helpers::{
    root_mention, script_init_and_wait, test_config, test_manager, wait_for, write_fake_agent,
};

#[tokio::test]
async fn idle_session_is_reaped_with_a_notice_and_a_timeout_row() {
    let dir = tempfile::tempdir().expect("tempdir");
    let agent = write_fake_agent(dir.path(), "agent.sh", &script_init_and_wait("S-idle"));
    let (manager, gateway, database) = test_manager(test_config(dir.path(), &agent, 3600)).await;

    manager
        .handle_thread_event(&root_mention("C1", "100.1", "hello"))
        .await
        .expect("mention handled");

    let repo = SessionRepo::new(Arc::clone(&database));
    let renamed = wait_for(
        || async {
            repo.get_by_session_id("S-idle")
                .await
                .ok()
                .flatten()
                .is_some()
        },
        2000,
    )
    .await;
    assert!(renamed);

    // Everything is "idle" against a zero threshold.
    let reaped = manager.cleanup_idle(Duration::ZERO).await;
    assert_eq!(reaped, 1);
    assert_eq!(manager.session_count().await, 0);

    // The thread got a timeout notice.
    assert!(gateway
        .post_texts()
        .iter()
        .any(|t| t.contains("timed out")));

    // The row is finalized as timeout with ended_at set.
    let row = repo
        .get_by_session_id("S-idle")
        .await
        .expect("query")
        .expect("row");
    assert_eq!(row.status, SessionStatus::Timeout);
    assert!(row.ended_at.is_some());

    // The last-active fallback no longer resolves.
    assert!(manager.get_session_info("").await.is_none());
}

#[tokio::test]
async fn active_session_survives_a_generous_idle_threshold() {
    let dir = tempfile::tempdir().expect("tempdir");
    let agent = write_fake_agent(dir.path(), "agent.sh", &script_init_and_wait("S-busy"));
    let (manager, _gateway, _database) = test_manager(test_config(dir.path(), &agent, 3600)).await;

    manager
        .handle_thread_event(&root_mention("C1", "100.1", "hello"))
        .await
        .expect("mention handled");

    let reaped = manager.cleanup_idle(Duration::from_secs(3600)).await;
    assert_eq!(reaped, 0);
    assert_eq!(manager.session_count().await, 1);

    manager.shutdown().await;
}
