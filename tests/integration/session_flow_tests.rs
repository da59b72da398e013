#![cfg(unix)]

use agent_relay::persistence::session_repo::SessionRepo;
use agent_relay::persistence::thread_repo::ThreadRepo;
use std::sync::Arc;

use super::test_helpers::{
    root_mention, script_full_turn, script_init_hello, script_init_and_wait, test_config,
    test_manager, thread_reply, wait_for, write_fake_agent,
};

#[tokio::test]
async fn first_mention_starts_a_session_and_adopts_the_definitive_id() {
    let dir = tempfile::tempdir().expect("tempdir");
    let agent = write_fake_agent(dir.path(), "agent.sh", &script_init_and_wait("S-abc"));
    let (manager, gateway, database) = test_manager(test_config(dir.path(), &agent, 3600)).await;

    manager
        .handle_thread_event(&root_mention("C1", "100.1", "hello"))
        .await
        .expect("mention handled");

    // Thread row exists.
    let thread = ThreadRepo::new(Arc::clone(&database))
        .get_by_keys("C1", "100.1")
        .await
        .expect("query")
        .expect("thread row");
    assert_eq!(thread.channel_id, "C1");

    // The placeholder row is renamed once init arrives, and the reported
    // model lands on the row.
    let repo = SessionRepo::new(Arc::clone(&database));
    let renamed = wait_for(
        || async {
            repo.get_by_session_id("S-abc")
                .await
                .ok()
                .flatten()
                .is_some_and(|s| s.model.as_deref() == Some("test-model"))
        },
        2000,
    )
    .await;
    assert!(renamed, "session should be renamed to S-abc with its model recorded");

    // A start-of-session message appears in the thread.
    let started = wait_for(
        || async { gateway.post_texts().iter().any(|t| t.contains("started")) },
        2000,
    )
    .await;
    assert!(started, "start-of-session post expected");
    assert!(gateway
        .post_texts()
        .iter()
        .any(|t| t.contains("test-model")));

    // The routing table resolves the definitive id and the empty fallback.
    assert!(manager.get_session_info("S-abc").await.is_some());
    let (sid, channel, thread_ts) = manager.get_session_info("").await.expect("last active");
    assert_eq!(sid, "S-abc");
    assert_eq!(channel, "C1");
    assert_eq!(thread_ts, "100.1");

    manager.shutdown().await;
}

#[tokio::test]
async fn assistant_text_is_forwarded_verbatim_exactly_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let agent = write_fake_agent(dir.path(), "agent.sh", &script_init_hello("S-hello"));
    let (manager, gateway, _database) = test_manager(test_config(dir.path(), &agent, 3600)).await;

    manager
        .handle_thread_event(&root_mention("C1", "100.1", "hi"))
        .await
        .expect("mention handled");

    let arrived = wait_for(
        || async { gateway.post_texts().iter().any(|t| t.contains("Hello!")) },
        2000,
    )
    .await;
    assert!(arrived, "assistant text should reach the thread");

    let hello_posts: Vec<String> = gateway
        .post_texts()
        .into_iter()
        .filter(|t| t.contains("Hello!"))
        .collect();
    assert_eq!(hello_posts.len(), 1);
    assert_eq!(hello_posts[0], "Hello!");

    let posts = gateway.posts.lock().expect("posts lock").clone();
    for post in &posts {
        assert_eq!(post.channel, "C1");
        assert_eq!(post.thread_ts, "100.1");
    }

    manager.shutdown().await;
}

#[tokio::test]
async fn full_turn_preserves_emission_order_and_finalizes_the_row() {
    let dir = tempfile::tempdir().expect("tempdir");
    let agent = write_fake_agent(dir.path(), "agent.sh", &script_full_turn("S-turn"));
    let (manager, gateway, database) = test_manager(test_config(dir.path(), &agent, 3600)).await;

    manager
        .handle_thread_event(&root_mention("C1", "100.1", "go"))
        .await
        .expect("mention handled");

    // The terminal result removes the session from the routing table.
    let done = wait_for(|| async { manager.session_count().await == 0 }, 3000).await;
    assert!(done, "session should leave the routing table after result");

    let texts = gateway.post_texts();
    let idx = |needle: &str| {
        texts
            .iter()
            .position(|t| t.contains(needle))
            .unwrap_or_else(|| panic!("missing post containing {needle:?}: {texts:?}"))
    };

    // Prefix-preserving transform of the child's emission order.
    let started = idx("started");
    let one = idx("one");
    let tool = idx("ls -la");
    let two = idx("two");
    let summary = idx("Done");
    assert!(started < one && one < tool && tool < two && two < summary);

    // Tool-use post carries the shell tool's display identity.
    let posts = gateway.posts.lock().expect("posts lock").clone();
    let tool_post = &posts[tool];
    let attribution = tool_post.attribution.as_ref().expect("tool attribution");
    assert_eq!(attribution.username, "Bash");
    assert_eq!(attribution.icon_emoji, ":computer:");
    assert!(tool_post.text.contains("```"));

    // The store row is completed with the reported usage.
    let row = SessionRepo::new(Arc::clone(&database))
        .get_by_session_id("S-turn")
        .await
        .expect("query")
        .expect("row");
    assert_eq!(
        row.status,
        agent_relay::models::session::SessionStatus::Completed
    );
    assert!(row.ended_at.is_some());
    assert_eq!(row.usage.num_turns, 2);
    assert_eq!(row.usage.input_tokens, 10);
}

#[tokio::test]
async fn replies_forward_to_the_live_session_without_spawning_another() {
    let dir = tempfile::tempdir().expect("tempdir");
    let agent = write_fake_agent(dir.path(), "agent.sh", &script_init_and_wait("S-live"));
    let (manager, _gateway, database) = test_manager(test_config(dir.path(), &agent, 3600)).await;

    manager
        .handle_thread_event(&root_mention("C1", "100.1", "hello"))
        .await
        .expect("mention handled");
    assert_eq!(manager.session_count().await, 1);

    manager
        .handle_thread_event(&thread_reply("C1", "100.1", "100.2", "and another thing"))
        .await
        .expect("reply handled");

    assert_eq!(manager.session_count().await, 1);

    let thread = ThreadRepo::new(Arc::clone(&database))
        .get_by_keys("C1", "100.1")
        .await
        .expect("query")
        .expect("thread");
    let sessions = SessionRepo::new(Arc::clone(&database))
        .list_for_thread(thread.id)
        .await
        .expect("list");
    assert_eq!(sessions.len(), 1, "no second session row for a reply");

    manager.shutdown().await;
}

#[tokio::test]
async fn stray_reply_in_unowned_thread_is_ignored() {
    let dir = tempfile::tempdir().expect("tempdir");
    let agent = write_fake_agent(dir.path(), "agent.sh", &script_init_and_wait("S-x"));
    let (manager, gateway, database) = test_manager(test_config(dir.path(), &agent, 3600)).await;

    manager
        .handle_thread_event(&thread_reply("C1", "555.5", "555.6", "who are you"))
        .await
        .expect("reply handled");

    assert_eq!(manager.session_count().await, 0);
    assert_eq!(gateway.post_count(), 0);
    assert!(ThreadRepo::new(Arc::clone(&database))
        .get_by_keys("C1", "555.5")
        .await
        .expect("query")
        .is_none());
}
