use agent_relay::persistence::{db, migrations};

#[tokio::test]
async fn migrations_create_all_tables() {
    let pool = db::connect_memory().await.expect("connect");

    for table in ["threads", "sessions", "worktrees", "repositories"] {
        let query = format!("SELECT COUNT(*) FROM {table}");
        let count: i64 = sqlx::query_scalar(&query)
            .fetch_one(&pool)
            .await
            .unwrap_or_else(|e| panic!("table '{table}' should be queryable: {e}"));
        assert_eq!(count, 0, "table '{table}' should start empty");
    }
}

#[tokio::test]
async fn migration_versions_are_recorded_in_order() {
    let pool = db::connect_memory().await.expect("connect");

    let versions = migrations::applied_versions(&pool).await.expect("versions");
    assert_eq!(
        versions,
        vec![
            "0001_create_threads",
            "0002_create_sessions",
            "0003_create_worktrees",
            "0004_create_repositories",
        ]
    );
}

#[tokio::test]
async fn applying_migrations_twice_is_a_noop() {
    let pool = db::connect_memory().await.expect("connect");

    migrations::apply_all(&pool).await.expect("second run");
    migrations::apply_all(&pool).await.expect("third run");

    let versions = migrations::applied_versions(&pool).await.expect("versions");
    assert_eq!(versions.len(), 4);

    let recorded: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_migrations")
        .fetch_one(&pool)
        .await
        .expect("count");
    assert_eq!(recorded, 4);
}
