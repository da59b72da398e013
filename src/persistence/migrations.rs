//! Versioned schema migrations.
//!
//! Migration files live under `migrations/` and are named
//! `<version>_<label>.up.sql`. They are embedded at compile time and applied
//! in lexicographic order; each file runs in its own transaction which also
//! records the version in `schema_migrations`, so re-running the whole
//! sequence is a no-op.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::Result;

/// Embedded migration files, ordered lexicographically by version.
const MIGRATIONS: &[(&str, &str)] = &[
    (
        "0001_create_threads",
        include_str!("../../migrations/0001_create_threads.up.sql"),
    ),
    (
        "0002_create_sessions",
        include_str!("../../migrations/0002_create_sessions.up.sql"),
    ),
    (
        "0003_create_worktrees",
        include_str!("../../migrations/0003_create_worktrees.up.sql"),
    ),
    (
        "0004_create_repositories",
        include_str!("../../migrations/0004_create_repositories.up.sql"),
    ),
];

/// Apply every pending migration to the connected database.
///
/// # Errors
///
/// Returns `AppError::Db` if a DDL statement or bookkeeping insert fails.
/// A failed migration rolls its transaction back and leaves the recorded
/// version set untouched.
pub async fn apply_all(pool: &SqlitePool) -> Result<()> {
    sqlx::raw_sql(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
             version    TEXT PRIMARY KEY NOT NULL,
             applied_at TEXT NOT NULL
         )",
    )
    .execute(pool)
    .await?;

    let mut applied = 0usize;
    for (version, sql) in MIGRATIONS {
        let already: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM schema_migrations WHERE version = ?1")
                .bind(version)
                .fetch_one(pool)
                .await?;
        if already > 0 {
            debug!(version, "migration already applied");
            continue;
        }

        let mut tx = pool.begin().await?;
        sqlx::raw_sql(sql).execute(&mut *tx).await?;
        sqlx::query("INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)")
            .bind(version)
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(version, "migration applied");
        applied += 1;
    }

    if applied > 0 {
        info!(applied, "schema migrations complete");
    }
    Ok(())
}

/// Versions recorded as applied, in application order.
///
/// # Errors
///
/// Returns `AppError::Db` if the query fails.
pub async fn applied_versions(pool: &SqlitePool) -> Result<Vec<String>> {
    let versions: Vec<String> =
        sqlx::query_scalar("SELECT version FROM schema_migrations ORDER BY version")
            .fetch_all(pool)
            .await?;
    Ok(versions)
}
