//! Worktree repository for `SQLite` persistence.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::models::worktree::{Worktree, WorktreeStatus};
use crate::{AppError, Result};

use super::db::Database;

/// Repository wrapper around `SQLite` for worktree records.
#[derive(Clone)]
pub struct WorktreeRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct WorktreeRow {
    id: i64,
    thread_id: i64,
    repo_path: String,
    path: String,
    base_branch: String,
    branch: String,
    status: String,
    created_at: String,
    updated_at: String,
}

impl WorktreeRow {
    fn into_worktree(self) -> Result<Worktree> {
        let status = match self.status.as_str() {
            "active" => WorktreeStatus::Active,
            "deleted" => WorktreeStatus::Deleted,
            other => return Err(AppError::Db(format!("invalid worktree status: {other}"))),
        };
        let created_at = chrono::DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| AppError::Db(format!("invalid created_at: {e}")))?
            .with_timezone(&Utc);
        let updated_at = chrono::DateTime::parse_from_rfc3339(&self.updated_at)
            .map_err(|e| AppError::Db(format!("invalid updated_at: {e}")))?
            .with_timezone(&Utc);

        Ok(Worktree {
            id: self.id,
            thread_id: self.thread_id,
            repo_path: self.repo_path,
            path: self.path,
            base_branch: self.base_branch,
            branch: self.branch,
            status,
            created_at,
            updated_at,
        })
    }
}

impl WorktreeRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert an active worktree record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails, including when `path` is
    /// already recorded or the thread already has an active worktree.
    pub async fn create(
        &self,
        thread_id: i64,
        repo_path: &str,
        path: &str,
        base_branch: &str,
        branch: &str,
    ) -> Result<Worktree> {
        if self.active_for_thread(thread_id).await?.is_some() {
            return Err(AppError::Db(format!(
                "thread {thread_id} already has an active worktree"
            )));
        }

        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO worktrees (thread_id, repo_path, path, base_branch, branch, status,
             created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'active', ?6, ?6)",
        )
        .bind(thread_id)
        .bind(repo_path)
        .bind(path)
        .bind(base_branch)
        .bind(branch)
        .bind(&now)
        .execute(self.db.as_ref())
        .await?;

        let row: Option<WorktreeRow> = sqlx::query_as("SELECT * FROM worktrees WHERE path = ?1")
            .bind(path)
            .fetch_optional(self.db.as_ref())
            .await?;
        row.map(WorktreeRow::into_worktree)
            .transpose()?
            .ok_or_else(|| AppError::Db("worktree row missing after insert".into()))
    }

    /// The active worktree for a thread, if one exists.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn active_for_thread(&self, thread_id: i64) -> Result<Option<Worktree>> {
        let row: Option<WorktreeRow> = sqlx::query_as(
            "SELECT * FROM worktrees WHERE thread_id = ?1 AND status = 'active' LIMIT 1",
        )
        .bind(thread_id)
        .fetch_optional(self.db.as_ref())
        .await?;

        row.map(WorktreeRow::into_worktree).transpose()
    }

    /// List active worktrees whose last update precedes `cutoff`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_active_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<Worktree>> {
        let rows: Vec<WorktreeRow> = sqlx::query_as(
            "SELECT * FROM worktrees WHERE status = 'active' AND updated_at < ?1
             ORDER BY created_at",
        )
        .bind(cutoff.to_rfc3339())
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(WorktreeRow::into_worktree).collect()
    }

    /// Mark a worktree deleted.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn mark_deleted(&self, id: i64) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE worktrees SET status = 'deleted', updated_at = ?1 WHERE id = ?2")
            .bind(&now)
            .bind(id)
            .execute(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// Record a configured repository, replacing path and branch on conflict.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the upsert fails.
    pub async fn upsert_repository(
        &self,
        name: &str,
        path: &str,
        default_branch: &str,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO repositories (name, path, default_branch, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (name) DO UPDATE SET path = excluded.path,
             default_branch = excluded.default_branch",
        )
        .bind(name)
        .bind(path)
        .bind(default_branch)
        .bind(&now)
        .execute(self.db.as_ref())
        .await?;
        Ok(())
    }
}
