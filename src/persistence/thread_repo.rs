//! Thread repository for `SQLite` persistence.

use std::sync::Arc;

use chrono::Utc;

use crate::models::thread::Thread;
use crate::{AppError, Result};

use super::db::Database;

/// Repository wrapper around `SQLite` for thread records.
#[derive(Clone)]
pub struct ThreadRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct ThreadRow {
    id: i64,
    channel_id: String,
    thread_ts: String,
    workdir: String,
    created_at: String,
    updated_at: String,
}

impl ThreadRow {
    fn into_thread(self) -> Result<Thread> {
        let created_at = chrono::DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| AppError::Db(format!("invalid created_at: {e}")))?
            .with_timezone(&Utc);
        let updated_at = chrono::DateTime::parse_from_rfc3339(&self.updated_at)
            .map_err(|e| AppError::Db(format!("invalid updated_at: {e}")))?
            .with_timezone(&Utc);

        Ok(Thread {
            id: self.id,
            channel_id: self.channel_id,
            thread_ts: self.thread_ts,
            workdir: self.workdir,
            created_at,
            updated_at,
        })
    }
}

impl ThreadRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a thread row for `(channel_id, thread_ts)` or return the
    /// existing one. Idempotent; `updated_at` is bumped on every call and
    /// never moves backwards.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert or lookup fails.
    pub async fn upsert(&self, channel_id: &str, thread_ts: &str, workdir: &str) -> Result<Thread> {
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO threads (channel_id, thread_ts, workdir, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT (channel_id, thread_ts)
             DO UPDATE SET updated_at = MAX(updated_at, excluded.updated_at)",
        )
        .bind(channel_id)
        .bind(thread_ts)
        .bind(workdir)
        .bind(&now)
        .execute(self.db.as_ref())
        .await?;

        self.get_by_keys(channel_id, thread_ts)
            .await?
            .ok_or_else(|| AppError::Db("thread row missing after upsert".into()))
    }

    /// Retrieve a thread by its Slack keys.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_keys(&self, channel_id: &str, thread_ts: &str) -> Result<Option<Thread>> {
        let row: Option<ThreadRow> =
            sqlx::query_as("SELECT * FROM threads WHERE channel_id = ?1 AND thread_ts = ?2")
                .bind(channel_id)
                .bind(thread_ts)
                .fetch_optional(self.db.as_ref())
                .await?;

        row.map(ThreadRow::into_thread).transpose()
    }

    /// Retrieve a thread by row identifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<Thread>> {
        let row: Option<ThreadRow> = sqlx::query_as("SELECT * FROM threads WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.db.as_ref())
            .await?;

        row.map(ThreadRow::into_thread).transpose()
    }

    /// List threads newest-first with limit/offset pagination.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_paginated(&self, limit: i64, offset: i64) -> Result<Vec<Thread>> {
        let rows: Vec<ThreadRow> =
            sqlx::query_as("SELECT * FROM threads ORDER BY updated_at DESC LIMIT ?1 OFFSET ?2")
                .bind(limit)
                .bind(offset)
                .fetch_all(self.db.as_ref())
                .await?;

        rows.into_iter().map(ThreadRow::into_thread).collect()
    }

    /// Bump a thread's `updated_at`, keeping it monotonic.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn touch(&self, id: i64) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE threads SET updated_at = MAX(updated_at, ?1) WHERE id = ?2")
            .bind(&now)
            .bind(id)
            .execute(self.db.as_ref())
            .await?;
        Ok(())
    }
}
