//! Session repository for `SQLite` persistence.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::models::session::{Session, SessionStatus, SessionUsage};
use crate::{AppError, Result};

use super::db::Database;

/// Repository wrapper around `SQLite` for session records.
#[derive(Clone)]
pub struct SessionRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct SessionRow {
    id: i64,
    session_id: String,
    thread_id: i64,
    status: String,
    model: Option<String>,
    initial_prompt: Option<String>,
    started_at: String,
    ended_at: Option<String>,
    cost_usd: f64,
    input_tokens: i64,
    output_tokens: i64,
    num_turns: i64,
    duration_ms: i64,
}

impl SessionRow {
    fn into_session(self) -> Result<Session> {
        let status = parse_status(&self.status)?;
        let started_at = chrono::DateTime::parse_from_rfc3339(&self.started_at)
            .map_err(|e| AppError::Db(format!("invalid started_at: {e}")))?
            .with_timezone(&Utc);
        let ended_at = self
            .ended_at
            .as_deref()
            .map(|s| {
                chrono::DateTime::parse_from_rfc3339(s)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| AppError::Db(format!("invalid ended_at: {e}")))
            })
            .transpose()?;

        Ok(Session {
            id: self.id,
            session_id: self.session_id,
            thread_id: self.thread_id,
            status,
            model: self.model,
            initial_prompt: self.initial_prompt,
            started_at,
            ended_at,
            usage: SessionUsage {
                cost_usd: self.cost_usd,
                input_tokens: self.input_tokens,
                output_tokens: self.output_tokens,
                num_turns: self.num_turns,
                duration_ms: self.duration_ms,
            },
        })
    }
}

/// Parse a status string into the domain enum.
fn parse_status(s: &str) -> Result<SessionStatus> {
    match s {
        "active" => Ok(SessionStatus::Active),
        "completed" => Ok(SessionStatus::Completed),
        "failed" => Ok(SessionStatus::Failed),
        "timeout" => Ok(SessionStatus::Timeout),
        other => Err(AppError::Db(format!("invalid session status: {other}"))),
    }
}

impl SessionRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a new active session under its placeholder id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails, including when the
    /// placeholder id collides with an existing `session_id`.
    pub async fn create(
        &self,
        thread_id: i64,
        placeholder_id: &str,
        model: Option<&str>,
        initial_prompt: Option<&str>,
    ) -> Result<Session> {
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO sessions (session_id, thread_id, status, model, initial_prompt, started_at)
             VALUES (?1, ?2, 'active', ?3, ?4, ?5)",
        )
        .bind(placeholder_id)
        .bind(thread_id)
        .bind(model)
        .bind(initial_prompt)
        .bind(&now)
        .execute(self.db.as_ref())
        .await?;

        self.get_by_session_id(placeholder_id)
            .await?
            .ok_or_else(|| AppError::Db("session row missing after insert".into()))
    }

    /// Atomically replace the placeholder id with the child-reported id.
    ///
    /// Used exactly once per session, when the `init` message arrives.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no row carries `old_id`, or
    /// `AppError::Db` if the new id is already taken.
    pub async fn rename(&self, old_id: &str, new_id: &str) -> Result<()> {
        let result = sqlx::query("UPDATE sessions SET session_id = ?1 WHERE session_id = ?2")
            .bind(new_id)
            .bind(old_id)
            .execute(self.db.as_ref())
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("session {old_id} not found")));
        }
        Ok(())
    }

    /// Record the model reported by the child's `init` message.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session does not exist, or
    /// `AppError::Db` on query failure.
    pub async fn set_model(&self, session_id: &str, model: &str) -> Result<()> {
        let result = sqlx::query("UPDATE sessions SET model = ?1 WHERE session_id = ?2")
            .bind(model)
            .bind(session_id)
            .execute(self.db.as_ref())
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "session {session_id} not found"
            )));
        }
        Ok(())
    }

    /// Finalize a session: set terminal status, `ended_at`, usage counters,
    /// and the model when the child reported one.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session does not exist, or
    /// `AppError::Db` on query failure.
    pub async fn complete(
        &self,
        session_id: &str,
        status: SessionStatus,
        ended_at: DateTime<Utc>,
        usage: SessionUsage,
        model: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE sessions SET status = ?1, ended_at = ?2, cost_usd = ?3,
             input_tokens = ?4, output_tokens = ?5, num_turns = ?6, duration_ms = ?7,
             model = COALESCE(?8, model)
             WHERE session_id = ?9",
        )
        .bind(status.as_str())
        .bind(ended_at.to_rfc3339())
        .bind(usage.cost_usd)
        .bind(usage.input_tokens)
        .bind(usage.output_tokens)
        .bind(usage.num_turns)
        .bind(usage.duration_ms)
        .bind(model)
        .bind(session_id)
        .execute(self.db.as_ref())
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "session {session_id} not found"
            )));
        }
        Ok(())
    }

    /// Retrieve a session by its opaque identifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_session_id(&self, session_id: &str) -> Result<Option<Session>> {
        let row: Option<SessionRow> =
            sqlx::query_as("SELECT * FROM sessions WHERE session_id = ?1")
                .bind(session_id)
                .fetch_optional(self.db.as_ref())
                .await?;

        row.map(SessionRow::into_session).transpose()
    }

    /// Most recently ended completed session for a thread, if any.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn latest_completed_for_thread(&self, thread_id: i64) -> Result<Option<Session>> {
        let row: Option<SessionRow> = sqlx::query_as(
            "SELECT * FROM sessions WHERE thread_id = ?1 AND status = 'completed'
             ORDER BY ended_at DESC LIMIT 1",
        )
        .bind(thread_id)
        .fetch_optional(self.db.as_ref())
        .await?;

        row.map(SessionRow::into_session).transpose()
    }

    /// Count sessions with status `active` for a thread.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn count_active_for_thread(&self, thread_id: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sessions WHERE thread_id = ?1 AND status = 'active'",
        )
        .bind(thread_id)
        .fetch_one(self.db.as_ref())
        .await?;
        Ok(count)
    }

    /// List all sessions for a thread, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_for_thread(&self, thread_id: i64) -> Result<Vec<Session>> {
        let rows: Vec<SessionRow> =
            sqlx::query_as("SELECT * FROM sessions WHERE thread_id = ?1 ORDER BY started_at")
                .bind(thread_id)
                .fetch_all(self.db.as_ref())
                .await?;

        rows.into_iter().map(SessionRow::into_session).collect()
    }
}
