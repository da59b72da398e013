//! Session model and lifecycle helpers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status for an agent session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Child process is live and owns the thread.
    Active,
    /// Terminal result received; row retained for resume lookups.
    Completed,
    /// Child crashed, a write failed, or the server shut down mid-turn.
    Failed,
    /// Reaped by the idle sweeper.
    Timeout,
}

impl SessionStatus {
    /// Database string for this status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
        }
    }
}

/// Aggregated usage counters reported by the child's terminal `result`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct SessionUsage {
    /// Total cost in USD.
    pub cost_usd: f64,
    /// Input tokens consumed.
    pub input_tokens: i64,
    /// Output tokens produced.
    pub output_tokens: i64,
    /// Conversation turns in this run.
    pub num_turns: i64,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: i64,
}

/// Session domain entity persisted in `SQLite`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct Session {
    /// Database row identifier.
    pub id: i64,
    /// Opaque session identifier. Starts as a `temp_<nanos>` placeholder
    /// and is renamed exactly once when the child reports its own id.
    pub session_id: String,
    /// Owning thread row.
    pub thread_id: i64,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// Model name reported by the child, when known.
    pub model: Option<String>,
    /// Prompt that started the session.
    pub initial_prompt: Option<String>,
    /// Spawn timestamp.
    pub started_at: DateTime<Utc>,
    /// Set iff status is not `Active`.
    pub ended_at: Option<DateTime<Utc>>,
    /// Usage counters; zeroed until the terminal result arrives.
    pub usage: SessionUsage,
}

/// Allocate a locally unique placeholder session id.
///
/// The definitive id is assigned by the child after spawn; the placeholder
/// keeps the routing table addressable in the meantime.
#[must_use]
pub fn placeholder_session_id() -> String {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    format!("temp_{nanos}")
}
