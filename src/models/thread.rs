//! Thread model — one row per Slack (channel, thread-ts) pair.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A Slack conversation thread owned by the bridge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Thread {
    /// Database row identifier.
    pub id: i64,
    /// Slack channel ID.
    pub channel_id: String,
    /// Timestamp of the thread's root message.
    pub thread_ts: String,
    /// Working directory sessions in this thread run in.
    pub workdir: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last-touched timestamp; monotonic non-decreasing.
    pub updated_at: DateTime<Utc>,
}
