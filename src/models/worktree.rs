//! Worktree model — one git worktree per repository-backed thread.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status for a worktree record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorktreeStatus {
    /// Checked out on disk and usable by sessions.
    Active,
    /// Reclaimed; the row is kept for audit.
    Deleted,
}

impl WorktreeStatus {
    /// Database string for this status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Deleted => "deleted",
        }
    }
}

/// Worktree domain entity persisted in `SQLite`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Worktree {
    /// Database row identifier.
    pub id: i64,
    /// Owning thread row.
    pub thread_id: i64,
    /// Repository checkout the worktree was created from.
    pub repo_path: String,
    /// Filesystem path of the worktree; unique.
    pub path: String,
    /// Branch the worktree was based on.
    pub base_branch: String,
    /// Branch checked out in the worktree.
    pub branch: String,
    /// Current lifecycle status.
    pub status: WorktreeStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last status change.
    pub updated_at: DateTime<Utc>,
}
