//! Retention service for worktree reclamation.
//!
//! Runs as a background task. On each tick it finds active worktrees whose
//! last update is older than the retention window, marks them deleted in the
//! store, and asks the [`WorktreeProvider`] to remove them physically. A
//! failed physical removal is logged and the record is still marked deleted
//! so the sweeper does not retry forever.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::worktree::WorktreeProvider;
use crate::Result;

use super::db::Database;
use super::worktree_repo::WorktreeRepo;

const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// Spawn the worktree retention background task.
///
/// The task runs hourly until `cancel` fires.
#[must_use]
pub fn spawn_retention_task(
    db: Arc<Database>,
    provider: Arc<dyn WorktreeProvider>,
    retention_days: u32,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("retention task shutting down");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(err) = sweep(&db, provider.as_ref(), retention_days).await {
                        error!(%err, "worktree retention sweep failed");
                    }
                }
            }
        }
    })
}

/// One retention pass: reclaim every active worktree older than the window.
///
/// # Errors
///
/// Returns `AppError::Db` if the store cannot be queried or updated.
pub async fn sweep(
    db: &Arc<Database>,
    provider: &dyn WorktreeProvider,
    retention_days: u32,
) -> Result<usize> {
    let repo = WorktreeRepo::new(Arc::clone(db));
    let cutoff = Utc::now() - chrono::Duration::days(i64::from(retention_days));
    let expired = repo.list_active_older_than(cutoff).await?;

    let mut reclaimed = 0usize;
    for worktree in expired {
        if let Err(err) = provider
            .remove(Path::new(&worktree.repo_path), Path::new(&worktree.path))
            .await
        {
            warn!(
                %err,
                path = %worktree.path,
                "physical worktree removal failed; marking deleted anyway"
            );
        }
        repo.mark_deleted(worktree.id).await?;
        reclaimed += 1;
    }

    if reclaimed > 0 {
        info!(reclaimed, retention_days, "worktree retention sweep complete");
    }
    Ok(reclaimed)
}
