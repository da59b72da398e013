//! Git worktree provisioning.
//!
//! The bridge itself only records worktrees; creating and removing them on
//! disk is delegated to a [`WorktreeProvider`]. The default implementation
//! shells out to the `git` CLI.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;

use tokio::process::Command;
use tracing::info;

use crate::{AppError, Result};

/// Provider of physical worktree checkouts.
///
/// Implementations must be safe to call concurrently; the manager creates
/// worktrees while the retention sweeper removes old ones.
pub trait WorktreeProvider: Send + Sync {
    /// Create a worktree at `path` on a new `branch` based on `base_branch`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Worktree`](crate::AppError::Worktree) if the checkout fails.
    fn create(
        &self,
        repo_path: &Path,
        branch: &str,
        base_branch: &str,
        path: &Path,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Remove the worktree at `path` from `repo_path`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Worktree`](crate::AppError::Worktree) if the removal fails.
    fn remove(
        &self,
        repo_path: &Path,
        path: &Path,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// `git worktree` CLI implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct GitCliWorktrees;

impl GitCliWorktrees {
    async fn run_git(repo_path: &Path, args: &[&str]) -> Result<()> {
        let output = Command::new("git")
            .args(args)
            .current_dir(repo_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|err| AppError::Worktree(format!("failed to run git: {err}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::Worktree(format!(
                "git {} failed: {}",
                args.join(" "),
                stderr.trim()
            )));
        }
        Ok(())
    }
}

impl WorktreeProvider for GitCliWorktrees {
    fn create(
        &self,
        repo_path: &Path,
        branch: &str,
        base_branch: &str,
        path: &Path,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let repo_path = repo_path.to_path_buf();
        let branch = branch.to_owned();
        let base_branch = base_branch.to_owned();
        let path = path.to_path_buf();

        Box::pin(async move {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|err| {
                    AppError::Worktree(format!("cannot create worktree parent dir: {err}"))
                })?;
            }
            let path_str = path.to_string_lossy().to_string();
            Self::run_git(
                &repo_path,
                &["worktree", "add", "-b", &branch, &path_str, &base_branch],
            )
            .await?;
            info!(branch, path = %path.display(), "worktree created");
            Ok(())
        })
    }

    fn remove(
        &self,
        repo_path: &Path,
        path: &Path,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let repo_path = repo_path.to_path_buf();
        let path = path.to_path_buf();

        Box::pin(async move {
            let path_str = path.to_string_lossy().to_string();
            Self::run_git(&repo_path, &["worktree", "remove", "--force", &path_str]).await?;
            info!(path = %path.display(), "worktree removed");
            Ok(())
        })
    }
}

/// Branch name for a thread-scoped worktree.
#[must_use]
pub fn branch_name(channel_id: &str, thread_ts: &str) -> String {
    let ts = thread_ts.replace('.', "-");
    format!("relay/{channel_id}-{ts}")
}

/// Filesystem destination for a thread-scoped worktree.
#[must_use]
pub fn worktree_path(root: &Path, channel_id: &str, thread_ts: &str) -> PathBuf {
    let ts = thread_ts.replace('.', "-");
    root.join(format!("{channel_id}-{ts}"))
}
