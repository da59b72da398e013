//! Session Manager — the authoritative routing table from chat threads to
//! live agent sessions.
//!
//! Two maps (session-id → handle, thread-key → session-id) plus the
//! last-active pointer live inside one [`RouteTable`] behind a single lock,
//! so they are always updated together. Handles are cheap `Arc`s; no lock is
//! held across an await.

pub mod events;
pub mod tool_display;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::agent::{AgentAdapter, SpawnOptions};
use crate::config::{GlobalConfig, SERVER_NAME};
use crate::models::session::{placeholder_session_id, SessionStatus, SessionUsage};
use crate::models::thread::Thread;
use crate::persistence::db::Database;
use crate::persistence::session_repo::SessionRepo;
use crate::persistence::thread_repo::ThreadRepo;
use crate::persistence::worktree_repo::WorktreeRepo;
use crate::slack::gateway::{ChatGateway, ThreadEvent};
use crate::worktree::{self, WorktreeProvider};
use crate::{AppError, Result};

/// One live session: the adapter plus its thread identity and activity
/// bookkeeping.
pub struct SessionHandle {
    /// Slack channel ID.
    pub channel: String,
    /// Root timestamp of the owning thread.
    pub thread_ts: String,
    /// Owning thread row.
    pub thread_id: i64,
    /// Working directory the child runs in.
    pub workdir: PathBuf,
    /// Spawn timestamp.
    pub created_at: DateTime<Utc>,
    adapter: AgentAdapter,
    current_id: RwLock<String>,
    last_active_ms: AtomicI64,
    saw_result: AtomicBool,
}

impl SessionHandle {
    /// The session's current id (placeholder until `init` renames it).
    pub async fn current_id(&self) -> String {
        self.current_id.read().await.clone()
    }

    /// The adapter owning this session's child process.
    #[must_use]
    pub fn adapter(&self) -> &AgentAdapter {
        &self.adapter
    }

    /// Record activity now. Called for both inbound chat input and outbound
    /// child output, so a long chatty tool run never looks idle.
    pub fn touch(&self) {
        self.last_active_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    /// Time since the last recorded activity.
    #[must_use]
    pub fn idle_for(&self, now: DateTime<Utc>) -> Duration {
        let last = self.last_active_ms.load(Ordering::Relaxed);
        let idle_ms = now.timestamp_millis().saturating_sub(last);
        Duration::from_millis(u64::try_from(idle_ms).unwrap_or_default())
    }

    /// Record that a terminal `result` has arrived.
    pub fn mark_result(&self) {
        self.saw_result.store(true, Ordering::SeqCst);
    }

    /// Whether a terminal `result` has arrived.
    #[must_use]
    pub fn saw_result(&self) -> bool {
        self.saw_result.load(Ordering::SeqCst)
    }

    async fn set_current_id(&self, id: &str) {
        *self.current_id.write().await = id.to_owned();
    }
}

/// Routing state guarded by a single lock.
#[derive(Default)]
struct RouteTable {
    by_session: HashMap<String, Arc<SessionHandle>>,
    by_thread: HashMap<(String, String), String>,
    /// Most recently read-from or written-to session; the approval broker's
    /// fallback correlation key.
    last_active: Option<String>,
}

/// Owner of all live sessions and the thread→session routing table.
pub struct SessionManager {
    config: Arc<GlobalConfig>,
    db: Arc<Database>,
    gateway: Arc<dyn ChatGateway>,
    worktrees: Arc<dyn WorktreeProvider>,
    routes: RwLock<RouteTable>,
}

impl SessionManager {
    /// Create a manager over the shared store, gateway, and worktree
    /// provider.
    #[must_use]
    pub fn new(
        config: Arc<GlobalConfig>,
        db: Arc<Database>,
        gateway: Arc<dyn ChatGateway>,
        worktrees: Arc<dyn WorktreeProvider>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            db,
            gateway,
            worktrees,
            routes: RwLock::new(RouteTable::default()),
        })
    }

    /// Chat gateway shared with the translator and the broker handlers.
    #[must_use]
    pub fn gateway(&self) -> &Arc<dyn ChatGateway> {
        &self.gateway
    }

    /// Route one normalized thread event.
    ///
    /// A live session gets the text forwarded on its stdin; otherwise the
    /// store decides between resuming a recently completed session and
    /// starting a fresh one on a root mention. Stray replies in unowned
    /// threads are ignored.
    ///
    /// # Errors
    ///
    /// Returns the underlying error when forwarding or session creation
    /// fails; the user-visible error message has already been posted.
    pub async fn handle_thread_event(self: &Arc<Self>, event: &ThreadEvent) -> Result<()> {
        let key = (event.channel.clone(), event.thread_ts.clone());

        let existing = {
            let routes = self.routes.read().await;
            routes
                .by_thread
                .get(&key)
                .and_then(|sid| routes.by_session.get(sid))
                .map(Arc::clone)
        };

        if let Some(handle) = existing {
            return self.forward_to_session(&handle, &event.text).await;
        }

        // No live session — consult the store.
        let thread_repo = ThreadRepo::new(Arc::clone(&self.db));
        let session_repo = SessionRepo::new(Arc::clone(&self.db));

        let thread = match thread_repo
            .get_by_keys(&event.channel, &event.thread_ts)
            .await?
        {
            Some(thread) => thread,
            None if event.is_root_mention => {
                let workdir = self.workdir_for(&event.channel, &event.thread_ts);
                thread_repo
                    .upsert(
                        &event.channel,
                        &event.thread_ts,
                        &workdir.to_string_lossy(),
                    )
                    .await?
            }
            None => {
                debug!(
                    channel = %event.channel,
                    thread_ts = %event.thread_ts,
                    "stray reply in unowned thread; ignoring"
                );
                return Ok(());
            }
        };

        let resume_id = self.resume_candidate(&session_repo, thread.id).await?;

        if resume_id.is_none() && !event.is_root_mention {
            debug!(
                thread_id = thread.id,
                "reply with no active session and no resume candidate; ignoring"
            );
            return Ok(());
        }

        match self.create_session(&thread, resume_id, &event.text).await {
            Ok(_handle) => Ok(()),
            Err(err) => {
                error!(%err, thread_id = thread.id, "session creation failed");
                let notice = format!("\u{26a0}\u{fe0f} Failed to start an agent session: {err}");
                if let Err(post_err) = self
                    .gateway
                    .post_to_thread(&event.channel, &event.thread_ts, &notice, None)
                    .await
                {
                    warn!(%post_err, "failed to post session-creation failure notice");
                }
                Err(err)
            }
        }
    }

    /// Forward text to a live session's stdin.
    async fn forward_to_session(
        self: &Arc<Self>,
        handle: &Arc<SessionHandle>,
        text: &str,
    ) -> Result<()> {
        match handle.adapter.write_user_message(text).await {
            Ok(()) => {
                handle.touch();
                let sid = handle.current_id().await;
                self.mark_last_active(&sid).await;
                ThreadRepo::new(Arc::clone(&self.db))
                    .touch(handle.thread_id)
                    .await?;
                Ok(())
            }
            Err(err) => {
                warn!(%err, "write to agent failed; tearing session down");
                self.fail_session(handle, &format!("message could not be delivered: {err}"))
                    .await;
                Err(err)
            }
        }
    }

    /// Spawn a session for a thread, optionally resuming a prior session id.
    ///
    /// Worktree creation (when the channel maps to a repository) happens
    /// before the child is spawned. The placeholder session row and both
    /// routing entries are installed before the initial prompt is written,
    /// so replies arriving during init are not lost.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Worktree` / `AppError::Process` / `AppError::Db`
    /// on the respective stage failing. A spawn failure persists no session
    /// row; a row-insert failure closes the adapter and adds nothing to the
    /// maps.
    pub async fn create_session(
        self: &Arc<Self>,
        thread: &Thread,
        resume_id: Option<String>,
        initial_prompt: &str,
    ) -> Result<Arc<SessionHandle>> {
        self.ensure_worktree(thread).await?;

        let placeholder = placeholder_session_id();
        let (event_tx, event_rx) = AgentAdapter::event_channel();

        let options = SpawnOptions {
            command: self.config.agent.command.clone(),
            extra_args: self.config.agent.args.clone(),
            workdir: PathBuf::from(&thread.workdir),
            server_name: SERVER_NAME.to_owned(),
            mcp_url: self.config.mcp_url(),
            permission_tool: self.config.permission_tool(),
            resume_session_id: resume_id.clone(),
            teardown_grace: self.config.teardown_grace(),
        };

        let adapter = AgentAdapter::spawn(&options, event_tx)?;

        let session_repo = SessionRepo::new(Arc::clone(&self.db));
        if let Err(err) = session_repo
            .create(thread.id, &placeholder, None, Some(initial_prompt))
            .await
        {
            adapter.close().await;
            return Err(err);
        }

        let handle = Arc::new(SessionHandle {
            channel: thread.channel_id.clone(),
            thread_ts: thread.thread_ts.clone(),
            thread_id: thread.id,
            workdir: PathBuf::from(&thread.workdir),
            created_at: Utc::now(),
            adapter,
            current_id: RwLock::new(placeholder.clone()),
            last_active_ms: AtomicI64::new(Utc::now().timestamp_millis()),
            saw_result: AtomicBool::new(false),
        });

        {
            let mut routes = self.routes.write().await;
            routes
                .by_session
                .insert(placeholder.clone(), Arc::clone(&handle));
            routes.by_thread.insert(
                (thread.channel_id.clone(), thread.thread_ts.clone()),
                placeholder.clone(),
            );
            routes.last_active = Some(placeholder.clone());
        }

        tokio::spawn(events::run_consumer(
            Arc::clone(self),
            Arc::clone(&handle),
            event_rx,
        ));

        if let Err(err) = handle.adapter.write_user_message(initial_prompt).await {
            self.fail_session(&handle, &format!("initial prompt could not be delivered: {err}"))
                .await;
            return Err(err);
        }

        info!(
            session_id = %placeholder,
            thread_id = thread.id,
            resume = resume_id.as_deref().unwrap_or(""),
            "session created"
        );
        Ok(handle)
    }

    /// Completed-session id eligible for `--resume`, if any.
    ///
    /// A candidate exists when the thread's latest completed session ended
    /// within the resume window and the thread has no active session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if a store query fails.
    pub async fn resume_candidate(
        &self,
        session_repo: &SessionRepo,
        thread_id: i64,
    ) -> Result<Option<String>> {
        let Some(prev) = session_repo.latest_completed_for_thread(thread_id).await? else {
            return Ok(None);
        };
        if session_repo.count_active_for_thread(thread_id).await? > 0 {
            return Ok(None);
        }

        let window = chrono::Duration::from_std(self.config.resume_window())
            .unwrap_or_else(|_| chrono::Duration::hours(1));
        let within = prev
            .ended_at
            .is_some_and(|ended| Utc::now() - ended <= window);
        Ok(within.then_some(prev.session_id))
    }

    /// Resolve a session id (empty means "last active") to its identity.
    ///
    /// Returns `(session_id, channel, thread_ts)`; used by the Approval
    /// Broker to find where to render an approval.
    pub async fn get_session_info(&self, session_id: &str) -> Option<(String, String, String)> {
        let routes = self.routes.read().await;
        let sid = if session_id.is_empty() {
            routes.last_active.clone()?
        } else {
            session_id.to_owned()
        };
        let handle = routes.by_session.get(&sid)?;
        Some((sid, handle.channel.clone(), handle.thread_ts.clone()))
    }

    /// Update the last-active pointer to `session_id`.
    pub async fn mark_last_active(&self, session_id: &str) {
        let mut routes = self.routes.write().await;
        if routes.by_session.contains_key(session_id) {
            routes.last_active = Some(session_id.to_owned());
        }
    }

    /// Swap the placeholder id for the child-reported definitive id.
    ///
    /// Updates the store row, both routing maps, the last-active pointer,
    /// and the handle, all in one lock acquisition for the map side.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the store rename fails.
    pub async fn rename_session(&self, handle: &Arc<SessionHandle>, new_id: &str) -> Result<()> {
        let old_id = handle.current_id().await;
        if old_id == new_id {
            return Ok(());
        }

        SessionRepo::new(Arc::clone(&self.db))
            .rename(&old_id, new_id)
            .await?;

        {
            let mut routes = self.routes.write().await;
            if let Some(h) = routes.by_session.remove(&old_id) {
                routes.by_session.insert(new_id.to_owned(), h);
            }
            routes.by_thread.insert(
                (handle.channel.clone(), handle.thread_ts.clone()),
                new_id.to_owned(),
            );
            if routes.last_active.as_deref() == Some(old_id.as_str()) {
                routes.last_active = Some(new_id.to_owned());
            }
        }

        handle.set_current_id(new_id).await;
        info!(old_id, new_id, "session renamed to definitive id");
        Ok(())
    }

    /// Remove a session from both maps, clearing the last-active pointer if
    /// it matched.
    pub async fn remove_session(&self, session_id: &str) {
        let mut routes = self.routes.write().await;
        if let Some(handle) = routes.by_session.remove(session_id) {
            let key = (handle.channel.clone(), handle.thread_ts.clone());
            if routes.by_thread.get(&key).map(String::as_str) == Some(session_id) {
                routes.by_thread.remove(&key);
            }
        }
        if routes.last_active.as_deref() == Some(session_id) {
            routes.last_active = None;
        }
    }

    /// Tear a session down after a fatal error: post to the thread, close
    /// the adapter, finalize the row as `failed`, drop the routing entries.
    pub async fn fail_session(&self, handle: &Arc<SessionHandle>, reason: &str) {
        let sid = handle.current_id().await;
        warn!(session_id = %sid, reason, "session failed");

        let notice = format!("\u{26a0}\u{fe0f} Session error: {reason}");
        if let Err(err) = self
            .gateway
            .post_to_thread(&handle.channel, &handle.thread_ts, &notice, None)
            .await
        {
            warn!(%err, session_id = %sid, "failed to post session error notice");
        }

        handle.adapter.close().await;

        if let Err(err) = SessionRepo::new(Arc::clone(&self.db))
            .complete(
                &sid,
                SessionStatus::Failed,
                Utc::now(),
                SessionUsage::default(),
                None,
            )
            .await
        {
            error!(%err, session_id = %sid, "failed to finalize failed session row");
        }

        self.remove_session(&sid).await;
    }

    /// Reap sessions idle longer than `max_idle`. Returns how many were
    /// torn down.
    pub async fn cleanup_idle(&self, max_idle: Duration) -> usize {
        let now = Utc::now();
        let handles: Vec<Arc<SessionHandle>> = {
            let routes = self.routes.read().await;
            routes.by_session.values().map(Arc::clone).collect()
        };

        let mut reaped = 0usize;
        for handle in handles {
            if handle.idle_for(now) <= max_idle {
                continue;
            }

            let sid = handle.current_id().await;
            info!(session_id = %sid, "session idle past threshold; timing out");

            let minutes = max_idle.as_secs() / 60;
            let notice = format!(
                "\u{23f1}\u{fe0f} Session timed out after {minutes} minutes of inactivity. \
                 Mention me again to pick up where we left off."
            );
            if let Err(err) = self
                .gateway
                .post_to_thread(&handle.channel, &handle.thread_ts, &notice, None)
                .await
            {
                warn!(%err, session_id = %sid, "failed to post timeout notice");
            }

            handle.adapter.close().await;

            if let Err(err) = SessionRepo::new(Arc::clone(&self.db))
                .complete(
                    &sid,
                    SessionStatus::Timeout,
                    Utc::now(),
                    SessionUsage::default(),
                    None,
                )
                .await
            {
                error!(%err, session_id = %sid, "failed to finalize timed-out session row");
            }

            self.remove_session(&sid).await;
            reaped += 1;
        }
        reaped
    }

    /// Close every live session on server shutdown, finalizing rows as
    /// `failed` with a notice in each thread.
    pub async fn shutdown(&self) {
        let handles: Vec<Arc<SessionHandle>> = {
            let mut routes = self.routes.write().await;
            let handles = routes.by_session.values().map(Arc::clone).collect();
            routes.by_session.clear();
            routes.by_thread.clear();
            routes.last_active = None;
            handles
        };

        for handle in handles {
            let sid = handle.current_id().await;
            let notice = "\u{1f6d1} Server shutting down; this session has ended.";
            if let Err(err) = self
                .gateway
                .post_to_thread(&handle.channel, &handle.thread_ts, notice, None)
                .await
            {
                warn!(%err, session_id = %sid, "failed to post shutdown notice");
            }

            handle.adapter.close().await;

            if let Err(err) = SessionRepo::new(Arc::clone(&self.db))
                .complete(
                    &sid,
                    SessionStatus::Failed,
                    Utc::now(),
                    SessionUsage::default(),
                    None,
                )
                .await
            {
                error!(%err, session_id = %sid, "failed to finalize session row on shutdown");
            }
        }
    }

    /// Number of live sessions.
    pub async fn session_count(&self) -> usize {
        self.routes.read().await.by_session.len()
    }

    /// Working directory for a new thread: the configured repository's
    /// worktree path when the channel maps to one, the default workdir
    /// otherwise.
    fn workdir_for(&self, channel_id: &str, thread_ts: &str) -> PathBuf {
        match (
            self.config.repository_for_channel(channel_id),
            &self.config.worktree,
        ) {
            (Some(_), Some(wt)) => worktree::worktree_path(&wt.root, channel_id, thread_ts),
            _ => self.config.default_workdir.clone(),
        }
    }

    /// Create the thread's worktree on disk and in the store when the
    /// channel maps to a repository and none is active yet.
    async fn ensure_worktree(&self, thread: &Thread) -> Result<()> {
        let Some(repo_cfg) = self.config.repository_for_channel(&thread.channel_id) else {
            return Ok(());
        };
        if self.config.worktree.is_none() {
            return Ok(());
        }

        let worktree_repo = WorktreeRepo::new(Arc::clone(&self.db));
        if worktree_repo.active_for_thread(thread.id).await?.is_some() {
            return Ok(());
        }

        let branch = worktree::branch_name(&thread.channel_id, &thread.thread_ts);
        let path = PathBuf::from(&thread.workdir);

        self.worktrees
            .create(&repo_cfg.path, &branch, &repo_cfg.default_branch, &path)
            .await?;

        worktree_repo
            .create(
                thread.id,
                &repo_cfg.path.to_string_lossy(),
                &thread.workdir,
                &repo_cfg.default_branch,
                &branch,
            )
            .await
            .map_err(|err| {
                AppError::Worktree(format!("worktree created but not recorded: {err}"))
            })?;

        Ok(())
    }
}

/// Spawn the periodic idle sweeper.
#[must_use]
pub fn spawn_idle_sweeper(
    manager: Arc<SessionManager>,
    sweep_interval: Duration,
    max_idle: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_interval);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("idle sweeper shutting down");
                    break;
                }
                _ = interval.tick() => {
                    let reaped = manager.cleanup_idle(max_idle).await;
                    if reaped > 0 {
                        info!(reaped, "idle sweep reaped sessions");
                    }
                }
            }
        }
    })
}
