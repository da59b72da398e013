//! Shared helpers for manager/broker integration tests.
//!
//! Provides a recording [`ChatGateway`] double, a no-op worktree provider,
//! config and manager builders over in-memory `SQLite`, and fake agent
//! scripts that speak just enough stream JSON to drive the flows.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agent_relay::config::GlobalConfig;
use agent_relay::manager::SessionManager;
use agent_relay::mcp::broker::ApprovalBroker;
use agent_relay::mcp::server::AppState;
use agent_relay::persistence::db::{self, Database};
use agent_relay::slack::gateway::{
    ApprovalRequestView, Attribution, ChatGateway, ThreadEvent,
};
use agent_relay::worktree::WorktreeProvider;
use agent_relay::Result;

/// One recorded `post_to_thread` call.
#[derive(Debug, Clone)]
pub struct PostRecord {
    pub channel: String,
    pub thread_ts: String,
    pub text: String,
    pub attribution: Option<Attribution>,
}

/// One recorded `update_message` call.
#[derive(Debug, Clone)]
pub struct UpdateRecord {
    pub channel: String,
    pub ts: String,
    pub text: String,
}

/// Recording [`ChatGateway`] double.
#[derive(Default)]
pub struct RecordingGateway {
    next_ts: AtomicU64,
    pub posts: Mutex<Vec<PostRecord>>,
    pub updates: Mutex<Vec<UpdateRecord>>,
    pub approvals: Mutex<Vec<(String, String, ApprovalRequestView)>>,
    pub modals: Mutex<Vec<(String, String)>>,
    pub fail_renders: AtomicBool,
}

impl RecordingGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn make_ts(&self) -> String {
        let n = self.next_ts.fetch_add(1, Ordering::SeqCst);
        format!("9999.{n:04}")
    }

    pub fn post_texts(&self) -> Vec<String> {
        self.posts
            .lock()
            .expect("posts lock")
            .iter()
            .map(|p| p.text.clone())
            .collect()
    }

    pub fn post_count(&self) -> usize {
        self.posts.lock().expect("posts lock").len()
    }
}

impl ChatGateway for RecordingGateway {
    fn post_to_thread(
        &self,
        channel: &str,
        thread_ts: &str,
        text: &str,
        attribution: Option<Attribution>,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>> {
        let record = PostRecord {
            channel: channel.to_owned(),
            thread_ts: thread_ts.to_owned(),
            text: text.to_owned(),
            attribution,
        };
        Box::pin(async move {
            self.posts.lock().expect("posts lock").push(record);
            Ok(self.make_ts())
        })
    }

    fn update_message(
        &self,
        channel: &str,
        ts: &str,
        text: &str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let record = UpdateRecord {
            channel: channel.to_owned(),
            ts: ts.to_owned(),
            text: text.to_owned(),
        };
        Box::pin(async move {
            self.updates.lock().expect("updates lock").push(record);
            Ok(())
        })
    }

    fn render_approval(
        &self,
        channel: &str,
        thread_ts: &str,
        request: &ApprovalRequestView,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>> {
        let channel = channel.to_owned();
        let thread_ts = thread_ts.to_owned();
        let request = request.clone();
        Box::pin(async move {
            if self.fail_renders.load(Ordering::SeqCst) {
                return Err(agent_relay::AppError::Slack("render disabled".into()));
            }
            self.approvals
                .lock()
                .expect("approvals lock")
                .push((channel, thread_ts, request));
            Ok(self.make_ts())
        })
    }

    fn open_deny_reason_modal(
        &self,
        trigger_id: &str,
        request_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let pair = (trigger_id.to_owned(), request_id.to_owned());
        Box::pin(async move {
            self.modals.lock().expect("modals lock").push(pair);
            Ok(())
        })
    }
}

/// Worktree provider that records nothing and always succeeds.
#[derive(Default)]
pub struct NullWorktrees;

impl WorktreeProvider for NullWorktrees {
    fn create(
        &self,
        _repo_path: &Path,
        _branch: &str,
        _base_branch: &str,
        _path: &Path,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }

    fn remove(
        &self,
        _repo_path: &Path,
        _path: &Path,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }
}

/// Build a test config pointing the agent command at `agent_cmd`.
pub fn test_config(workdir: &Path, agent_cmd: &Path, resume_window_seconds: u64) -> GlobalConfig {
    let toml = format!(
        r"
base_url = 'http://127.0.0.1:0'
http_port = 0
db_path = 'unused.db'
logs_dir = 'logs'
default_workdir = '{workdir}'

[agent]
command = '{agent}'

[session]
resume_window_seconds = {resume_window_seconds}
idle_timeout_seconds = 1800
sweep_interval_seconds = 60
teardown_grace_seconds = 2

[approval]
timeout_seconds = 2
",
        workdir = workdir.display(),
        agent = agent_cmd.display(),
    );
    GlobalConfig::from_toml_str(&toml).expect("valid test config")
}

/// Build a manager over in-memory `SQLite` with a recording gateway.
pub async fn test_manager(
    config: GlobalConfig,
) -> (Arc<SessionManager>, Arc<RecordingGateway>, Arc<Database>) {
    let database = Arc::new(db::connect_memory().await.expect("db connect"));
    let gateway = RecordingGateway::new();
    let manager = SessionManager::new(
        Arc::new(config),
        Arc::clone(&database),
        gateway.clone(),
        Arc::new(NullWorktrees),
    );
    (manager, gateway, database)
}

/// Build an `AppState` around an existing manager for handler tests.
pub fn test_app_state(
    manager: &Arc<SessionManager>,
    gateway: &Arc<RecordingGateway>,
    database: &Arc<Database>,
    approval_timeout: Duration,
) -> Arc<AppState> {
    let toml_dir = std::env::temp_dir();
    let config = test_config(&toml_dir, Path::new("true"), 3600);
    Arc::new(AppState {
        config: Arc::new(config),
        db: Arc::clone(database),
        gateway: gateway.clone(),
        manager: Arc::clone(manager),
        broker: Arc::new(ApprovalBroker::new(approval_timeout)),
    })
}

/// Write an executable `/bin/sh` script acting as the agent child.
#[cfg(unix)]
pub fn write_fake_agent(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("chmod script");
    path
}

/// Script: emit `init`, then stay alive until stdin closes.
#[cfg(unix)]
pub fn script_init_and_wait(session_id: &str) -> String {
    format!(
        r#"printf '{{"type":"system","subtype":"init","session_id":"{session_id}","cwd":"/w","model":"test-model"}}\n'
cat >/dev/null"#
    )
}

/// Script: emit `init`, one assistant text message, then stay alive.
#[cfg(unix)]
pub fn script_init_hello(session_id: &str) -> String {
    format!(
        r#"printf '{{"type":"system","subtype":"init","session_id":"{session_id}","cwd":"/w","model":"test-model"}}\n'
printf '{{"type":"assistant","session_id":"{session_id}","message":{{"content":[{{"type":"text","text":"Hello!"}}]}}}}\n'
cat >/dev/null"#
    )
}

/// Script: a full turn — init, text, tool use, text, terminal result — then
/// exit 0. Reads the initial prompt line first so the spawner's write never
/// races the exit.
#[cfg(unix)]
pub fn script_full_turn(session_id: &str) -> String {
    format!(
        r#"read _prompt
printf '{{"type":"system","subtype":"init","session_id":"{session_id}","cwd":"/w","model":"test-model"}}\n'
printf '{{"type":"assistant","message":{{"content":[{{"type":"text","text":"one"}}]}}}}\n'
printf '{{"type":"assistant","message":{{"content":[{{"type":"tool_use","id":"tu1","name":"Bash","input":{{"command":"ls -la"}}}}]}}}}\n'
printf '{{"type":"assistant","message":{{"content":[{{"type":"text","text":"two"}}]}}}}\n'
printf '{{"type":"result","subtype":"success","is_error":false,"duration_ms":1200,"num_turns":2,"total_cost_usd":0.01,"usage":{{"input_tokens":10,"output_tokens":20}}}}\n'"#
    )
}

/// Script: a turn ending in an errored terminal result.
#[cfg(unix)]
pub fn script_error_turn(session_id: &str) -> String {
    format!(
        r#"read _prompt
printf '{{"type":"system","subtype":"init","session_id":"{session_id}","cwd":"/w","model":"test-model"}}\n'
printf '{{"type":"result","subtype":"error","is_error":true,"duration_ms":500,"num_turns":1,"total_cost_usd":0.001,"usage":{{"input_tokens":5,"output_tokens":2}},"result":"the agent hit an error"}}\n'"#
    )
}

/// Script: emit `init`, then exit nonzero before any result.
#[cfg(unix)]
pub fn script_early_exit(session_id: &str) -> String {
    format!(
        r#"read _prompt
printf '{{"type":"system","subtype":"init","session_id":"{session_id}","cwd":"/w","model":"test-model"}}\n'
exit 3"#
    )
}

/// Script: append `$@` to `args_file`, emit init (unique per pid) and a
/// terminal result, then exit.
#[cfg(unix)]
pub fn script_dump_args_and_complete(args_file: &Path) -> String {
    format!(
        r#"echo "$@" >> '{args}'
read _prompt
printf '{{"type":"system","subtype":"init","session_id":"S-run-'"$$"'","cwd":"/w","model":"test-model"}}\n'
printf '{{"type":"result","subtype":"success","is_error":false,"duration_ms":10,"num_turns":1,"total_cost_usd":0.0,"usage":{{"input_tokens":1,"output_tokens":1}}}}\n'"#,
        args = args_file.display(),
    )
}

/// A root-mention thread event.
pub fn root_mention(channel: &str, ts: &str, text: &str) -> ThreadEvent {
    ThreadEvent {
        channel: channel.to_owned(),
        thread_ts: ts.to_owned(),
        ts: ts.to_owned(),
        user: "U1".to_owned(),
        text: text.to_owned(),
        is_root_mention: true,
    }
}

/// A non-mention reply in an existing thread.
pub fn thread_reply(channel: &str, thread_ts: &str, ts: &str, text: &str) -> ThreadEvent {
    ThreadEvent {
        channel: channel.to_owned(),
        thread_ts: thread_ts.to_owned(),
        ts: ts.to_owned(),
        user: "U1".to_owned(),
        text: text.to_owned(),
        is_root_mention: false,
    }
}

/// Poll an async condition every 20 ms until it holds or `millis` elapses.
pub async fn wait_for<F, Fut>(cond: F, millis: u64) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let rounds = millis / 20;
    for _ in 0..rounds {
        if cond().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cond().await
}
