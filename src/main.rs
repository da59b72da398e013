#![forbid(unsafe_code)]

//! `agent-relay` server binary.
//!
//! Bootstraps configuration, the `SQLite` store, the Slack Socket Mode
//! gateway, the session manager, and the HTTP approval control plane.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::{fmt, EnvFilter};

use agent_relay::config::GlobalConfig;
use agent_relay::manager::{self, SessionManager};
use agent_relay::mcp::broker::ApprovalBroker;
use agent_relay::mcp::http;
use agent_relay::mcp::server::AppState;
use agent_relay::persistence::worktree_repo::WorktreeRepo;
use agent_relay::persistence::{db, retention};
use agent_relay::slack::client::SlackService;
use agent_relay::worktree::GitCliWorktrees;
use agent_relay::{AppError, Result};

/// How often stale pending approvals are swept out of the broker.
const APPROVAL_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Maximum time to wait for graceful shutdown before giving up.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-relay", about = "Slack-thread coding-agent bridge", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the HTTP port for the approval control plane.
    #[arg(long)]
    port: Option<u16>,
}

fn main() -> Result<()> {
    let args = Cli::parse();

    let mut config = GlobalConfig::load_from_path(&args.config)?;
    if let Some(port) = args.port {
        config.http_port = port;
    }
    config.load_credentials();

    let _log_guard = init_tracing(args.log_format, &config.logs_dir)?;
    info!("agent-relay server bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(Arc::new(config)))
}

async fn run(config: Arc<GlobalConfig>) -> Result<()> {
    // ── Initialize database ─────────────────────────────
    let db_path = config.db_path.to_string_lossy().to_string();
    let database = Arc::new(db::connect(&db_path).await?);
    info!("database connected");

    // ── Record configured repositories ──────────────────
    let worktree_repo = WorktreeRepo::new(Arc::clone(&database));
    for repo in &config.repositories {
        worktree_repo
            .upsert_repository(
                &repo.name,
                &repo.path.to_string_lossy(),
                &repo.default_branch,
            )
            .await?;
    }

    // ── Build core services ─────────────────────────────
    let slack = Arc::new(SlackService::new(&config.slack)?);
    info!("slack client initialized");

    let worktrees = Arc::new(GitCliWorktrees);
    let session_manager = SessionManager::new(
        Arc::clone(&config),
        Arc::clone(&database),
        slack.clone(),
        worktrees.clone(),
    );
    let broker = Arc::new(ApprovalBroker::new(config.approval_timeout()));

    let state = Arc::new(AppState {
        config: Arc::clone(&config),
        db: Arc::clone(&database),
        gateway: slack.clone(),
        manager: Arc::clone(&session_manager),
        broker: Arc::clone(&broker),
    });

    // ── Start background services ───────────────────────
    let ct = CancellationToken::new();

    let socket_task = slack.start_socket_mode(Arc::clone(&state));
    info!("slack socket mode started");

    let http_ct = ct.clone();
    let http_state = Arc::clone(&state);
    let http_shutdown_ct = ct.clone();
    let http_task = tokio::spawn(async move {
        if let Err(err) = http::serve(http_state, http_ct).await {
            error!(%err, "control plane failed — initiating shutdown");
            http_shutdown_ct.cancel();
        }
    });

    let sweeper_task = manager::spawn_idle_sweeper(
        Arc::clone(&session_manager),
        Duration::from_secs(config.session.sweep_interval_seconds),
        config.idle_timeout(),
        ct.clone(),
    );

    let retention_task = config.worktree.as_ref().map(|wt| {
        retention::spawn_retention_task(
            Arc::clone(&database),
            worktrees.clone(),
            wt.retention_days,
            ct.clone(),
        )
    });

    let approval_sweep_task = spawn_approval_sweeper(Arc::clone(&broker), ct.clone());

    info!(port = config.http_port, "agent-relay ready");

    // ── Wait for first shutdown signal ──────────────────
    shutdown_signal().await;
    info!("shutdown signal received — starting graceful shutdown");
    ct.cancel();

    // Second signal force-exits.
    tokio::spawn(async {
        shutdown_signal().await;
        error!("second shutdown signal received — forcing exit");
        std::process::exit(1);
    });

    // ── Graceful shutdown with timeout ───────────────────
    let shutdown_fut = async {
        session_manager.shutdown().await;

        socket_task.abort();
        let _ = http_task.await;
        let _ = sweeper_task.await;
        let _ = approval_sweep_task.await;
        if let Some(task) = retention_task {
            let _ = task.await;
        }
    };

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, shutdown_fut)
        .await
        .is_err()
    {
        error!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "graceful shutdown timed out — exiting"
        );
    }

    info!("agent-relay shut down");
    Ok(())
}

/// Drop expired pending approvals so a cancelled tool call cannot leak its
/// entry forever.
fn spawn_approval_sweeper(
    broker: Arc<ApprovalBroker>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(APPROVAL_SWEEP_INTERVAL);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let expired = broker.expire_stale().await;
                    if expired > 0 {
                        info!(expired, "expired stale approvals");
                    }
                }
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

/// Initialize tracing with an env filter, stderr output, and a daily file
/// appender under the configured logs directory.
fn init_tracing(
    log_format: LogFormat,
    logs_dir: &std::path::Path,
) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    std::fs::create_dir_all(logs_dir)
        .map_err(|err| AppError::Config(format!("failed to create logs dir: {err}")))?;

    let file_appender = tracing_appender::rolling::daily(logs_dir, "agent-relay.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(file_writer.and(std::io::stderr));

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(guard)
}
