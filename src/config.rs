//! Global configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// MCP server name advertised to the agent child.
///
/// The fully qualified approval tool the child is launched with is
/// `mcp__<SERVER_NAME>__approval_prompt`.
pub const SERVER_NAME: &str = "relay";

/// Nested Slack configuration required for Socket Mode connectivity.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SlackConfig {
    /// App-level token used for Socket Mode. Loaded from `SLACK_APP_TOKEN`
    /// when absent in the file.
    #[serde(default)]
    pub app_token: String,
    /// Bot user token used for posting messages. Loaded from
    /// `SLACK_BOT_TOKEN` when absent in the file.
    #[serde(default)]
    pub bot_token: String,
    /// Signing secret for event verification. Loaded from
    /// `SLACK_SIGNING_SECRET` when absent in the file.
    #[serde(default)]
    pub signing_secret: String,
    /// Bot user ID; inbound events from this user are dropped to avoid
    /// feedback loops.
    #[serde(default)]
    pub bot_user_id: String,
}

/// Agent child process invocation settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    /// Agent CLI binary (e.g. `claude`).
    pub command: String,
    /// Extra arguments appended after the stream-JSON flags.
    #[serde(default)]
    pub args: Vec<String>,
}

/// Session lifecycle timers, all in seconds.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionConfig {
    /// Window after a completed session during which the next root thread
    /// event resumes it via `--resume`.
    pub resume_window_seconds: u64,
    /// Idle threshold after which the sweeper tears a session down.
    pub idle_timeout_seconds: u64,
    /// Sweeper tick interval.
    pub sweep_interval_seconds: u64,
    /// Grace period between closing the child's stdin and force-kill.
    pub teardown_grace_seconds: u64,
}

/// Approval control-plane settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ApprovalConfig {
    /// Seconds a pending approval waits before resolving as deny.
    pub timeout_seconds: u64,
}

/// A repository the bridge may create worktrees in.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RepositoryConfig {
    /// Short name, unique across the config.
    pub name: String,
    /// Absolute path to the checkout.
    pub path: PathBuf,
    /// Branch new worktrees are based on.
    pub default_branch: String,
    /// Slack channel IDs routed to this repository.
    #[serde(default)]
    pub channels: Vec<String>,
}

/// Worktree housekeeping settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct WorktreeConfig {
    /// Directory new worktrees are created under.
    pub root: PathBuf,
    /// Days an inactive worktree is retained before the sweeper reclaims it.
    pub retention_days: u32,
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Base URL the agent child uses to reach the approval control plane.
    pub base_url: String,
    /// HTTP port the MCP control plane binds to.
    pub http_port: u16,
    /// Path to the `SQLite` database file.
    pub db_path: PathBuf,
    /// Directory for rotated log files.
    pub logs_dir: PathBuf,
    /// Working directory for sessions in channels with no repository.
    pub default_workdir: PathBuf,
    /// Slack connectivity settings.
    #[serde(default)]
    pub slack: SlackConfig,
    /// Agent child invocation.
    pub agent: AgentConfig,
    /// Session lifecycle timers.
    pub session: SessionConfig,
    /// Approval timeout.
    pub approval: ApprovalConfig,
    /// Worktree housekeeping.
    pub worktree: Option<WorktreeConfig>,
    /// Repositories available for worktree-backed sessions.
    #[serde(default)]
    pub repositories: Vec<RepositoryConfig>,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Fill Slack credentials from the environment when the file left them
    /// empty. Missing credentials are not an error here; Socket Mode startup
    /// fails later with a precise message if a token is actually needed.
    pub fn load_credentials(&mut self) {
        if self.slack.bot_token.is_empty() {
            if let Ok(v) = std::env::var("SLACK_BOT_TOKEN") {
                self.slack.bot_token = v;
            }
        }
        if self.slack.app_token.is_empty() {
            if let Ok(v) = std::env::var("SLACK_APP_TOKEN") {
                self.slack.app_token = v;
            }
        }
        if self.slack.signing_secret.is_empty() {
            if let Ok(v) = std::env::var("SLACK_SIGNING_SECRET") {
                self.slack.signing_secret = v;
            }
        }
    }

    /// URL of the MCP endpoint embedded into per-session config files.
    #[must_use]
    pub fn mcp_url(&self) -> String {
        format!("{}/mcp", self.base_url.trim_end_matches('/'))
    }

    /// Fully qualified approval tool identifier passed to the child.
    #[must_use]
    pub fn permission_tool(&self) -> String {
        format!("mcp__{SERVER_NAME}__approval_prompt")
    }

    /// Resume window as a [`Duration`].
    #[must_use]
    pub fn resume_window(&self) -> Duration {
        Duration::from_secs(self.session.resume_window_seconds)
    }

    /// Idle timeout as a [`Duration`].
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.session.idle_timeout_seconds)
    }

    /// Teardown grace period as a [`Duration`].
    #[must_use]
    pub fn teardown_grace(&self) -> Duration {
        Duration::from_secs(self.session.teardown_grace_seconds)
    }

    /// Approval deadline as a [`Duration`].
    #[must_use]
    pub fn approval_timeout(&self) -> Duration {
        Duration::from_secs(self.approval.timeout_seconds)
    }

    /// Repository configured for a Slack channel, if any.
    #[must_use]
    pub fn repository_for_channel(&self, channel_id: &str) -> Option<&RepositoryConfig> {
        self.repositories
            .iter()
            .find(|repo| repo.channels.iter().any(|c| c == channel_id))
    }

    fn validate(&mut self) -> Result<()> {
        if self.base_url.is_empty() {
            return Err(AppError::Config("base_url must not be empty".into()));
        }
        if self.agent.command.is_empty() {
            return Err(AppError::Config("agent.command must not be empty".into()));
        }
        if self.session.resume_window_seconds == 0 {
            return Err(AppError::Config(
                "session.resume_window_seconds must be greater than zero".into(),
            ));
        }
        if self.session.sweep_interval_seconds == 0 {
            return Err(AppError::Config(
                "session.sweep_interval_seconds must be greater than zero".into(),
            ));
        }
        if self.approval.timeout_seconds == 0 {
            return Err(AppError::Config(
                "approval.timeout_seconds must be greater than zero".into(),
            ));
        }

        let mut names: Vec<&str> = self.repositories.iter().map(|r| r.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        if names.len() != self.repositories.len() {
            return Err(AppError::Config(
                "repository names must be unique".into(),
            ));
        }

        Ok(())
    }
}
