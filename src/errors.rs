//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Persistence failure when interacting with `SQLite`.
    Db(String),
    /// Slack API or Socket Mode failure.
    Slack(String),
    /// MCP protocol or tool dispatch failure.
    Mcp(String),
    /// Agent child process spawn, stream, or teardown failure.
    Process(String),
    /// Approval correlation or resolution failure.
    Approval(String),
    /// Git worktree creation or removal failure.
    Worktree(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Db(msg) => write!(f, "db: {msg}"),
            Self::Slack(msg) => write!(f, "slack: {msg}"),
            Self::Mcp(msg) => write!(f, "mcp: {msg}"),
            Self::Process(msg) => write!(f, "process: {msg}"),
            Self::Approval(msg) => write!(f, "approval: {msg}"),
            Self::Worktree(msg) => write!(f, "worktree: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
