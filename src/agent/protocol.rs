//! Stream-JSON message taxonomy spoken by the agent child.
//!
//! The child emits one JSON object per stdout line, discriminated by a
//! `type` field. Each line is parsed twice: once to discover the type, then
//! into the specific variant, so an unknown type can be skipped without a
//! deserialization error.
//!
//! # Known message types
//!
//! | `type`      | Maps to                                   |
//! |-------------|-------------------------------------------|
//! | `system`    | [`AgentMessage::Init`] (`subtype: init`)  |
//! | `assistant` | [`AgentMessage::Assistant`]               |
//! | `user`      | [`AgentMessage::ToolResultEcho`]          |
//! | `result`    | [`AgentMessage::Result`]                  |
//! | *(other)*   | Skipped; logged at `DEBUG`                |

use serde::Deserialize;
use tracing::debug;

use crate::{AppError, Result};

/// `system`/`init` payload — the child's startup report.
#[derive(Debug, Clone, Deserialize)]
pub struct InitMessage {
    /// Definitive session identifier assigned by the child.
    pub session_id: String,
    /// Working directory the child runs in.
    #[serde(default)]
    pub cwd: Option<String>,
    /// Model name.
    #[serde(default)]
    pub model: Option<String>,
    /// Tools available to the child.
    #[serde(default)]
    pub tools: Vec<String>,
}

/// One block of an assistant message's ordered content sequence.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Visible prose.
    Text {
        /// The prose itself.
        text: String,
    },
    /// Internal deliberation; rendered subdued or suppressed.
    Thinking {
        /// The deliberation text.
        #[serde(default)]
        thinking: String,
    },
    /// Structured tool invocation.
    ToolUse {
        /// Invocation identifier.
        #[serde(default)]
        id: String,
        /// Tool name (e.g. `Bash`, `Edit`).
        name: String,
        /// Tool input mapping.
        #[serde(default)]
        input: serde_json::Value,
    },
    /// Block type this bridge does not render.
    #[serde(other)]
    Other,
}

/// Token usage block on a terminal result.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Usage {
    /// Input tokens consumed.
    #[serde(default)]
    pub input_tokens: i64,
    /// Output tokens produced.
    #[serde(default)]
    pub output_tokens: i64,
}

/// `result` payload — terminal message for one turn.
#[derive(Debug, Clone, Deserialize)]
pub struct ResultMessage {
    /// `success` or `error`.
    #[serde(default)]
    pub subtype: String,
    /// Whether the turn ended in error.
    #[serde(default)]
    pub is_error: bool,
    /// Wall-clock duration in milliseconds.
    #[serde(default)]
    pub duration_ms: i64,
    /// Conversation turns.
    #[serde(default)]
    pub num_turns: i64,
    /// Aggregated cost in USD.
    #[serde(default)]
    pub total_cost_usd: f64,
    /// Token usage.
    #[serde(default)]
    pub usage: Usage,
    /// Final result text, when present.
    #[serde(default)]
    pub result: Option<String>,
}

/// A parsed message from the child's stdout stream.
#[derive(Debug, Clone)]
pub enum AgentMessage {
    /// `system`/`init` — first message on every successful startup.
    Init(InitMessage),
    /// `assistant` — ordered content blocks.
    Assistant {
        /// Blocks in child-emission order.
        content: Vec<ContentBlock>,
    },
    /// `user` — tool-result echo, elided from the thread.
    ToolResultEcho,
    /// `result` — terminal for this turn.
    Result(ResultMessage),
}

// ── Wire envelopes ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    subtype: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AssistantEnvelope {
    message: AssistantBody,
}

#[derive(Debug, Deserialize)]
struct AssistantBody {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

/// Parse one stdout line into an [`AgentMessage`].
///
/// # Return value
///
/// - `Ok(Some(message))` — recognized, complete message.
/// - `Ok(None)` — blank line, unknown `type`, or a `system` message with a
///   subtype other than `init` (skipped; logged at `DEBUG`).
/// - `Err(AppError::Process(…))` — malformed JSON or a recognized type with
///   missing required fields. The caller logs and drops the line; a parse
///   error never tears the session down.
///
/// # Errors
///
/// See above; all errors are recoverable.
pub fn parse_line(line: &str) -> Result<Option<AgentMessage>> {
    if line.trim().is_empty() {
        return Ok(None);
    }

    let envelope: Envelope = serde_json::from_str(line)
        .map_err(|e| AppError::Process(format!("malformed stream json: {e}")))?;

    match envelope.kind.as_str() {
        "system" => {
            if envelope.subtype.as_deref() == Some("init") {
                let init: InitMessage = serde_json::from_str(line)
                    .map_err(|e| AppError::Process(format!("invalid init message: {e}")))?;
                Ok(Some(AgentMessage::Init(init)))
            } else {
                debug!(subtype = ?envelope.subtype, "skipping non-init system message");
                Ok(None)
            }
        }
        "assistant" => {
            let wrapped: AssistantEnvelope = serde_json::from_str(line)
                .map_err(|e| AppError::Process(format!("invalid assistant message: {e}")))?;
            Ok(Some(AgentMessage::Assistant {
                content: wrapped.message.content,
            }))
        }
        "user" => Ok(Some(AgentMessage::ToolResultEcho)),
        "result" => {
            let result: ResultMessage = serde_json::from_str(line)
                .map_err(|e| AppError::Process(format!("invalid result message: {e}")))?;
            Ok(Some(AgentMessage::Result(result)))
        }
        other => {
            debug!(kind = other, "skipping unknown stream message type");
            Ok(None)
        }
    }
}

/// Build the outbound user-message line for the child's stdin.
///
/// The returned string is a single JSON object; the adapter appends the
/// newline delimiter when writing.
#[must_use]
pub fn user_message(text: &str) -> serde_json::Value {
    serde_json::json!({
        "type": "user",
        "message": {
            "role": "user",
            "content": text,
        }
    })
}
