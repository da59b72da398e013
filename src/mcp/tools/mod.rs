//! MCP tool handlers.

pub mod approval_prompt;
