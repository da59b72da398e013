//! Approval control plane: the pending-approval broker, the MCP server the
//! agent child connects back to, and its HTTP transport.

pub mod broker;
pub mod http;
pub mod server;
pub mod tools;
