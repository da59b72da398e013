//! Process Adapter — owns one agent child process and converts its
//! line-delimited JSON streams into typed events.

pub mod adapter;
pub mod codec;
pub mod protocol;

pub use adapter::{AgentAdapter, AgentEvent, SpawnOptions};
