//! Slack integration: the `ChatGateway` contract, the Socket Mode client
//! implementing it, Block Kit builders, and inbound event dispatch.

pub mod blocks;
pub mod client;
pub mod events;
pub mod gateway;
pub mod handlers;
