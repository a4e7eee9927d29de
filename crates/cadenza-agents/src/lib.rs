//! # Cadenza Agents
//!
//! HTTP transport for remote agents: well-known card discovery with a
//! process-lifetime cache, and the JSON-RPC 2.0 `message/send` envelope with
//! Message / Task / payment-challenge decoding.

mod card;
mod client;

pub use card::{card_url, AgentCard, CardCache, CARD_PATH};
pub use client::HttpAgentTransport;
