//! # ripple-server
//!
//! WebSocket broadcast relay: clients register a display name and every
//! later message is fanned out to all registered participants.
//!
//! - [`registry`]: ordered participant list and snapshot-then-enqueue fan-out
//! - [`websocket::dispatcher`]: per-connection relay state machine
//! - [`websocket::session`]: socket pump (reader, writer, heartbeat)
//! - [`server`]: Axum router (`/chat`, `/health`, `/metrics`, upgrade fallback)
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod health;
pub mod metrics;
pub mod page;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use errors::ServerError;
pub use registry::{Participant, Registry};
pub use server::RippleServer;
