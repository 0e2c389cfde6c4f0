//! # vigil-server
//!
//! Axum WebSocket relay between inspectors and the clients they monitor.
//!
//! - `WebSocket` gateway: connection handles, heartbeat, per-connection receive loop
//! - Relay: connection role state machine, session registry, bulletin stores,
//!   message router, liveness sweep
//! - HTTP endpoints: `/health`, `/metrics`
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod metrics;
pub mod relay;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use server::RelayServer;
