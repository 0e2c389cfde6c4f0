//! # vigil-core
//!
//! Shared vocabulary for the Vigil monitoring relay.
//!
//! - **Branded IDs**: `SessionId`, `UserId`, `ConnectionId` as newtypes for type safety
//! - **Wire protocol**: `InboundMessage` (decoded once at the socket boundary) and
//!   `RelayEvent` (every server-to-client notification)
//! - **Bulletin records**: `Problem` and `Suggestion` with lenient decoding
//! - **Errors**: `ProtocolError` for undecodable frames, `RelayError` for logical failures
//! - **Logging**: `tracing` subscriber initialisation

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod logging;
pub mod protocol;
pub mod records;

pub use errors::{ProtocolError, RelayError};
pub use ids::{ConnectionId, SessionId, UserId};

/// Current wall-clock time as Unix epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
