//! Error types shared by the relay.
//!
//! [`ProtocolError`] covers frames that cannot be decoded; they are dropped
//! without a reply. [`RelayError`] covers well-formed requests that need state
//! which does not exist; its `Display` text becomes the `message` of the
//! `error` frame sent back to the offending connection.

use thiserror::Error;

use crate::ids::SessionId;

/// A frame that could not be decoded into an [`InboundMessage`](crate::protocol::InboundMessage).
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame is not valid JSON.
    #[error("invalid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
    /// The frame is JSON but not an object.
    #[error("frame is not a JSON object")]
    NotAnObject,
    /// The object has no string `type` field.
    #[error("frame has no string `type` field")]
    MissingType,
    /// The object has a known `type` but its fields do not match.
    #[error("malformed `{kind}` frame: {source}")]
    Malformed {
        /// The declared frame type.
        kind: String,
        /// Underlying decode error.
        #[source]
        source: serde_json::Error,
    },
}

/// A logical failure reported back to the sender as an `error` frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    /// A client tried to join a session that is not registered.
    #[error("session not found")]
    SessionNotFound,
    /// The sender is not the registered inspector of the session.
    #[error("not the session inspector")]
    NotSessionInspector,
    /// An inspector tried to authenticate again while its session is live.
    #[error("already inspecting session {0}")]
    AlreadyInspecting(SessionId),
}
