//! Inbound frame dispatch: decode once, then hand to the router.

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, instrument};
use vigil_core::protocol::InboundMessage;

use super::connection::ClientConnection;
use crate::metrics::WS_FRAMES_REJECTED_TOTAL;
use crate::relay::router::MessageRouter;
use crate::relay::state::ConnectionState;

/// What happened to one inbound frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// The frame decoded and was routed.
    Handled,
    /// The frame did not decode and was dropped without a reply.
    Dropped,
}

/// Handle an incoming WebSocket text frame.
#[instrument(skip_all, fields(conn_id = %connection.id, len = text.len()))]
pub async fn handle_message(
    text: &str,
    connection: &Arc<ClientConnection>,
    state: &mut ConnectionState,
    router: &MessageRouter,
) -> Dispatch {
    let message = match InboundMessage::decode(text) {
        Ok(message) => message,
        Err(e) => {
            debug!(error = %e, "dropping undecodable frame");
            counter!(WS_FRAMES_REJECTED_TOTAL).increment(1);
            return Dispatch::Dropped;
        }
    };
    router.handle(connection, state, message).await;
    Dispatch::Handled
}
