//! Frame fan-out to connected WebSocket clients.
//!
//! Frames are serialized once and shared as `Arc<String>` across recipients.
//! A recipient whose queue is full or closed is logged and skipped; the rest
//! of the fan-out continues.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::counter;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use vigil_core::ConnectionId;
use vigil_core::protocol::OutboundFrame;

use super::connection::ClientConnection;
use crate::metrics::WS_BROADCAST_DROPS_TOTAL;

/// Result of one fan-out.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Recipients whose queue accepted the frame.
    pub delivered: usize,
    /// Recipients that were skipped.
    pub failed: usize,
}

/// Serialize a frame for the wire.
pub fn encode<T: OutboundFrame>(frame: &T) -> Option<Arc<String>> {
    match serde_json::to_string(frame) {
        Ok(json) => Some(Arc::new(json)),
        Err(e) => {
            warn!(frame_type = frame.frame_type(), error = %e, "failed to serialize frame");
            None
        }
    }
}

/// Send one frame to each recipient, encoding it once.
pub fn deliver<'a, T, I>(recipients: I, frame: &T) -> Delivery
where
    T: OutboundFrame,
    I: IntoIterator<Item = &'a Arc<ClientConnection>>,
{
    let Some(json) = encode(frame) else {
        return Delivery::default();
    };
    let mut delivery = Delivery::default();
    for conn in recipients {
        if conn.send(Arc::clone(&json)) {
            delivery.delivered += 1;
        } else {
            delivery.failed += 1;
            counter!(WS_BROADCAST_DROPS_TOTAL).increment(1);
            warn!(
                conn_id = %conn.id,
                frame_type = frame.frame_type(),
                "failed to send frame to client"
            );
        }
    }
    delivery
}

/// Every live connection, for relay-wide notifications.
pub struct BroadcastManager {
    /// Connected clients indexed by connection ID.
    connections: RwLock<HashMap<ConnectionId, Arc<ClientConnection>>>,
}

impl BroadcastManager {
    /// Create a new broadcast manager.
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Add a connection.
    pub async fn add(&self, connection: Arc<ClientConnection>) {
        let mut conns = self.connections.write().await;
        let _ = conns.insert(connection.id.clone(), connection);
    }

    /// Remove a connection by ID.
    pub async fn remove(&self, connection_id: &ConnectionId) {
        let mut conns = self.connections.write().await;
        let _ = conns.remove(connection_id);
    }

    /// Broadcast a frame to all connections.
    pub async fn broadcast_all<T: OutboundFrame>(&self, frame: &T) -> Delivery {
        let conns = self.connections.read().await;
        let delivery = deliver(conns.values(), frame);
        debug!(
            frame_type = frame.frame_type(),
            recipients = conns.len(),
            failed = delivery.failed,
            "broadcast frame to all"
        );
        delivery
    }

    /// Number of active connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }
}

impl Default for BroadcastManager {
    fn default() -> Self {
        Self::new()
    }
}
