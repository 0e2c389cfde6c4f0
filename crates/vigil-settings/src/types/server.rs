//! Server network and connection settings.

use serde::{Deserialize, Serialize};

/// Listener and per-connection limits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port (`0` picks an ephemeral port).
    pub port: u16,
    /// Interval between WebSocket pings, in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// A connection silent for this long is closed, in milliseconds.
    pub heartbeat_timeout_ms: u64,
    /// Interval between stale-session sweeps, in milliseconds.
    pub sweep_interval_ms: u64,
    /// Upgrade requests beyond this many live sockets get `503`.
    pub max_connections: usize,
    /// Largest accepted WebSocket frame, in bytes.
    pub max_message_size: usize,
    /// Outbound frames buffered per connection before new ones are dropped.
    pub send_queue_capacity: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 90_000,
            sweep_interval_ms: 30_000,
            max_connections: 1000,
            max_message_size: 1024 * 1024,
            send_queue_capacity: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = ServerSettings::default();
        assert_eq!(s.host, "0.0.0.0");
        assert_eq!(s.port, 8080);
        assert_eq!(s.heartbeat_interval_ms, 30_000);
        assert_eq!(s.heartbeat_timeout_ms, 90_000);
        assert_eq!(s.max_message_size, 1_048_576);
        assert_eq!(s.send_queue_capacity, 256);
    }
}
