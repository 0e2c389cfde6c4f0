//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Call once at startup,
/// before any metric is recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// A handle backed by a recorder that is not installed globally.
///
/// Renders an empty exposition; for tests and embedders that bring their own recorder.
pub fn detached_handle() -> PrometheusHandle {
    PrometheusBuilder::new().build_recorder().handle()
}

// Metric name constants to avoid typos across modules.

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter, labels: reason).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// WebSocket connection lifetime seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Upgrade requests refused (counter, labels: reason).
pub const WS_UPGRADES_REJECTED_TOTAL: &str = "ws_upgrades_rejected_total";
/// Frames dropped because a send queue was full or closed (counter).
pub const WS_SEND_DROPS_TOTAL: &str = "ws_send_drops_total";
/// Fan-out recipients skipped (counter).
pub const WS_BROADCAST_DROPS_TOTAL: &str = "ws_broadcast_drops_total";
/// Inbound frames that failed to decode (counter).
pub const WS_FRAMES_REJECTED_TOTAL: &str = "ws_frames_rejected_total";
/// Telemetry frames delivered to an inspector (counter).
pub const TELEMETRY_RELAYED_TOTAL: &str = "telemetry_relayed_total";
/// Telemetry frames with no reachable inspector (counter).
pub const TELEMETRY_DROPPED_TOTAL: &str = "telemetry_dropped_total";
/// Bulletin records stored (counter, labels: kind).
pub const RECORDS_INSERTED_TOTAL: &str = "records_inserted_total";
/// Bulletin records ignored as duplicates (counter, labels: kind).
pub const RECORDS_DUPLICATE_TOTAL: &str = "records_duplicate_total";
/// Sessions created (counter).
pub const SESSIONS_CREATED_TOTAL: &str = "sessions_created_total";
/// Live sessions (gauge).
pub const SESSIONS_ACTIVE: &str = "sessions_active";
/// Sessions ended by the liveness sweep (counter).
pub const SESSIONS_RECLAIMED_TOTAL: &str = "sessions_reclaimed_total";
/// `error` frames sent (counter).
pub const RELAY_ERRORS_TOTAL: &str = "relay_errors_total";
