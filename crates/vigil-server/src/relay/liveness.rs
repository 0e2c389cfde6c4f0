//! Periodic reclamation of sessions whose inspector has vanished.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::registry::SessionRegistry;
use super::router::announce_end;
use crate::metrics::SESSIONS_RECLAIMED_TOTAL;

/// Sweeps the registry on a fixed interval.
pub struct LivenessMonitor {
    registry: Arc<SessionRegistry>,
    interval: Duration,
}

impl LivenessMonitor {
    /// Create a monitor for `registry`.
    pub fn new(registry: Arc<SessionRegistry>, interval: Duration) -> Self {
        Self { registry, interval }
    }

    /// End every stale session and notify its members. Returns how many were ended.
    pub fn sweep(&self) -> usize {
        let ended = self.registry.reap_stale();
        for session in &ended {
            info!(
                session_id = %session.id,
                inspector_id = %session.inspector_id,
                members = session.members.len(),
                "reclaiming session with no live inspector"
            );
            announce_end(session);
        }
        if !ended.is_empty() {
            counter!(SESSIONS_RECLAIMED_TOTAL).increment(ended.len() as u64);
        }
        ended.len()
    }

    /// Sweep until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = time::interval_at(time::Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let _ = self.sweep();
                }
                () = cancel.cancelled() => {
                    debug!("liveness monitor stopped");
                    return;
                }
            }
        }
    }
}
