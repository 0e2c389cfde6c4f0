//! `/health` endpoint body.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"`, or `"shutting_down"` once shutdown has begun.
    pub status: &'static str,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Current WebSocket connection count.
    pub connections: usize,
    /// Live inspector sessions.
    pub active_sessions: usize,
    /// Stored problems.
    pub problems: usize,
    /// Stored suggestions.
    pub suggestions: usize,
}

/// Live counters reported by `/health`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelayCounts {
    /// Open WebSocket connections.
    pub connections: usize,
    /// Live sessions.
    pub sessions: usize,
    /// Stored problems.
    pub problems: usize,
    /// Stored suggestions.
    pub suggestions: usize,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, counts: RelayCounts, shutting_down: bool) -> HealthResponse {
    HealthResponse {
        status: if shutting_down { "shutting_down" } else { "ok" },
        uptime_secs: start_time.elapsed().as_secs(),
        connections: counts.connections,
        active_sessions: counts.sessions,
        problems: counts.problems,
        suggestions: counts.suggestions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_ok() {
        let resp = health_check(Instant::now(), RelayCounts::default(), false);
        assert_eq!(resp.status, "ok");
        assert!(resp.uptime_secs < 2);
    }

    #[test]
    fn status_reflects_shutdown() {
        let resp = health_check(Instant::now(), RelayCounts::default(), true);
        assert_eq!(resp.status, "shutting_down");
    }

    #[test]
    fn uptime_increases() {
        let start = Instant::now()
            .checked_sub(std::time::Duration::from_secs(60))
            .unwrap();
        let resp = health_check(start, RelayCounts::default(), false);
        assert!(resp.uptime_secs >= 59);
    }

    #[test]
    fn serialization() {
        let counts = RelayCounts {
            connections: 2,
            sessions: 1,
            problems: 4,
            suggestions: 3,
        };
        let json = serde_json::to_value(health_check(Instant::now(), counts, false)).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["connections"], 2);
        assert_eq!(json["active_sessions"], 1);
        assert_eq!(json["problems"], 4);
        assert_eq!(json["suggestions"], 3);
        assert!(json["uptime_secs"].is_number());
    }
}
