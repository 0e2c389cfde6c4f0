//! Message router: applies one decoded frame to relay state.
//!
//! Handlers return `Result<(), RelayError>`; an `Err` becomes an `error`
//! frame to the sender only, and the connection keeps going.

use std::collections::HashSet;
use std::sync::Arc;

use metrics::{counter, gauge};
use tracing::{debug, info, instrument};
use vigil_core::protocol::{
    AuthRequest, AuthRole, GlobalProblemsRequest, InboundMessage, RelayEvent, SnapshotRequest,
    TelemetryFrame,
};
use vigil_core::records::{BulletinRecord, Problem, RecordDefaults, Suggestion, Visibility};
use vigil_core::{RelayError, SessionId, UserId, now_ms};

use super::registry::{EndedSession, SessionRegistry};
use super::state::ConnectionState;
use super::store::{InsertOutcome, RecordStore};
use crate::metrics::{
    RECORDS_DUPLICATE_TOTAL, RECORDS_INSERTED_TOTAL, RELAY_ERRORS_TOTAL, SESSIONS_ACTIVE,
    SESSIONS_CREATED_TOTAL, TELEMETRY_DROPPED_TOTAL, TELEMETRY_RELAYED_TOTAL,
};
use crate::websocket::broadcast::{BroadcastManager, deliver};
use crate::websocket::connection::ClientConnection;

/// Notice sent to a member right after it joins.
pub const INSPECTOR_JOINED_MESSAGE: &str = "An inspector is monitoring this session";

/// Notice sent to members when their session ends.
pub const INSPECTOR_ENDED_MESSAGE: &str = "The inspector has ended the session";

const MS_PER_DAY: i64 = 86_400_000;

/// Routes inbound frames to the registry, the bulletin stores, and the
/// broadcast engine.
pub struct MessageRouter {
    registry: Arc<SessionRegistry>,
    problems: RecordStore<Problem>,
    suggestions: RecordStore<Suggestion>,
    broadcast: Arc<BroadcastManager>,
}

impl MessageRouter {
    /// Create a router with empty bulletin stores.
    pub fn new(registry: Arc<SessionRegistry>, broadcast: Arc<BroadcastManager>) -> Self {
        Self {
            registry,
            problems: RecordStore::new(),
            suggestions: RecordStore::new(),
            broadcast,
        }
    }

    /// The session registry.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Stored problems.
    pub fn problems(&self) -> &RecordStore<Problem> {
        &self.problems
    }

    /// Stored suggestions.
    pub fn suggestions(&self) -> &RecordStore<Suggestion> {
        &self.suggestions
    }

    /// Apply one frame from `conn`.
    #[instrument(skip_all, fields(conn_id = %conn.id, kind = message.kind()))]
    pub async fn handle(
        &self,
        conn: &Arc<ClientConnection>,
        state: &mut ConnectionState,
        message: InboundMessage,
    ) {
        let result = match message {
            InboundMessage::Auth(auth) => self.handle_auth(conn, state, &auth),
            InboundMessage::Telemetry(frame) => {
                self.relay_telemetry(state, frame);
                Ok(())
            }
            InboundMessage::ProblemCreate(problem) => {
                self.publish(&self.problems, problem, state, |problem| {
                    RelayEvent::ProblemCreated { problem }
                })
                .await;
                Ok(())
            }
            InboundMessage::SuggestionCreate(suggestion) => {
                self.publish(&self.suggestions, suggestion, state, |suggestion| {
                    RelayEvent::SuggestionCreated { suggestion }
                })
                .await;
                Ok(())
            }
            InboundMessage::GlobalProblems(request) => {
                self.global_problems(conn, &request);
                Ok(())
            }
            InboundMessage::InspectorSnapshot(request) => self.request_snapshot(conn, state, request),
            InboundMessage::InspectorLeave => self.inspector_leave(state),
            InboundMessage::Unknown(kind) => {
                debug!(kind, "ignoring unknown frame type");
                Ok(())
            }
        };

        if let Err(err) = result {
            debug!(error = %err, role = state.role(), "request rejected");
            counter!(RELAY_ERRORS_TOTAL).increment(1);
            let _ = conn.send_json(&RelayEvent::error(&err));
        }
    }

    /// Reconcile the registry after `conn` has gone away.
    pub fn disconnect(&self, conn: &ClientConnection, state: &ConnectionState) {
        match state {
            ConnectionState::Inspector { session_id, .. } => {
                if let Some(ended) = self.registry.end(session_id) {
                    info!(session_id = %session_id, "inspector disconnected, session ended");
                    announce_end(&ended);
                }
            }
            ConnectionState::Member {
                user_id,
                session_id,
                ..
            } => self.leave_session(conn, user_id, session_id),
            ConnectionState::Unauthenticated | ConnectionState::Anonymous { .. } => {}
        }
    }

    // ── auth ────────────────────────────────────────────────────────

    fn handle_auth(
        &self,
        conn: &Arc<ClientConnection>,
        state: &mut ConnectionState,
        auth: &AuthRequest,
    ) -> Result<(), RelayError> {
        match state {
            ConnectionState::Inspector { session_id, .. } if self.registry.contains(session_id) => {
                return Err(RelayError::AlreadyInspecting(session_id.clone()));
            }
            ConnectionState::Member {
                user_id,
                session_id,
                ..
            } => {
                self.leave_session(conn, user_id, session_id);
                state.detach();
            }
            _ => {}
        }

        let user_id = auth
            .user_id
            .clone()
            .map(UserId::from)
            .or_else(|| state.user_id().cloned())
            .unwrap_or_else(UserId::generate);

        match (auth.role(), auth.session_id.clone()) {
            (AuthRole::Inspector, _) => {
                let session_id = self.registry.create(conn, user_id.clone());
                info!(session_id = %session_id, user_id = %user_id, "session started");
                counter!(SESSIONS_CREATED_TOTAL).increment(1);
                gauge!(SESSIONS_ACTIVE).increment(1.0);
                *state = ConnectionState::Inspector {
                    user_id,
                    session_id: session_id.clone(),
                };
                let _ = conn.send_json(&RelayEvent::SessionStarted { session_id });
                Ok(())
            }
            (AuthRole::Client, Some(session_id)) => {
                let session_id = SessionId::from(session_id);
                let display_name = auth.display_name();
                *state = ConnectionState::Anonymous {
                    user_id: user_id.clone(),
                };
                let inspector = self.registry.join(
                    &session_id,
                    user_id.clone(),
                    display_name.clone(),
                    Arc::clone(conn),
                )?;
                info!(session_id = %session_id, user_id = %user_id, "member joined");
                *state = ConnectionState::Member {
                    user_id: user_id.clone(),
                    session_id: session_id.clone(),
                    display_name: display_name.clone(),
                };
                let _ = conn.send_json(&RelayEvent::Joined { session_id });
                let _ = conn.send_json(&RelayEvent::InspectorJoined {
                    message: INSPECTOR_JOINED_MESSAGE.to_owned(),
                });
                let _ = inspector.send_json(&RelayEvent::MemberJoined {
                    user_id,
                    display_name,
                });
                Ok(())
            }
            _ => {
                debug!(user_id = %user_id, "anonymous client authenticated");
                *state = ConnectionState::Anonymous { user_id };
                Ok(())
            }
        }
    }

    fn leave_session(&self, conn: &ClientConnection, user_id: &UserId, session_id: &SessionId) {
        let Some(departed) = self.registry.leave(session_id, user_id, &conn.id) else {
            return;
        };
        info!(session_id = %session_id, user_id = %user_id, "member left");
        if let Some(inspector) = departed.inspector {
            let _ = inspector.send_json(&RelayEvent::MemberLeft {
                user_id: user_id.clone(),
                display_name: departed.display_name,
            });
        }
    }

    fn inspector_leave(&self, state: &mut ConnectionState) -> Result<(), RelayError> {
        let ConnectionState::Inspector { session_id, .. } = &*state else {
            return Err(RelayError::NotSessionInspector);
        };
        if let Some(ended) = self.registry.end(session_id) {
            info!(session_id = %session_id, "inspector left, session ended");
            announce_end(&ended);
        }
        state.detach();
        Ok(())
    }

    // ── telemetry ───────────────────────────────────────────────────

    fn relay_telemetry(&self, state: &ConnectionState, frame: TelemetryFrame) {
        let Some(session_id) = frame
            .session_id
            .clone()
            .or_else(|| state.session_id().cloned())
        else {
            debug!(kind = %frame.kind, "telemetry without a session, dropping");
            counter!(TELEMETRY_DROPPED_TOTAL).increment(1);
            return;
        };
        let Some(inspector) = self.registry.inspector_of(&session_id) else {
            debug!(kind = %frame.kind, session_id = %session_id, "no live inspector, dropping telemetry");
            counter!(TELEMETRY_DROPPED_TOTAL).increment(1);
            return;
        };

        let envelope = frame.into_envelope(
            session_id,
            state.user_id().cloned(),
            state.display_name().map(str::to_owned),
            now_ms(),
        );
        if inspector.send_json(&envelope) {
            counter!(TELEMETRY_RELAYED_TOTAL).increment(1);
        } else {
            counter!(TELEMETRY_DROPPED_TOTAL).increment(1);
        }
    }

    // ── bulletin board ──────────────────────────────────────────────

    async fn publish<T: BulletinRecord>(
        &self,
        store: &RecordStore<T>,
        mut record: T,
        state: &ConnectionState,
        event: impl FnOnce(T) -> RelayEvent,
    ) {
        record.normalize(&RecordDefaults {
            owner_id: state.user_id().map(UserId::as_str),
            session_id: state.session_id().map(SessionId::as_str),
            now_ms: now_ms(),
        });

        match store.insert(record.clone()) {
            InsertOutcome::Inserted => {
                counter!(RECORDS_INSERTED_TOTAL, "kind" => T::KIND).increment(1);
                debug!(kind = T::KIND, id = record.record_id(), "record stored");
                let _ = self.broadcast.broadcast_all(&event(record)).await;
            }
            InsertOutcome::AlreadyPresent => {
                counter!(RECORDS_DUPLICATE_TOTAL, "kind" => T::KIND).increment(1);
                debug!(kind = T::KIND, id = record.record_id(), "duplicate record ignored");
            }
        }
    }

    fn global_problems(&self, conn: &ClientConnection, request: &GlobalProblemsRequest) {
        let requested_days = request.window_days();
        let now = now_ms();
        let cutoff = now.saturating_sub(i64::from(requested_days) * MS_PER_DAY);

        let mut problems = self.problems.filter(|p| {
            p.visibility == Visibility::Public && p.timestamp.is_some_and(|ts| ts >= cutoff)
        });
        problems.sort_by_key(|p| p.timestamp);
        let ids: HashSet<&str> = problems.iter().map(|p| p.problem_id.as_str()).collect();
        let suggestions = self.suggestions.filter(|s| {
            s.visibility == Visibility::Public
                && s.problem_id.as_deref().is_some_and(|id| ids.contains(id))
        });

        debug!(
            requested_days,
            problems = problems.len(),
            suggestions = suggestions.len(),
            "global problems listed"
        );
        let _ = conn.send_json(&RelayEvent::GlobalProblems {
            problems,
            suggestions,
            requested_days,
            timestamp: now,
        });
    }

    // ── inspector ───────────────────────────────────────────────────

    fn request_snapshot(
        &self,
        conn: &ClientConnection,
        state: &ConnectionState,
        request: SnapshotRequest,
    ) -> Result<(), RelayError> {
        let session_id = request
            .session_id
            .map(SessionId::from)
            .or_else(|| state.session_id().cloned())
            .ok_or(RelayError::NotSessionInspector)?;
        if !self.registry.is_inspector(&session_id, &conn.id) {
            return Err(RelayError::NotSessionInspector);
        }

        let members = self.registry.members_of(&session_id);
        let delivery = deliver(&members, &RelayEvent::RequestSnapshot { session_id });
        debug!(
            delivered = delivery.delivered,
            failed = delivery.failed,
            "snapshot requested"
        );
        Ok(())
    }
}

/// Tell every member of an ended session that it is over.
pub fn announce_end(ended: &EndedSession) {
    gauge!(SESSIONS_ACTIVE).decrement(1.0);
    let members: Vec<_> = ended.members.iter().map(|(_, m)| &m.connection).collect();
    let delivery = deliver(
        members,
        &RelayEvent::InspectorEnded {
            message: INSPECTOR_ENDED_MESSAGE.to_owned(),
        },
    );
    debug!(
        session_id = %ended.id,
        members = ended.members.len(),
        failed = delivery.failed,
        lifetime_secs = ended.lifetime.as_secs(),
        "session end announced"
    );
}
