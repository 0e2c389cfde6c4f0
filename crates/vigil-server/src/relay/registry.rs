//! Session registry: who inspects which session, and who is in it.
//!
//! Sessions hold only a weak reference to their inspector. A session whose
//! inspector handle has been dropped, or is no longer open, is stale and is
//! removed by [`SessionRegistry::reap_stale`]. Every removal path goes through
//! the write lock and hands back the removed members, so whichever caller
//! removes a session is the only one that notifies its members.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::RwLock;
use tracing::debug;
use vigil_core::{ConnectionId, RelayError, SessionId, UserId};

use crate::websocket::connection::ClientConnection;

/// A session participant.
#[derive(Clone)]
pub struct Member {
    /// The member's connection.
    pub connection: Arc<ClientConnection>,
    /// Name shown to the inspector.
    pub display_name: Option<String>,
}

struct Session {
    inspector: Weak<ClientConnection>,
    inspector_id: UserId,
    members: HashMap<UserId, Member>,
    created_at: Instant,
}

impl Session {
    fn live_inspector(&self) -> Option<Arc<ClientConnection>> {
        self.inspector.upgrade().filter(|c| c.is_open())
    }
}

/// A session removed from the registry, with the members to notify.
pub struct EndedSession {
    /// The removed session.
    pub id: SessionId,
    /// Identifier of its inspector.
    pub inspector_id: UserId,
    /// Members at the moment of removal.
    pub members: Vec<(UserId, Member)>,
    /// How long the session lived.
    pub lifetime: std::time::Duration,
}

/// A member removed by [`SessionRegistry::leave`].
pub struct DepartedMember {
    /// Name the member joined with.
    pub display_name: Option<String>,
    /// The session's inspector, if still live.
    pub inspector: Option<Arc<ClientConnection>>,
}

/// All live sessions.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Session>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new session led by `inspector` and return its ID.
    pub fn create(&self, inspector: &Arc<ClientConnection>, inspector_id: UserId) -> SessionId {
        let mut sessions = self.sessions.write();
        let mut id = SessionId::generate();
        while sessions.contains_key(&id) {
            id = SessionId::generate();
        }
        let _ = sessions.insert(
            id.clone(),
            Session {
                inspector: Arc::downgrade(inspector),
                inspector_id,
                members: HashMap::new(),
                created_at: Instant::now(),
            },
        );
        id
    }

    /// Add a member, replacing any entry with the same identifier.
    ///
    /// Returns the session's inspector. A session whose inspector is no
    /// longer live is treated as not found and left for the next sweep.
    pub fn join(
        &self,
        session_id: &SessionId,
        user_id: UserId,
        display_name: Option<String>,
        connection: Arc<ClientConnection>,
    ) -> Result<Arc<ClientConnection>, RelayError> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(session_id)
            .ok_or(RelayError::SessionNotFound)?;
        let Some(inspector) = session.live_inspector() else {
            debug!(session_id = %session_id, user_id = %user_id, "join refused, inspector gone");
            return Err(RelayError::SessionNotFound);
        };
        if let Some(previous) = session.members.insert(
            user_id.clone(),
            Member {
                connection,
                display_name,
            },
        ) {
            debug!(
                session_id = %session_id,
                user_id = %user_id,
                replaced_conn = %previous.connection.id,
                "member entry replaced"
            );
        }
        Ok(inspector)
    }

    /// Remove a member, but only if the stored entry belongs to `connection_id`.
    pub fn leave(
        &self,
        session_id: &SessionId,
        user_id: &UserId,
        connection_id: &ConnectionId,
    ) -> Option<DepartedMember> {
        let mut sessions = self.sessions.write();
        let session = sessions.get_mut(session_id)?;
        let same_connection = session
            .members
            .get(user_id)
            .is_some_and(|m| &m.connection.id == connection_id);
        if !same_connection {
            return None;
        }
        let member = session.members.remove(user_id)?;
        Some(DepartedMember {
            display_name: member.display_name,
            inspector: session.live_inspector(),
        })
    }

    /// Remove a session.
    pub fn end(&self, session_id: &SessionId) -> Option<EndedSession> {
        let session = self.sessions.write().remove(session_id)?;
        Some(Self::ended(session_id.clone(), session))
    }

    /// Remove every session whose inspector is gone or closed.
    pub fn reap_stale(&self) -> Vec<EndedSession> {
        let mut sessions = self.sessions.write();
        let stale: Vec<SessionId> = sessions
            .iter()
            .filter(|(_, s)| s.live_inspector().is_none())
            .map(|(id, _)| id.clone())
            .collect();
        stale
            .into_iter()
            .filter_map(|id| {
                let session = sessions.remove(&id)?;
                Some(Self::ended(id, session))
            })
            .collect()
    }

    fn ended(id: SessionId, session: Session) -> EndedSession {
        EndedSession {
            id,
            inspector_id: session.inspector_id,
            members: session.members.into_iter().collect(),
            lifetime: session.created_at.elapsed(),
        }
    }

    /// The session's inspector, if live.
    pub fn inspector_of(&self, session_id: &SessionId) -> Option<Arc<ClientConnection>> {
        self.sessions.read().get(session_id)?.live_inspector()
    }

    /// Whether `connection_id` is the registered inspector of the session.
    pub fn is_inspector(&self, session_id: &SessionId, connection_id: &ConnectionId) -> bool {
        self.sessions
            .read()
            .get(session_id)
            .and_then(|s| s.inspector.upgrade())
            .is_some_and(|c| &c.id == connection_id)
    }

    /// Current members' connections.
    pub fn members_of(&self, session_id: &SessionId) -> Vec<Arc<ClientConnection>> {
        self.sessions
            .read()
            .get(session_id)
            .map(|s| s.members.values().map(|m| Arc::clone(&m.connection)).collect())
            .unwrap_or_default()
    }

    /// Whether the session exists.
    pub fn contains(&self, session_id: &SessionId) -> bool {
        self.sessions.read().contains_key(session_id)
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Whether there are no sessions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
