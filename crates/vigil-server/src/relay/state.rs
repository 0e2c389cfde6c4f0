//! Per-connection role state machine.

use vigil_core::{SessionId, UserId};

/// What a connection has declared itself to be.
///
/// Owned by the connection's receive loop and replaced wholesale on each
/// transition, so a role and its session can never disagree.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// No `auth` frame processed yet.
    #[default]
    Unauthenticated,
    /// Authenticated but not part of any session.
    Anonymous {
        /// Self-declared or generated identifier.
        user_id: UserId,
    },
    /// Leads a live session.
    Inspector {
        /// Identifier used for the session's inspector.
        user_id: UserId,
        /// The session this connection created.
        session_id: SessionId,
    },
    /// Monitored participant of a session.
    Member {
        /// Member identifier (key in the session's member map).
        user_id: UserId,
        /// The joined session.
        session_id: SessionId,
        /// Name shown to the inspector.
        display_name: Option<String>,
    },
}

impl ConnectionState {
    /// Identifier, once authenticated.
    pub fn user_id(&self) -> Option<&UserId> {
        match self {
            Self::Unauthenticated => None,
            Self::Anonymous { user_id }
            | Self::Inspector { user_id, .. }
            | Self::Member { user_id, .. } => Some(user_id),
        }
    }

    /// Session the connection belongs to, as inspector or member.
    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            Self::Inspector { session_id, .. } | Self::Member { session_id, .. } => {
                Some(session_id)
            }
            Self::Unauthenticated | Self::Anonymous { .. } => None,
        }
    }

    /// Display name (members only).
    pub fn display_name(&self) -> Option<&str> {
        match self {
            Self::Member { display_name, .. } => display_name.as_deref(),
            _ => None,
        }
    }

    /// Short label for logs and metrics.
    pub fn role(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Anonymous { .. } => "anonymous",
            Self::Inspector { .. } => "inspector",
            Self::Member { .. } => "member",
        }
    }

    /// Drop session membership, keeping the identifier.
    pub fn detach(&mut self) {
        if let Self::Inspector { user_id, .. } | Self::Member { user_id, .. } = self {
            *self = Self::Anonymous {
                user_id: user_id.clone(),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member() -> ConnectionState {
        ConnectionState::Member {
            user_id: UserId::from("u1"),
            session_id: SessionId::from("s1"),
            display_name: Some("Ann".into()),
        }
    }

    #[test]
    fn starts_unauthenticated() {
        let state = ConnectionState::default();
        assert_eq!(state, ConnectionState::Unauthenticated);
        assert!(state.user_id().is_none());
        assert!(state.session_id().is_none());
        assert_eq!(state.role(), "unauthenticated");
    }

    #[test]
    fn member_accessors() {
        let state = member();
        assert_eq!(state.user_id().map(UserId::as_str), Some("u1"));
        assert_eq!(state.session_id().map(SessionId::as_str), Some("s1"));
        assert_eq!(state.display_name(), Some("Ann"));
    }

    #[test]
    fn inspector_has_no_display_name() {
        let state = ConnectionState::Inspector {
            user_id: UserId::from("i1"),
            session_id: SessionId::from("s1"),
        };
        assert!(state.display_name().is_none());
        assert_eq!(state.role(), "inspector");
    }

    #[test]
    fn detach_keeps_identifier() {
        let mut state = member();
        state.detach();
        assert_eq!(
            state,
            ConnectionState::Anonymous {
                user_id: UserId::from("u1")
            }
        );
    }

    #[test]
    fn detach_unauthenticated_is_noop() {
        let mut state = ConnectionState::Unauthenticated;
        state.detach();
        assert_eq!(state, ConnectionState::Unauthenticated);
    }
}
