//! Branded ID newtypes for type safety.
//!
//! Each identifier the relay hands out is a newtype around `String`, so a
//! session token can never be passed where a member identifier is expected.
//! Generated values are `<prefix>_<UUID v7>`; caller-supplied values (a
//! client's self-declared `userId`, a `sessionId` echoed back by a client) are
//! accepted verbatim through `From<String>`.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Prefix used for generated values.
            pub const PREFIX: &'static str = $prefix;

            /// Generate a new unique ID (`<prefix>_<uuid v7>`).
            #[must_use]
            pub fn generate() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::now_v7()))
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id! {
    /// Token identifying one inspector-led monitoring session.
    SessionId, "sess"
}

branded_id! {
    /// Participant identifier (self-declared `userId` or server-generated).
    UserId, "user"
}

branded_id! {
    /// Transport-level identifier for a single WebSocket connection.
    ConnectionId, "conn"
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generated_session_id_has_prefix_and_v7_suffix() {
        let id = SessionId::generate();
        let suffix = id.strip_prefix("sess_").expect("prefix");
        let parsed = Uuid::parse_str(suffix).expect("should be valid UUID");
        assert_eq!(parsed.get_version(), Some(uuid::Version::SortRand));
    }

    #[test]
    fn generated_user_and_connection_prefixes() {
        assert!(UserId::generate().starts_with("user_"));
        assert!(ConnectionId::generate().starts_with("conn_"));
    }

    #[test]
    fn generated_ids_are_unique() {
        let ids: HashSet<SessionId> = (0..1000).map(|_| SessionId::generate()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn from_str_ref() {
        let id = UserId::from("ann");
        assert_eq!(id.as_str(), "ann");
    }

    #[test]
    fn deref_to_str() {
        let id = SessionId::from("hello");
        let s: &str = &id;
        assert_eq!(s, "hello");
    }

    #[test]
    fn display() {
        let id = ConnectionId::from("display-me");
        assert_eq!(format!("{id}"), "display-me");
    }

    #[test]
    fn into_string() {
        let id = SessionId::from("convert");
        let s: String = id.into();
        assert_eq!(s, "convert");
    }

    #[test]
    fn borrow_allows_str_lookup() {
        let mut set = HashSet::new();
        let _ = set.insert(UserId::from("u1"));
        assert!(set.contains("u1"));
    }

    #[test]
    fn serde_is_transparent() {
        let id = SessionId::from("serde-test");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"serde-test\"");
        let back: SessionId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
