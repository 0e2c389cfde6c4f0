//! Relay semantics: connection roles, sessions, bulletin stores, and routing.

pub mod liveness;
pub mod registry;
pub mod router;
pub mod state;
pub mod store;
