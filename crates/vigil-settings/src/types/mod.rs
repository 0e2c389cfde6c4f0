//! Settings type definitions.
//!
//! Field names are camelCase on disk. Every struct carries
//! `#[serde(default)]`, so a partial file only needs the keys it changes.

mod logging;
mod server;

pub use logging::*;
pub use server::*;

use serde::{Deserialize, Serialize};

/// Root settings type for the relay.
///
/// ```json
/// { "server": { "port": 9000 }, "logging": { "level": "debug" } }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VigilSettings {
    /// Network and connection-handling settings.
    pub server: ServerSettings,
    /// Log output settings.
    pub logging: LoggingSettings,
}
