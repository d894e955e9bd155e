// Connection configuration.
//
// Plain struct with a `Default`, handed to `NetworkConnection` at
// construction. The handshake version lives here rather than in a global so
// tests can connect with a deliberately wrong one. Deserializable with
// missing fields falling back to defaults, so it can sit inside a larger
// JSON settings file.

use std::time::Duration;

use lockstep_protocol::DEFAULT_PROTOCOL_VERSION;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Handshake version the server must report.
    pub protocol_version: i32,
    /// How long the connect race waits for a winner. High enough latency to
    /// exceed this makes the game unplayable anyway.
    pub connect_timeout: Duration,
    /// Read timeout while waiting for the handshake preamble.
    pub handshake_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            protocol_version: DEFAULT_PROTOCOL_VERSION,
            connect_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(5),
        }
    }
}
