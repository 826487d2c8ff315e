//! Client connection state

use std::fmt;

/// Connection lifecycle state. Exactly one value is active at a time,
/// owned by the client session object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and no retry pending
    Disconnected,
    /// A connect cycle (socket + device open) is in progress
    Connecting,
    /// Channel open, device open, forwarding loops running
    Connected,
    /// Connection lost; the backoff retry loop is active
    Reconnecting,
    /// The last connect attempt failed; waiting for the user (or an
    /// in-flight retry) to drive the next attempt
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Reconnecting => "Reconnecting",
            ConnectionState::Error => "Error",
        };
        f.write_str(label)
    }
}
