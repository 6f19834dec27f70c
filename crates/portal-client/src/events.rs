//! Connection lifecycle notifications.

use std::time::Duration;

/// Events broadcast by the reconnection supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Connection established.
    Connected,
    /// A connection attempt failed.
    ConnectFailed {
        /// Transport error message.
        message: String,
    },
    /// An established connection was lost.
    Disconnected {
        /// Reason reported by the transport.
        reason: String,
    },
    /// A reopen was scheduled.
    Reconnecting {
        /// Delay before the reopen.
        delay: Duration,
    },
}
