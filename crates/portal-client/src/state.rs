//! Connection state types.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// Connection state as seen by the reconnection supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected and not trying to be.
    Disconnected,
    /// First connection attempt in progress.
    Connecting,
    /// Connected.
    Connected,
    /// Connection lost or refused, a reopen is pending or in progress.
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

/// Atomic wrapper for connection state.
#[derive(Debug)]
pub struct AtomicConnectionState(AtomicU32);

impl AtomicConnectionState {
    /// Create a new atomic state.
    #[must_use]
    pub const fn new(state: ConnectionState) -> Self {
        Self(AtomicU32::new(state as u32))
    }

    /// Load the current state.
    #[must_use]
    pub fn load(&self) -> ConnectionState {
        match self.0.load(Ordering::SeqCst) {
            0 => ConnectionState::Disconnected,
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            _ => ConnectionState::Reconnecting,
        }
    }

    /// Store a new state.
    pub fn store(&self, state: ConnectionState) {
        self.0.store(state as u32, Ordering::SeqCst);
    }

    /// Store `new` only if the current state is `current`.
    pub fn transition(&self, current: ConnectionState, new: ConnectionState) -> bool {
        self.0
            .compare_exchange(current as u32, new as u32, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_enum() {
        assert_eq!(ConnectionState::Disconnected as u32, 0);
        assert_eq!(ConnectionState::Connecting as u32, 1);
        assert_eq!(ConnectionState::Connected as u32, 2);
        assert_eq!(ConnectionState::Reconnecting as u32, 3);
    }

    #[test]
    fn test_atomic_connection_state() {
        let state = AtomicConnectionState::new(ConnectionState::Disconnected);
        assert_eq!(state.load(), ConnectionState::Disconnected);

        state.store(ConnectionState::Connecting);
        assert_eq!(state.load(), ConnectionState::Connecting);

        state.store(ConnectionState::Reconnecting);
        assert_eq!(state.load(), ConnectionState::Reconnecting);
    }

    #[test]
    fn test_transition_only_from_expected_state() {
        let state = AtomicConnectionState::new(ConnectionState::Disconnected);
        assert!(state.transition(ConnectionState::Disconnected, ConnectionState::Connecting));
        assert!(!state.transition(ConnectionState::Disconnected, ConnectionState::Connected));
        assert_eq!(state.load(), ConnectionState::Connecting);
    }

    #[test]
    fn test_display() {
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
    }
}
