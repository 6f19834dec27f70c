//! Duplex event transport.
//!
//! A transport moves named events with JSON arguments in both directions and
//! reports its own lifecycle as the `connect`, `connect_error` and
//! `disconnect` events. It carries no RPC logic; correlation and retry policy
//! live in [`crate::correlator`] and [`crate::supervisor`].

mod listeners;
pub mod memory;
pub mod ws;

use std::sync::Arc;

use serde_json::Value;

use crate::error::TransportError;

pub use listeners::{Handler, ListenerId, Listeners};
pub use memory::MemoryTransport;
pub use ws::WsTransport;

/// An event-based duplex connection.
///
/// Handlers are invoked serially from the task that owns the connection, in
/// registration order. `open` and `close` never block; their outcome is
/// reported through lifecycle events.
pub trait Transport: Send + Sync {
    /// Start connecting. Does nothing if a connection is live or in progress.
    fn open(&self);

    /// Close the connection. A live connection reports `disconnect`.
    fn close(&self);

    /// Whether a connection is currently established.
    fn is_connected(&self) -> bool;

    /// Send an event to the peer.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport can no longer accept events.
    fn emit(&self, event: &str, args: Vec<Value>) -> Result<(), TransportError>;

    /// Drop every event emitted so far that has not reached the peer yet.
    ///
    /// Transports that hand events over synchronously have nothing to drop.
    fn discard_queued(&self) {}

    /// Register a handler for every delivery of `event`.
    fn on(&self, event: &str, handler: Handler) -> ListenerId;

    /// Register a handler for the next delivery of `event` only.
    fn once(&self, event: &str, handler: Handler) -> ListenerId;

    /// Remove one handler, or every handler of `event` when `id` is `None`.
    fn off(&self, event: &str, id: Option<ListenerId>);
}

/// Wrap a closure as a transport [`Handler`].
pub fn handler<F>(f: F) -> Handler
where
    F: Fn(&[Value]) + Send + Sync + 'static,
{
    Arc::new(f)
}
