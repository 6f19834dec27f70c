//! In-process transport.
//!
//! Nothing leaves the process: emitted events are recorded, and the owner
//! plays the peer by injecting lifecycle and application events.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use portal_proto::{events, CallEnvelope, EventFrame, ResponseEnvelope};
use serde_json::Value;

use crate::error::TransportError;

use super::listeners::{Handler, ListenerId, Listeners};
use super::Transport;

/// A transport whose peer is the test or embedder holding it.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    listeners: Listeners,
    connected: AtomicBool,
    refuse_emits: AtomicBool,
    opens: AtomicUsize,
    closes: AtomicUsize,
    discards: AtomicUsize,
    sent: Mutex<Vec<EventFrame>>,
}

impl MemoryTransport {
    /// Create a disconnected transport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the connection as established and deliver `connect`.
    pub fn connect(&self) {
        self.connected.store(true, Ordering::SeqCst);
        self.listeners.dispatch(events::CONNECT, &[]);
    }

    /// Deliver `connect_error` with `message`.
    pub fn fail_connect(&self, message: &str) {
        self.connected.store(false, Ordering::SeqCst);
        self.listeners
            .dispatch(events::CONNECT_ERROR, &[Value::from(message)]);
    }

    /// Drop the connection and deliver `disconnect` with `reason`.
    pub fn disconnect(&self, reason: &str) {
        self.connected.store(false, Ordering::SeqCst);
        self.listeners
            .dispatch(events::DISCONNECT, &[Value::from(reason)]);
    }

    /// Deliver a `respond` event carrying `response`.
    ///
    /// # Errors
    ///
    /// Returns an error if the response cannot be encoded.
    pub fn respond(&self, response: &ResponseEnvelope) -> Result<usize, TransportError> {
        let frame = EventFrame::respond(response).map_err(|e| TransportError::Encode(e.to_string()))?;
        Ok(self.inject(&frame.event, &frame.args))
    }

    /// Deliver an arbitrary event, returning the number of handlers invoked.
    pub fn inject(&self, event: &str, args: &[Value]) -> usize {
        self.listeners.dispatch(event, args)
    }

    /// Make subsequent emits fail as if the transport were shut down.
    pub fn refuse_emits(&self, refuse: bool) {
        self.refuse_emits.store(refuse, Ordering::SeqCst);
    }

    /// Every frame emitted so far.
    #[must_use]
    pub fn sent(&self) -> Vec<EventFrame> {
        self.sent.lock().clone()
    }

    /// Emitted `call` events decoded as `(service, envelope)` pairs.
    #[must_use]
    pub fn sent_calls(&self) -> Vec<(String, CallEnvelope)> {
        self.sent
            .lock()
            .iter()
            .filter(|frame| frame.event == events::CALL)
            .filter_map(|frame| match frame.args.as_slice() {
                [Value::String(service), envelope] => serde_json::from_value(envelope.clone())
                    .ok()
                    .map(|envelope| (service.clone(), envelope)),
                _ => None,
            })
            .collect()
    }

    /// Most recent `call` event, if any.
    #[must_use]
    pub fn last_call(&self) -> Option<(String, CallEnvelope)> {
        self.sent_calls().pop()
    }

    /// Number of `open` requests received.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Number of `close` requests received.
    #[must_use]
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Number of `discard_queued` requests received.
    #[must_use]
    pub fn discard_count(&self) -> usize {
        self.discards.load(Ordering::SeqCst)
    }

    /// Number of handlers registered for `event`.
    #[must_use]
    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners.count(event)
    }
}

impl Transport for MemoryTransport {
    fn open(&self) {
        self.opens.fetch_add(1, Ordering::SeqCst);
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.connected.swap(false, Ordering::SeqCst) {
            self.listeners.dispatch(
                events::DISCONNECT,
                &[Value::from(events::CLIENT_CLOSE_REASON)],
            );
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn emit(&self, event: &str, args: Vec<Value>) -> Result<(), TransportError> {
        if self.refuse_emits.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.sent.lock().push(EventFrame::new(event, args));
        Ok(())
    }

    fn discard_queued(&self) {
        self.discards.fetch_add(1, Ordering::SeqCst);
    }

    fn on(&self, event: &str, handler: Handler) -> ListenerId {
        self.listeners.on(event, handler)
    }

    fn once(&self, event: &str, handler: Handler) -> ListenerId {
        self.listeners.once(event, handler)
    }

    fn off(&self, event: &str, id: Option<ListenerId>) {
        self.listeners.off(event, id);
    }
}
