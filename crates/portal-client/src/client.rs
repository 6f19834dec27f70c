//! Portal client.
//!
//! Wires a [`Transport`] to a [`Correlator`] and a [`Supervisor`] and exposes
//! the public call surface.

use std::sync::Arc;
use std::time::Duration;

use portal_proto::{events, CallEnvelope, CallOptions};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::info;

use crate::config::ClientConfig;
use crate::correlator::Correlator;
use crate::error::{CallError, ClientError};
use crate::events::ConnectionEvent;
use crate::facade::ServiceHandle;
use crate::state::ConnectionState;
use crate::supervisor::Supervisor;
use crate::transport::{handler, ListenerId, Transport, WsTransport};

/// A call/response RPC client.
///
/// Cloning is cheap; clones share one connection and one pending-call table.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    correlator: Arc<Correlator>,
    supervisor: Arc<Supervisor>,
    listeners: Vec<(&'static str, ListenerId)>,
}

impl Client {
    /// Create a client over a WebSocket transport and start connecting.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn connect(config: &ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        info!(url = %config.url, "starting portal client");

        let transport = Arc::new(WsTransport::from_config(config));
        let client = Self::with_transport(transport, config.reconnect_delay());
        client.open();
        Ok(client)
    }

    /// Create a client over an existing transport without connecting.
    #[must_use]
    pub fn with_transport(transport: Arc<dyn Transport>, reconnect_delay: Duration) -> Self {
        let correlator = Arc::new(Correlator::new(Arc::clone(&transport)));
        let supervisor = Supervisor::new(
            Arc::clone(&transport),
            Arc::clone(&correlator),
            reconnect_delay,
        );

        let mut listeners = supervisor.attach();
        let weak = Arc::downgrade(&correlator);
        listeners.push((
            events::RESPOND,
            transport.on(
                events::RESPOND,
                handler(move |args: &[Value]| {
                    if let Some(correlator) = weak.upgrade() {
                        correlator.on_respond(args);
                    }
                }),
            ),
        ));

        Self {
            inner: Arc::new(Inner {
                transport,
                correlator,
                supervisor,
                listeners,
            }),
        }
    }

    /// Start connecting.
    pub fn open(&self) {
        self.inner.supervisor.start();
        self.inner.transport.open();
    }

    /// Close the connection and fail every pending call.
    ///
    /// No reconnection is attempted until [`Client::open`] is called again.
    pub fn close(&self) {
        self.inner.supervisor.stop();
        self.inner.transport.close();
        self.inner.correlator.reject_all();
    }

    /// Call `service.method(params)` with explicit options.
    ///
    /// # Errors
    ///
    /// Returns the peer's failure, a connection loss, or a transport error.
    pub async fn call(
        &self,
        service: &str,
        method: &str,
        params: Vec<Value>,
        options: CallOptions,
    ) -> Result<Value, CallError> {
        self.inner
            .correlator
            .call(service, method, params, options)
            .await
    }

    /// Send a pre-built envelope to `service`.
    ///
    /// # Errors
    ///
    /// As [`Client::call`], plus [`CallError::DuplicateCallId`].
    pub async fn call_envelope(
        &self,
        service: &str,
        envelope: CallEnvelope,
    ) -> Result<Value, CallError> {
        self.inner.correlator.call_envelope(service, envelope).await
    }

    /// Call with a deadline.
    ///
    /// On expiry the call is withdrawn from the pending table, so a response
    /// arriving afterwards is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::Timeout`] on expiry, otherwise as [`Client::call`].
    pub async fn call_with_timeout(
        &self,
        service: &str,
        method: &str,
        params: Vec<Value>,
        options: CallOptions,
        timeout: Duration,
    ) -> Result<Value, CallError> {
        tokio::time::timeout(timeout, self.call(service, method, params, options))
            .await
            .map_err(|_| CallError::Timeout(timeout))?
    }

    /// Call and decode the result into `R`.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::Decode`] if the body does not match `R`,
    /// otherwise as [`Client::call`].
    pub async fn invoke<R: DeserializeOwned>(
        &self,
        service: &str,
        method: &str,
        params: Vec<Value>,
    ) -> Result<R, CallError> {
        let body = self.call(service, method, params, CallOptions::new()).await?;
        serde_json::from_value(body).map_err(|e| CallError::Decode(e.to_string()))
    }

    /// Dynamic handle for calling any method of `service`.
    #[must_use]
    pub fn service(&self, service: impl Into<String>) -> ServiceHandle {
        ServiceHandle::new(self.clone(), service)
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.supervisor.state()
    }

    /// Whether the transport is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.transport.is_connected()
    }

    /// Number of calls awaiting a response.
    #[must_use]
    pub fn pending_calls(&self) -> usize {
        self.inner.correlator.pending_count()
    }

    /// Whether a reopen timer is waiting to fire.
    #[must_use]
    pub fn reconnect_scheduled(&self) -> bool {
        self.inner.supervisor.has_pending_reopen()
    }

    /// Subscribe to connection lifecycle notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.supervisor.subscribe()
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.state())
            .field("pending_calls", &self.pending_calls())
            .finish_non_exhaustive()
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        for (event, id) in self.listeners.drain(..) {
            self.transport.off(event, Some(id));
        }
        self.supervisor.stop();
        self.transport.close();
        self.correlator.reject_all();
    }
}
