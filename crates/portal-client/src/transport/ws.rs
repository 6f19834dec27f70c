//! WebSocket transport.
//!
//! Each event travels as one JSON text frame `{"event": .., "args": [..]}`.
//! The transport never reconnects on its own: every connection attempt is
//! started by an explicit [`Transport::open`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use portal_proto::{events, EventFrame};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, warn};

use crate::config::ClientConfig;
use crate::error::TransportError;

use super::listeners::{Handler, ListenerId, Listeners};
use super::Transport;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Default time allowed for the WebSocket handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A [`Transport`] over a single WebSocket connection at a time.
///
/// Events emitted while no connection is up are queued and flushed once the
/// next connection is established. Queued events are dropped when a
/// connection attempt fails, an established connection ends, or
/// [`Transport::discard_queued`] is called.
#[derive(Clone)]
pub struct WsTransport {
    inner: Arc<Inner>,
}

/// A queued event tagged with the epoch it was emitted in.
struct Outgoing {
    epoch: u64,
    frame: EventFrame,
}

/// The connection task currently owned by the transport.
struct Session {
    generation: u64,
    connected: bool,
    shutdown: oneshot::Sender<()>,
}

struct Inner {
    url: String,
    connect_timeout: Duration,
    listeners: Listeners,
    /// Events emitted in an earlier epoch are never written.
    epoch: AtomicU64,
    generations: AtomicU64,
    session: parking_lot::Mutex<Option<Session>>,
    outgoing_tx: mpsc::UnboundedSender<Outgoing>,
    outgoing_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Outgoing>>,
}

impl WsTransport {
    /// Create a transport for `url` without connecting.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_connect_timeout(url, DEFAULT_CONNECT_TIMEOUT)
    }

    /// Create a transport with a custom handshake timeout.
    #[must_use]
    pub fn with_connect_timeout(url: impl Into<String>, connect_timeout: Duration) -> Self {
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                url: url.into(),
                connect_timeout,
                listeners: Listeners::new(),
                epoch: AtomicU64::new(0),
                generations: AtomicU64::new(0),
                session: parking_lot::Mutex::new(None),
                outgoing_tx,
                outgoing_rx: tokio::sync::Mutex::new(outgoing_rx),
            }),
        }
    }

    /// Create a transport from client configuration.
    #[must_use]
    pub fn from_config(config: &ClientConfig) -> Self {
        Self::with_connect_timeout(config.url.clone(), config.connect_timeout())
    }

    /// Peer URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Remove every registered handler.
    pub fn remove_all_listeners(&self) {
        self.inner.listeners.remove_all();
    }

    /// Number of handlers registered for `event`.
    #[must_use]
    pub fn listener_count(&self, event: &str) -> usize {
        self.inner.listeners.count(event)
    }
}

impl std::fmt::Debug for WsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsTransport")
            .field("url", &self.inner.url)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl Transport for WsTransport {
    fn open(&self) {
        let mut session = self.inner.session.lock();
        if session.is_some() {
            debug!(url = %self.inner.url, "connection already in progress");
            return;
        }

        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                drop(session);
                error!(error = %e, "cannot open transport outside a tokio runtime");
                self.inner.discard_queued();
                self.inner.listeners.dispatch(
                    events::CONNECT_ERROR,
                    &[Value::from(format!("no async runtime: {e}"))],
                );
                return;
            }
        };

        let generation = self.inner.generations.fetch_add(1, Ordering::SeqCst) + 1;
        let (shutdown, shutdown_rx) = oneshot::channel();
        *session = Some(Session {
            generation,
            connected: false,
            shutdown,
        });
        drop(session);

        runtime.spawn(Arc::clone(&self.inner).run(generation, shutdown_rx));
    }

    fn close(&self) {
        let Some(session) = self.inner.session.lock().take() else {
            return;
        };
        debug!(generation = session.generation, "closing connection");
        let _ = session.shutdown.send(());
        self.inner.discard_queued();

        if session.connected {
            self.inner.listeners.dispatch(
                events::DISCONNECT,
                &[Value::from(events::CLIENT_CLOSE_REASON)],
            );
        }
    }

    fn is_connected(&self) -> bool {
        self.inner
            .session
            .lock()
            .as_ref()
            .is_some_and(|session| session.connected)
    }

    fn emit(&self, event: &str, args: Vec<Value>) -> Result<(), TransportError> {
        let outgoing = Outgoing {
            epoch: self.inner.epoch.load(Ordering::SeqCst),
            frame: EventFrame::new(event, args),
        };
        self.inner
            .outgoing_tx
            .send(outgoing)
            .map_err(|_| TransportError::Closed)
    }

    fn discard_queued(&self) {
        self.inner.discard_queued();
    }

    fn on(&self, event: &str, handler: Handler) -> ListenerId {
        self.inner.listeners.on(event, handler)
    }

    fn once(&self, event: &str, handler: Handler) -> ListenerId {
        self.inner.listeners.once(event, handler)
    }

    fn off(&self, event: &str, id: Option<ListenerId>) {
        self.inner.listeners.off(event, id);
    }
}

impl Inner {
    async fn run(self: Arc<Self>, generation: u64, mut shutdown: oneshot::Receiver<()>) {
        debug!(url = %self.url, generation, "connecting");

        let attempt = timeout(self.connect_timeout, connect_async(self.url.as_str()));
        let stream = tokio::select! {
            _ = &mut shutdown => return,
            result = attempt => match result {
                Ok(Ok((stream, _))) => stream,
                Ok(Err(e)) => {
                    self.finish(generation, events::CONNECT_ERROR, e.to_string());
                    return;
                }
                Err(_) => {
                    self.finish(generation, events::CONNECT_ERROR, "connection timeout".to_string());
                    return;
                }
            },
        };

        if !self.mark_connected(generation) {
            debug!(generation, "connection closed during handshake");
            return;
        }
        self.listeners.dispatch(events::CONNECT, &[]);

        if let Some(reason) = self.pump(stream, &mut shutdown).await {
            self.finish(generation, events::DISCONNECT, reason);
        }
    }

    fn mark_connected(&self, generation: u64) -> bool {
        match self.session.lock().as_mut() {
            Some(session) if session.generation == generation => {
                session.connected = true;
                true
            }
            _ => false,
        }
    }

    /// Retire the session of `generation` and report `event`.
    ///
    /// Does nothing if the session was already closed or replaced.
    fn finish(&self, generation: u64, event: &'static str, message: String) {
        {
            let mut session = self.session.lock();
            if session.as_ref().map(|s| s.generation) != Some(generation) {
                debug!(generation, event, "superseded connection ended");
                return;
            }
            *session = None;
        }
        self.discard_queued();
        self.listeners.dispatch(event, &[Value::from(message)]);
    }

    fn discard_queued(&self) {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(epoch, "discarding queued events");
    }

    /// Move frames both ways until the connection ends.
    ///
    /// Returns the reason the connection was lost, or `None` when it was
    /// closed by [`Transport::close`].
    async fn pump(&self, stream: WsStream, shutdown: &mut oneshot::Receiver<()>) -> Option<String> {
        let (mut write, mut read) = stream.split();
        let mut outgoing = self.outgoing_rx.lock().await;

        loop {
            tokio::select! {
                biased;

                _ = &mut *shutdown => {
                    if let Err(e) = write.send(Message::Close(None)).await {
                        debug!(error = %e, "failed to send close frame");
                    }
                    return None;
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => match EventFrame::from_json(&text) {
                            Ok(frame) if events::is_lifecycle(&frame.event) => {
                                warn!(event = %frame.event, "peer sent a reserved event, ignoring");
                            }
                            Ok(frame) => {
                                self.listeners.dispatch(&frame.event, &frame.args);
                            }
                            Err(e) => warn!(error = %e, "failed to parse frame"),
                        },
                        Some(Ok(Message::Close(_))) => return Some("server closed connection".to_string()),
                        Some(Err(e)) => return Some(format!("websocket error: {e}")),
                        None => return Some("connection closed".to_string()),
                        Some(Ok(_)) => {
                            // Pings are answered by tungstenite; binary frames carry nothing for us.
                        }
                    }
                }

                out = outgoing.recv() => {
                    let Some(out) = out else {
                        return Some("transport dropped".to_string());
                    };
                    if out.epoch < self.epoch.load(Ordering::SeqCst) {
                        debug!(event = %out.frame.event, "dropping discarded event");
                        continue;
                    }
                    match out.frame.to_json() {
                        Ok(json) => {
                            if let Err(e) = write.send(Message::Text(json.into())).await {
                                return Some(format!("write failed: {e}"));
                            }
                        }
                        Err(e) => warn!(event = %out.frame.event, error = %e, "failed to encode event"),
                    }
                }
            }
        }
    }
}
