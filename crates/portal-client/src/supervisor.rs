//! Reconnection supervision.
//!
//! The transport never retries by itself, so the supervisor owns all retry
//! timing. It reacts to lifecycle events:
//!
//! - `connect`: cancel any pending reopen, enter `Connected`.
//! - `connect_error`: fail pending calls, log once per outage, reopen after
//!   the fixed delay.
//! - `disconnect`: fail pending calls and reopen immediately, unless the
//!   client closed the connection itself.
//!
//! At most one reopen timer exists at any time: [`Supervisor::schedule_reopen`]
//! is the only place a timer is created and it always aborts the previous one.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use portal_proto::events;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::correlator::Correlator;
use crate::events::ConnectionEvent;
use crate::state::{AtomicConnectionState, ConnectionState};
use crate::transport::{handler, ListenerId, Transport};

/// Default delay before reopening after a failed connection attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Default)]
struct ReconnectState {
    timer: Option<JoinHandle<()>>,
    /// The current outage has already been logged.
    outage_logged: bool,
}

/// Drives reconnection and invalidates pending calls on connection loss.
pub struct Supervisor {
    transport: Arc<dyn Transport>,
    correlator: Arc<Correlator>,
    reconnect_delay: Duration,
    state: AtomicConnectionState,
    reconnect: Mutex<ReconnectState>,
    events: broadcast::Sender<ConnectionEvent>,
}

impl Supervisor {
    /// Create a supervisor for `transport`.
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        correlator: Arc<Correlator>,
        reconnect_delay: Duration,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(32);
        Arc::new(Self {
            transport,
            correlator,
            reconnect_delay,
            state: AtomicConnectionState::new(ConnectionState::Disconnected),
            reconnect: Mutex::new(ReconnectState::default()),
            events,
        })
    }

    /// Register lifecycle handlers on the transport.
    ///
    /// Handlers hold a weak reference, so they become no-ops once the
    /// supervisor is dropped.
    pub fn attach(self: &Arc<Self>) -> Vec<(&'static str, ListenerId)> {
        let on_connect = Arc::downgrade(self);
        let on_error = Arc::downgrade(self);
        let on_disconnect = Arc::downgrade(self);

        vec![
            (
                events::CONNECT,
                self.transport.on(
                    events::CONNECT,
                    handler(move |_: &[Value]| with(&on_connect, Self::on_connect)),
                ),
            ),
            (
                events::CONNECT_ERROR,
                self.transport.on(
                    events::CONNECT_ERROR,
                    handler(move |args: &[Value]| {
                        let message = first_text(args, "unknown error");
                        with(&on_error, |s| s.on_connect_error(&message));
                    }),
                ),
            ),
            (
                events::DISCONNECT,
                self.transport.on(
                    events::DISCONNECT,
                    handler(move |args: &[Value]| {
                        let reason = first_text(args, "unknown reason");
                        with(&on_disconnect, |s| s.on_disconnect(&reason));
                    }),
                ),
            ),
        ]
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state.load()
    }

    /// Configured reopen delay after `connect_error`.
    #[must_use]
    pub const fn reconnect_delay(&self) -> Duration {
        self.reconnect_delay
    }

    /// Whether a reopen timer is waiting to fire.
    #[must_use]
    pub fn has_pending_reopen(&self) -> bool {
        self.reconnect
            .lock()
            .timer
            .as_ref()
            .is_some_and(|timer| !timer.is_finished())
    }

    /// Subscribe to lifecycle notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// Record that the client asked to connect.
    pub fn start(&self) {
        self.state
            .transition(ConnectionState::Disconnected, ConnectionState::Connecting);
    }

    /// Record that the client closed the connection; cancels any reopen.
    pub fn stop(&self) {
        self.cancel_reopen();
        self.state.store(ConnectionState::Disconnected);
    }

    /// Handle a `connect` event.
    pub fn on_connect(&self) {
        {
            let mut reconnect = self.reconnect.lock();
            if let Some(timer) = reconnect.timer.take() {
                timer.abort();
            }
            reconnect.outage_logged = false;
        }
        self.state.store(ConnectionState::Connected);
        info!("connection established");
        let _ = self.events.send(ConnectionEvent::Connected);
    }

    /// Handle a `connect_error` event.
    ///
    /// Pending calls are always failed. No reopen is scheduled while the
    /// client is closed.
    pub fn on_connect_error(&self, message: &str) {
        self.correlator.reject_all();

        if self.state() == ConnectionState::Disconnected {
            debug!(error = %message, "connect error while closed, not reconnecting");
            return;
        }

        self.cancel_reopen();

        let first_report = {
            let mut reconnect = self.reconnect.lock();
            !std::mem::replace(&mut reconnect.outage_logged, true)
        };
        if first_report {
            warn!(error = %message, "connection error, reconnecting");
        } else {
            debug!(error = %message, "connection error");
        }

        self.state.store(ConnectionState::Reconnecting);
        let _ = self.events.send(ConnectionEvent::ConnectFailed {
            message: message.to_string(),
        });
        self.schedule_reopen(self.reconnect_delay);
    }

    /// Handle a `disconnect` event.
    pub fn on_disconnect(&self, reason: &str) {
        self.correlator.reject_all();
        let _ = self.events.send(ConnectionEvent::Disconnected {
            reason: reason.to_string(),
        });

        if reason == events::CLIENT_CLOSE_REASON || self.state() == ConnectionState::Disconnected {
            info!("disconnected");
            self.state.store(ConnectionState::Disconnected);
            return;
        }

        warn!(%reason, "disconnected, reconnecting");
        self.state.store(ConnectionState::Reconnecting);
        self.transport.open();
    }

    /// Replace any pending reopen with one firing after `delay`.
    fn schedule_reopen(&self, delay: Duration) {
        let mut reconnect = self.reconnect.lock();
        if let Some(previous) = reconnect.timer.take() {
            previous.abort();
        }

        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                error!(error = %e, "cannot schedule reconnect outside a tokio runtime");
                return;
            }
        };

        let transport = Arc::clone(&self.transport);
        reconnect.timer = Some(runtime.spawn(async move {
            sleep(delay).await;
            debug!("reopening transport");
            transport.open();
        }));
        drop(reconnect);

        let _ = self.events.send(ConnectionEvent::Reconnecting { delay });
    }

    fn cancel_reopen(&self) {
        if let Some(timer) = self.reconnect.lock().timer.take() {
            timer.abort();
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if let Some(timer) = self.reconnect.get_mut().timer.take() {
            timer.abort();
        }
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("state", &self.state())
            .field("reconnect_delay", &self.reconnect_delay)
            .finish_non_exhaustive()
    }
}

fn with(supervisor: &Weak<Supervisor>, f: impl FnOnce(&Supervisor)) {
    if let Some(supervisor) = supervisor.upgrade() {
        f(&supervisor);
    }
}

fn first_text(args: &[Value], fallback: &str) -> String {
    match args.first() {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => fallback.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;
    use portal_proto::CallOptions;

    fn setup() -> (Arc<MemoryTransport>, Arc<Correlator>, Arc<Supervisor>) {
        let transport = Arc::new(MemoryTransport::new());
        let correlator = Arc::new(Correlator::new(transport.clone()));
        let supervisor = Supervisor::new(transport.clone(), Arc::clone(&correlator), DEFAULT_RECONNECT_DELAY);
        supervisor.attach();
        supervisor.start();
        (transport, correlator, supervisor)
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_error_schedules_single_reopen() {
        let (transport, _, supervisor) = setup();

        transport.fail_connect("refused");
        assert_eq!(supervisor.state(), ConnectionState::Reconnecting);
        assert!(supervisor.has_pending_reopen());
        assert_eq!(transport.open_count(), 0);

        sleep(Duration::from_millis(5_100)).await;
        assert_eq!(transport.open_count(), 1);
        assert!(!supervisor.has_pending_reopen());
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_connect_errors_never_stack_timers() {
        let (transport, _, supervisor) = setup();

        transport.fail_connect("refused");
        sleep(Duration::from_secs(2)).await;
        transport.fail_connect("refused again");
        assert!(supervisor.has_pending_reopen());

        // The first timer was replaced, so nothing fires at its deadline.
        sleep(Duration::from_millis(3_500)).await;
        assert_eq!(transport.open_count(), 0);

        sleep(Duration::from_secs(2)).await;
        assert_eq!(transport.open_count(), 1);

        sleep(Duration::from_secs(30)).await;
        assert_eq!(transport.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_cancels_pending_reopen() {
        let (transport, _, supervisor) = setup();

        transport.fail_connect("refused");
        transport.connect();
        assert_eq!(supervisor.state(), ConnectionState::Connected);
        assert!(!supervisor.has_pending_reopen());

        sleep(Duration::from_secs(10)).await;
        assert_eq!(transport.open_count(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_reopens_immediately() {
        let (transport, _, supervisor) = setup();
        transport.connect();

        transport.disconnect("transport close");

        assert_eq!(transport.open_count(), 1);
        assert_eq!(supervisor.state(), ConnectionState::Reconnecting);
        assert!(!supervisor.has_pending_reopen());
    }

    #[tokio::test]
    async fn test_client_close_does_not_reopen() {
        let (transport, _, supervisor) = setup();
        transport.connect();

        supervisor.stop();
        transport.close();

        assert_eq!(transport.open_count(), 0);
        assert_eq!(supervisor.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_reopen() {
        let (transport, _, supervisor) = setup();
        transport.fail_connect("refused");

        supervisor.stop();
        sleep(Duration::from_secs(10)).await;

        assert_eq!(transport.open_count(), 0);
        assert_eq!(supervisor.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connection_loss_fails_pending_calls() {
        let (transport, correlator, _supervisor) = setup();
        transport.connect();

        let c = Arc::clone(&correlator);
        let call = tokio::spawn(async move { c.call("math", "add", vec![], CallOptions::new()).await });
        while correlator.pending_count() == 0 {
            tokio::task::yield_now().await;
        }

        transport.disconnect("ping timeout");

        assert_eq!(correlator.pending_count(), 0);
        assert!(call.await.unwrap().unwrap_err().is_connection_loss());
    }

    #[tokio::test]
    async fn test_connect_error_while_closed_fails_calls_without_reopen() {
        let transport = Arc::new(MemoryTransport::new());
        let correlator = Arc::new(Correlator::new(transport.clone()));
        let supervisor = Supervisor::new(transport.clone(), Arc::clone(&correlator), DEFAULT_RECONNECT_DELAY);
        supervisor.attach();

        let c = Arc::clone(&correlator);
        let call = tokio::spawn(async move { c.call("math", "add", vec![], CallOptions::new()).await });
        while correlator.pending_count() == 0 {
            tokio::task::yield_now().await;
        }

        transport.fail_connect("refused");

        assert!(call.await.unwrap().unwrap_err().is_connection_loss());
        assert_eq!(supervisor.state(), ConnectionState::Disconnected);
        assert!(!supervisor.has_pending_reopen());
    }

    #[tokio::test]
    async fn test_outage_logged_once_and_reset_on_connect() {
        let (transport, _, supervisor) = setup();

        transport.fail_connect("refused");
        assert!(supervisor.reconnect.lock().outage_logged);
        transport.fail_connect("refused");
        assert!(supervisor.reconnect.lock().outage_logged);

        transport.connect();
        assert!(!supervisor.reconnect.lock().outage_logged);
    }

    #[tokio::test]
    async fn test_events_are_broadcast() {
        let (transport, _, supervisor) = setup();
        let mut rx = supervisor.subscribe();

        transport.connect();
        transport.disconnect("gone");
        transport.fail_connect("refused");

        assert_eq!(rx.recv().await.unwrap(), ConnectionEvent::Connected);
        assert_eq!(
            rx.recv().await.unwrap(),
            ConnectionEvent::Disconnected { reason: "gone".to_string() }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            ConnectionEvent::ConnectFailed { message: "refused".to_string() }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            ConnectionEvent::Reconnecting { delay: DEFAULT_RECONNECT_DELAY }
        );
    }

    #[tokio::test]
    async fn test_handlers_are_inert_after_drop() {
        let transport = Arc::new(MemoryTransport::new());
        let correlator = Arc::new(Correlator::new(transport.clone()));
        let supervisor = Supervisor::new(transport.clone(), correlator, DEFAULT_RECONNECT_DELAY);
        supervisor.attach();
        supervisor.start();
        drop(supervisor);

        transport.connect();
        transport.disconnect("gone");
        assert_eq!(transport.open_count(), 0);
    }

    #[test]
    fn test_first_text() {
        assert_eq!(first_text(&[Value::from("x")], "f"), "x");
        assert_eq!(first_text(&[Value::from(3)], "f"), "3");
        assert_eq!(first_text(&[], "f"), "f");
    }
}
