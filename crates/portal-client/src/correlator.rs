//! Call correlation.
//!
//! Every outstanding call owns one entry in the pending table, keyed by its
//! [`CallId`]. An entry is removed exactly once: by the matching response,
//! by [`Correlator::reject_all`] when the connection goes away, or by the
//! caller abandoning the call. Whoever removes it settles it, so a call is
//! settled at most once and late or duplicate responses find nothing.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use portal_proto::{events, CallEnvelope, CallId, CallOptions, EventFrame, RespondCode, ResponseEnvelope};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::CallError;
use crate::transport::Transport;

type Completion = oneshot::Sender<Result<Value, CallError>>;

/// Matches responses to outstanding calls.
pub struct Correlator {
    transport: Arc<dyn Transport>,
    pending: Mutex<HashMap<CallId, Completion>>,
}

impl Correlator {
    /// Create a correlator sending calls over `transport`.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Call `service.method(params)` and wait for its outcome.
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
        self.call_envelope(service, CallEnvelope::new(method, params, options))
            .await
    }

    /// Send a pre-built envelope to `service` and wait for its outcome.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::DuplicateCallId`] if the envelope's identifier is
    /// already pending, otherwise as [`Correlator::call`].
    pub async fn call_envelope(
        &self,
        service: &str,
        envelope: CallEnvelope,
    ) -> Result<Value, CallError> {
        let completion = self.register(service, &envelope)?;
        let mut guard = PendingGuard {
            pending: &self.pending,
            call_id: Some(envelope.call_id),
        };

        let outcome = completion.await;
        guard.disarm();
        outcome.unwrap_or(Err(CallError::ConnectionClosed))
    }

    /// Handle the arguments of a `respond` event.
    ///
    /// Malformed payloads are logged and dropped.
    pub fn on_respond(&self, args: &[Value]) {
        let Some(payload) = args.first() else {
            warn!("respond event without payload");
            return;
        };
        match ResponseEnvelope::from_value(payload.clone()) {
            Ok(response) => {
                self.settle(response);
            }
            Err(e) => warn!(error = %e, "malformed response"),
        }
    }

    /// Settle the call matching `response`.
    ///
    /// Returns `false` when no call with that identifier is pending.
    pub fn settle(&self, response: ResponseEnvelope) -> bool {
        let Some(completion) = self.pending.lock().remove(&response.call_id) else {
            debug!(call_id = %response.call_id, "dropping unmatched response");
            return false;
        };

        let outcome = match response.code {
            RespondCode::Success => Ok(response.body),
            RespondCode::Failure => Err(CallError::Remote(response.error_message())),
        };
        debug!(call_id = %response.call_id, code = ?response.code, "call settled");

        // The caller may have stopped waiting; nothing to do then.
        let _ = completion.send(outcome);
        true
    }

    /// Fail every pending call with [`CallError::ConnectionClosed`].
    ///
    /// Call events still queued in the transport are discarded in the same
    /// critical section, so a failed call never reaches the peer later.
    ///
    /// Returns the number of calls failed.
    pub fn reject_all(&self) -> usize {
        let drained = {
            let mut pending = self.pending.lock();
            self.transport.discard_queued();
            std::mem::take(&mut *pending)
        };
        let count = drained.len();
        for (_, completion) in drained {
            let _ = completion.send(Err(CallError::ConnectionClosed));
        }
        if count > 0 {
            debug!(count, "failed pending calls");
        }
        count
    }

    /// Number of calls awaiting a response.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Whether `call_id` is awaiting a response.
    #[must_use]
    pub fn is_pending(&self, call_id: &CallId) -> bool {
        self.pending.lock().contains_key(call_id)
    }

    /// Register the call and hand its event to the transport.
    ///
    /// Both happen under the table lock, so [`Correlator::reject_all`] sees
    /// either neither or both.
    fn register(
        &self,
        service: &str,
        envelope: &CallEnvelope,
    ) -> Result<oneshot::Receiver<Result<Value, CallError>>, CallError> {
        let call_id = &envelope.call_id;
        let mut pending = self.pending.lock();
        if pending.contains_key(call_id) {
            return Err(CallError::DuplicateCallId(call_id.clone()));
        }
        let (tx, rx) = oneshot::channel();
        pending.insert(call_id.clone(), tx);

        if let Err(e) = self.transmit(service, envelope) {
            pending.remove(call_id);
            return Err(e);
        }
        debug!(%call_id, pending = pending.len(), "registered call");
        Ok(rx)
    }

    fn transmit(&self, service: &str, envelope: &CallEnvelope) -> Result<(), CallError> {
        let frame =
            EventFrame::call(service, envelope).map_err(|e| CallError::Encode(e.to_string()))?;
        self.transport.emit(events::CALL, frame.args)?;
        Ok(())
    }
}

impl std::fmt::Debug for Correlator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Correlator")
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

/// Removes a call's entry if its future ends before the call settles.
struct PendingGuard<'a> {
    pending: &'a Mutex<HashMap<CallId, Completion>>,
    call_id: Option<CallId>,
}

impl PendingGuard<'_> {
    fn disarm(&mut self) {
        self.call_id = None;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if let Some(call_id) = self.call_id.take() {
            if self.pending.lock().remove(&call_id).is_some() {
                debug!(%call_id, "call abandoned");
            }
        }
    }
}
