//! Call, response and frame definitions.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtoError;
use crate::events;
use crate::types::{CallId, CallOptions};

/// A call sent from client to peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallEnvelope {
    /// Correlation key echoed back in the response.
    #[serde(rename = "callUUID")]
    pub call_id: CallId,
    /// Method name on the target service.
    pub method: String,
    /// Positional arguments.
    #[serde(default)]
    pub params: Vec<Value>,
    /// Per-call options.
    #[serde(default)]
    pub options: CallOptions,
}

impl CallEnvelope {
    /// Create an envelope with a fresh call identifier.
    #[must_use]
    pub fn new(method: impl Into<String>, params: Vec<Value>, options: CallOptions) -> Self {
        Self::with_id(CallId::new(), method, params, options)
    }

    /// Create an envelope with an explicit call identifier.
    #[must_use]
    pub fn with_id(
        call_id: CallId,
        method: impl Into<String>,
        params: Vec<Value>,
        options: CallOptions,
    ) -> Self {
        Self {
            call_id,
            method: method.into(),
            params,
            options,
        }
    }
}

/// Outcome code of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RespondCode {
    /// The call completed; `body` is the result.
    Success,
    /// The call failed; `body` is the error message.
    Failure,
}

/// A response sent from peer to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Identifier of the call being answered.
    #[serde(rename = "callUUID")]
    pub call_id: CallId,
    /// Outcome code.
    pub code: RespondCode,
    /// Result on success, error message on failure.
    #[serde(default)]
    pub body: Value,
}

impl ResponseEnvelope {
    /// Create a success response.
    #[must_use]
    pub fn success(call_id: CallId, body: impl Into<Value>) -> Self {
        Self {
            call_id,
            code: RespondCode::Success,
            body: body.into(),
        }
    }

    /// Create a failure response.
    #[must_use]
    pub fn failure(call_id: CallId, message: impl Into<String>) -> Self {
        Self {
            call_id,
            code: RespondCode::Failure,
            body: Value::String(message.into()),
        }
    }

    /// Decode a response from an event argument.
    ///
    /// # Errors
    ///
    /// Returns an error if the value does not have the response shape.
    pub fn from_value(value: Value) -> Result<Self, ProtoError> {
        serde_json::from_value(value).map_err(|e| ProtoError::Decoding(e.to_string()))
    }

    /// Message text of a failure body.
    ///
    /// String bodies are used verbatim; anything else is rendered as JSON.
    #[must_use]
    pub fn error_message(&self) -> String {
        match &self.body {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// A named event with positional arguments, one per text frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFrame {
    /// Event name.
    pub event: String,
    /// Event arguments.
    #[serde(default)]
    pub args: Vec<Value>,
}

impl EventFrame {
    /// Create a frame.
    #[must_use]
    pub fn new(event: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            event: event.into(),
            args,
        }
    }

    /// Create a `call` frame for `service`.
    ///
    /// # Errors
    ///
    /// Returns an error if the envelope cannot be encoded.
    pub fn call(service: &str, envelope: &CallEnvelope) -> Result<Self, ProtoError> {
        let envelope =
            serde_json::to_value(envelope).map_err(|e| ProtoError::Encoding(e.to_string()))?;
        Ok(Self::new(events::CALL, vec![Value::from(service), envelope]))
    }

    /// Create a `respond` frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the response cannot be encoded.
    pub fn respond(response: &ResponseEnvelope) -> Result<Self, ProtoError> {
        let response =
            serde_json::to_value(response).map_err(|e| ProtoError::Encoding(e.to_string()))?;
        Ok(Self::new(events::RESPOND, vec![response]))
    }

    /// Serialize to JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, ProtoError> {
        serde_json::to_string(self).map_err(|e| ProtoError::Encoding(e.to_string()))
    }

    /// Deserialize from JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a valid frame.
    pub fn from_json(json: &str) -> Result<Self, ProtoError> {
        let frame: Self =
            serde_json::from_str(json).map_err(|e| ProtoError::Decoding(e.to_string()))?;
        if frame.event.is_empty() {
            return Err(ProtoError::Validation("event name cannot be empty".to_string()));
        }
        Ok(frame)
    }
}
