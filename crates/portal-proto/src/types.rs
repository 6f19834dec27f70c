//! Identifier and option types.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::ProtoError;

/// Correlation key for a single call.
///
/// Generated identifiers are random v4 UUIDs. Identifiers supplied by a peer
/// or a pre-built envelope are kept verbatim, so any non-empty string is a
/// valid `CallId`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    /// Create a new random `CallId`.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Parse a `CallId` from a string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is empty.
    pub fn parse(s: &str) -> Result<Self, ProtoError> {
        if s.is_empty() {
            return Err(ProtoError::Validation("call id cannot be empty".to_string()));
        }
        Ok(Self(s.to_string()))
    }

    /// Borrow the identifier text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for CallId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid.to_string())
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Free-form per-call options forwarded to the peer untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallOptions(Map<String, Value>);

impl CallOptions {
    /// Create an empty option set.
    #[must_use]
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Set an option.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Look up an option.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Whether no options are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for CallOptions {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
