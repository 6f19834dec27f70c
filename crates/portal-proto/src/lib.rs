//! # portal-proto
//!
//! Wire definitions shared by portal clients and the peers that serve them.
//!
//! A call travels as a `call` event carrying `(service, CallEnvelope)`; the
//! peer answers with a `respond` event carrying a [`ResponseEnvelope`] that
//! bears the same call identifier.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod events;
pub mod messages;
pub mod types;

pub use error::ProtoError;
pub use messages::{CallEnvelope, EventFrame, RespondCode, ResponseEnvelope};
pub use types::{CallId, CallOptions};
