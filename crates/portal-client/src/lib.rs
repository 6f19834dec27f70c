//! # portal-client
//!
//! Call/response RPC over a long-lived event connection.
//!
//! A [`Client`] sends `service.method(params)` calls as `call` events and
//! resolves each one when the peer answers with a matching `respond` event.
//! Lost connections fail every outstanding call and are reopened by the
//! [`Supervisor`].
//!
//! ```ignore
//! let client = Client::connect(&ClientConfig::new("wss://rpc.example.com"))?;
//! let sum = client
//!     .call("math", "add", vec![json!(2), json!(3)], CallOptions::new())
//!     .await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod config;
pub mod correlator;
pub mod error;
pub mod events;
pub mod facade;
pub mod state;
pub mod supervisor;
pub mod transport;

pub use client::Client;
pub use config::ClientConfig;
pub use correlator::Correlator;
pub use error::{CallError, ClientError, TransportError};
pub use events::ConnectionEvent;
pub use facade::{MethodHandle, ServiceHandle};
pub use state::ConnectionState;
pub use supervisor::Supervisor;
pub use transport::{MemoryTransport, Transport, WsTransport};

pub use portal_proto::{CallEnvelope, CallId, CallOptions, RespondCode, ResponseEnvelope};

#[doc(hidden)]
pub mod __private {
    pub use serde_json::Value;
}
