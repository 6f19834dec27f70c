//! Call-site sugar.
//!
//! Two ways to call a remote service without spelling out
//! `client.call(service, method, params, options)`:
//!
//! - Dynamic: `client.service("math").method("add").call(args)`. Nothing is
//!   validated ahead of time; an unknown service or method surfaces as the
//!   call's error.
//! - Typed: the [`service!`](crate::service) macro declares a struct per
//!   service whose async methods encode their arguments, forward to the
//!   client and decode the declared return type.
//!
//! Both keep the underlying [`Client`] reachable through `portal()`.

use portal_proto::CallOptions;
use serde::Serialize;
use serde_json::Value;

use crate::client::Client;
use crate::error::CallError;

/// Untyped handle on one remote service.
#[derive(Debug, Clone)]
pub struct ServiceHandle {
    client: Client,
    service: String,
}

impl ServiceHandle {
    pub(crate) fn new(client: Client, service: impl Into<String>) -> Self {
        Self {
            client,
            service: service.into(),
        }
    }

    /// Service name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.service
    }

    /// Handle on one method of this service.
    #[must_use]
    pub fn method(&self, method: impl Into<String>) -> MethodHandle {
        MethodHandle {
            client: self.client.clone(),
            service: self.service.clone(),
            method: method.into(),
        }
    }

    /// Call `method` with positional arguments.
    ///
    /// # Errors
    ///
    /// As [`Client::call`].
    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, CallError> {
        self.client
            .call(&self.service, method, args, CallOptions::new())
            .await
    }

    /// Underlying client.
    #[must_use]
    pub const fn portal(&self) -> &Client {
        &self.client
    }
}

/// Untyped handle on one remote method.
#[derive(Debug, Clone)]
pub struct MethodHandle {
    client: Client,
    service: String,
    method: String,
}

impl MethodHandle {
    /// Service name.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Method name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.method
    }

    /// Call with positional arguments and empty options.
    ///
    /// # Errors
    ///
    /// As [`Client::call`].
    pub async fn call(&self, args: Vec<Value>) -> Result<Value, CallError> {
        self.client
            .call(&self.service, &self.method, args, CallOptions::new())
            .await
    }

    /// Underlying client.
    #[must_use]
    pub const fn portal(&self) -> &Client {
        &self.client
    }
}

/// Encode one call argument.
///
/// # Errors
///
/// Returns [`CallError::Encode`] if the value cannot be represented as JSON.
pub fn encode_param<T: Serialize + ?Sized>(value: &T) -> Result<Value, CallError> {
    serde_json::to_value(value).map_err(|e| CallError::Encode(e.to_string()))
}

/// Declare a typed client for one remote service.
///
/// ```ignore
/// portal_client::service! {
///     /// Arithmetic service.
///     pub struct Math("math") {
///         /// Sum of two numbers.
///         fn add(a: i64, b: i64) -> i64;
///     }
/// }
///
/// let math = Math::new(client);
/// let sum = math.add(2, 3).await?;
/// ```
#[macro_export]
macro_rules! service {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident($service:literal) {
            $(
                $(#[$method_meta:meta])*
                fn $method:ident($($arg:ident : $arg_ty:ty),* $(,)?) -> $ret:ty;
            )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone)]
        $vis struct $name {
            client: $crate::Client,
        }

        impl $name {
            /// Service name on the wire.
            pub const SERVICE: &'static str = $service;

            /// Bind the service to a client.
            #[must_use]
            pub fn new(client: $crate::Client) -> Self {
                Self { client }
            }

            /// Underlying client, for lifecycle control and raw calls.
            #[must_use]
            pub fn portal(&self) -> &$crate::Client {
                &self.client
            }

            $(
                $(#[$method_meta])*
                pub async fn $method(
                    &self,
                    $($arg: $arg_ty),*
                ) -> ::std::result::Result<$ret, $crate::CallError> {
                    let params: ::std::vec::Vec<$crate::__private::Value> =
                        ::std::vec![$($crate::facade::encode_param(&$arg)?),*];
                    self.client
                        .invoke(Self::SERVICE, ::std::stringify!($method), params)
                        .await
                }
            )*
        }
    };
}
