//! Reserved event names exchanged over the duplex connection.

/// Transport established a connection.
pub const CONNECT: &str = "connect";

/// Transport failed to establish a connection.
pub const CONNECT_ERROR: &str = "connect_error";

/// Transport lost an established connection.
pub const DISCONNECT: &str = "disconnect";

/// Client to peer: `(service, CallEnvelope)`.
pub const CALL: &str = "call";

/// Peer to client: `(ResponseEnvelope)`.
pub const RESPOND: &str = "respond";

/// Disconnect reason reported when the client closed the connection itself.
pub const CLIENT_CLOSE_REASON: &str = "io client disconnect";

/// Returns true for the lifecycle events produced by the transport itself.
#[must_use]
pub fn is_lifecycle(event: &str) -> bool {
    matches!(event, CONNECT | CONNECT_ERROR | DISCONNECT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(CONNECT, true ; "connect")]
    #[test_case(CONNECT_ERROR, true ; "connect error")]
    #[test_case(DISCONNECT, true ; "disconnect")]
    #[test_case(CALL, false ; "call")]
    #[test_case(RESPOND, false ; "respond")]
    fn test_is_lifecycle(event: &str, expected: bool) {
        assert_eq!(is_lifecycle(event), expected);
    }
}
