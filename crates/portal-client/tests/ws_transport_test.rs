//! Client behavior over a real WebSocket connection to an in-test peer.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use portal_client::{
    CallOptions, Client, ClientConfig, ConnectionEvent, ConnectionState, ResponseEnvelope,
    WsTransport,
};
use portal_proto::{events, CallEnvelope, EventFrame};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

const WAIT: Duration = Duration::from_secs(5);

/// How the peer treats each connection it accepts.
#[derive(Clone, Copy)]
enum Peer {
    /// Answer `math.add` with the sum and anything else with a failure.
    Answer,
    /// Drop the connection as soon as a call arrives.
    HangUpOnCall,
}

/// A running in-test peer.
struct TestPeer {
    addr: SocketAddr,
    /// Index of each accepted connection.
    accepted: mpsc::UnboundedReceiver<usize>,
    /// Method of every call the peer received.
    calls: mpsc::UnboundedReceiver<String>,
}

async fn start_peer(behaviors: Vec<Peer>) -> TestPeer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (accepted_tx, accepted) = mpsc::unbounded_channel();
    let (calls_tx, calls) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        for (index, behavior) in behaviors.into_iter().enumerate() {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let _ = accepted_tx.send(index);
            serve(stream, behavior, Some(&calls_tx)).await;
        }
    });

    TestPeer {
        addr,
        accepted,
        calls,
    }
}

async fn serve(stream: TcpStream, behavior: Peer, calls: Option<&mpsc::UnboundedSender<String>>) {
    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };

    while let Some(Ok(msg)) = ws.next().await {
        let Message::Text(text) = msg else {
            continue;
        };
        let frame = EventFrame::from_json(&text).unwrap();
        if frame.event != events::CALL {
            continue;
        }
        let envelope: CallEnvelope = serde_json::from_value(frame.args[1].clone()).unwrap();
        if let Some(calls) = calls {
            let _ = calls.send(envelope.method.clone());
        }
        if matches!(behavior, Peer::HangUpOnCall) {
            return;
        }

        let response = match (frame.args[0].as_str(), envelope.method.as_str()) {
            (Some("math"), "add") => {
                let sum: i64 = envelope.params.iter().filter_map(Value::as_i64).sum();
                ResponseEnvelope::success(envelope.call_id, json!(sum))
            }
            _ => ResponseEnvelope::failure(envelope.call_id, "not found"),
        };
        let reply = EventFrame::respond(&response).unwrap().to_json().unwrap();
        if ws.send(Message::Text(reply.into())).await.is_err() {
            return;
        }
    }
}

async fn wait_for(rx: &mut broadcast::Receiver<ConnectionEvent>, wanted: fn(&ConnectionEvent) -> bool) {
    timeout(WAIT, async {
        loop {
            let event = rx.recv().await.unwrap();
            if wanted(&event) {
                return;
            }
        }
    })
    .await
    .unwrap();
}

fn config(addr: SocketAddr) -> ClientConfig {
    ClientConfig::new(format!("ws://{addr}")).with_reconnect_delay(Duration::from_millis(100))
}

#[tokio::test]
async fn test_call_over_websocket() {
    let peer = start_peer(vec![Peer::Answer]).await;
    let client = Client::connect(&config(peer.addr)).unwrap();

    // Issued before the handshake completes; delivered once it does.
    let sum = client
        .call_with_timeout("math", "add", vec![json!(2), json!(3)], CallOptions::new(), WAIT)
        .await
        .unwrap();
    assert_eq!(sum, json!(5));
    assert!(client.is_connected());
    assert_eq!(client.state(), ConnectionState::Connected);

    let err = client
        .call_with_timeout("math", "divide", vec![], CallOptions::new(), WAIT)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "not found");

    client.close();
}

#[tokio::test]
async fn test_reconnects_after_peer_hangs_up() {
    let mut peer = start_peer(vec![Peer::HangUpOnCall, Peer::Answer]).await;
    let client = Client::connect(&config(peer.addr)).unwrap();
    let mut events = client.subscribe();

    let err = client
        .call_with_timeout("math", "add", vec![json!(1)], CallOptions::new(), WAIT)
        .await
        .unwrap_err();
    assert!(err.is_connection_loss());
    assert_eq!(client.pending_calls(), 0);

    // First connection, then the one opened right after the hang-up.
    wait_for(&mut events, |e| matches!(e, ConnectionEvent::Connected)).await;
    wait_for(&mut events, |e| matches!(e, ConnectionEvent::Connected)).await;
    assert_eq!(timeout(WAIT, peer.accepted.recv()).await.unwrap(), Some(0));
    assert_eq!(timeout(WAIT, peer.accepted.recv()).await.unwrap(), Some(1));

    let sum = client
        .call_with_timeout("math", "add", vec![json!(4), json!(4)], CallOptions::new(), WAIT)
        .await
        .unwrap();
    assert_eq!(sum, json!(8));

    client.close();
}

#[tokio::test]
async fn test_retries_until_peer_is_up() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = Client::connect(&config(addr)).unwrap();
    let mut events = client.subscribe();

    wait_for(&mut events, |e| matches!(e, ConnectionEvent::ConnectFailed { .. })).await;
    assert_eq!(client.state(), ConnectionState::Reconnecting);

    let listener = TcpListener::bind(addr).await.unwrap();
    tokio::spawn(async move {
        if let Ok((stream, _)) = listener.accept().await {
            serve(stream, Peer::Answer, None).await;
        }
    });

    wait_for(&mut events, |e| matches!(e, ConnectionEvent::Connected)).await;
    assert_eq!(client.state(), ConnectionState::Connected);

    client.close();
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_reopen_after_close() {
    let mut peer = start_peer(vec![Peer::Answer, Peer::Answer]).await;
    let client = Client::connect(&config(peer.addr)).unwrap();

    let sum = client
        .call_with_timeout("math", "add", vec![json!(1), json!(2)], CallOptions::new(), WAIT)
        .await
        .unwrap();
    assert_eq!(sum, json!(3));

    client.close();
    assert_eq!(client.state(), ConnectionState::Disconnected);
    client.open();
    assert_eq!(client.state(), ConnectionState::Connecting);

    let sum = client
        .call_with_timeout("math", "add", vec![json!(2), json!(3)], CallOptions::new(), WAIT)
        .await
        .unwrap();
    assert_eq!(sum, json!(5));
    assert_eq!(client.state(), ConnectionState::Connected);
    assert!(client.is_connected());
    assert_eq!(timeout(WAIT, peer.accepted.recv()).await.unwrap(), Some(0));
    assert_eq!(timeout(WAIT, peer.accepted.recv()).await.unwrap(), Some(1));

    client.close();
}

#[tokio::test]
async fn test_failed_calls_never_reach_peer() {
    let mut peer = start_peer(vec![Peer::Answer]).await;
    let transport = Arc::new(WsTransport::from_config(&config(peer.addr)));
    let client = Client::with_transport(transport, Duration::from_millis(100));

    // Queued while no connection exists, then failed by the close.
    let c = client.clone();
    let stale = tokio::spawn(async move {
        c.call("math", "stale", vec![], CallOptions::new()).await
    });
    while client.pending_calls() == 0 {
        tokio::task::yield_now().await;
    }
    client.close();
    assert!(stale.await.unwrap().unwrap_err().is_connection_loss());

    client.open();
    let sum = client
        .call_with_timeout("math", "add", vec![json!(4), json!(5)], CallOptions::new(), WAIT)
        .await
        .unwrap();
    assert_eq!(sum, json!(9));

    assert_eq!(timeout(WAIT, peer.calls.recv()).await.unwrap().as_deref(), Some("add"));
    assert!(peer.calls.try_recv().is_err());

    client.close();
}
