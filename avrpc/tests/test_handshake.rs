use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use avrpc::{
    ChannelOptions, Error, ErrorKind, Service, Transport, TransportFactory, Value,
    discover_protocol,
};

const ECHO: &str = r#"{
    "protocol": "Echo",
    "messages": {
        "echo": {
            "request": [{"name": "s", "type": "string"}],
            "response": "string"
        }
    }
}"#;

/// Wires a stateless client factory to a stateless server acceptor through
/// an in-memory queue, counting the transports the client opens.
fn stateless_pair(
    counter: Arc<AtomicUsize>,
) -> (
    TransportFactory,
    avrpc::AcceptorFactory,
) {
    let (accept_tx, accept_rx) = tokio::sync::mpsc::channel::<Transport>(16);
    let accept_rx = Arc::new(tokio::sync::Mutex::new(accept_rx));

    let factory: TransportFactory = Box::new(move || {
        let accept_tx = accept_tx.clone();
        let counter = counter.clone();
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            let (near, far) = Transport::pair(1 << 16);
            accept_tx.send(far).await.map_err(|_| {
                Error::new(ErrorKind::TransportFailed, "acceptor gone".to_string())
            })?;
            Ok(near)
        })
    });
    let acceptor: avrpc::AcceptorFactory = Box::new(move || {
        let accept_rx = accept_rx.clone();
        Box::pin(async move { Ok(accept_rx.lock().await.recv().await) })
    });
    (factory, acceptor)
}

/// The first stateless call costs an extra exchange (NONE, then the protocol
/// travels); once the server has cached the fingerprint, calls go back to
/// hash-only handshakes with no retry.
#[tokio::test]
async fn test_stateless_handshake_cache() {
    let service = Service::from_json(ECHO).unwrap();
    let server = service.server();
    server
        .on_message("echo", |_ctx, request| {
            Box::pin(async move { Ok(request.field("s").cloned().unwrap_or(Value::Null)) })
        })
        .unwrap();

    let opened = Arc::new(AtomicUsize::new(0));
    let (factory, acceptor) = stateless_pair(opened.clone());
    server.create_stateless_channel(acceptor, ChannelOptions::default());

    let client = service.client().unwrap();
    client.create_stateless_channel(factory, ChannelOptions::default());

    let response = client
        .emit_message("echo", vec![Value::String("first".into())])
        .await
        .unwrap();
    assert_eq!(response, Value::String("first".into()));
    assert_eq!(opened.load(Ordering::SeqCst), 2);

    let response = client
        .emit_message("echo", vec![Value::String("second".into())])
        .await
        .unwrap();
    assert_eq!(response, Value::String("second".into()));
    assert_eq!(opened.load(Ordering::SeqCst), 3);

    // nothing was learned from the wire: the peer runs the same protocol
    assert!(client.remote_protocols().is_empty());
}

/// A peer with a different fingerprint triggers a CLIENT handshake: the
/// server's protocol is installed once and the adapter resolves its wire
/// format into the locally expected one.
#[tokio::test]
async fn test_protocol_evolution() {
    // the client expects a long where the server still serves an int
    let client_service = Service::from_json(
        r#"{"protocol":"Counter","messages":{"get":{"request":[],"response":"long"}}}"#,
    )
    .unwrap();
    let server_service = Service::from_json(
        r#"{"protocol":"Counter","messages":{"get":{"request":[],"response":"int"}}}"#,
    )
    .unwrap();
    assert_ne!(client_service.fingerprint(), server_service.fingerprint());

    let server = server_service.server();
    server
        .on_message("get", |_ctx, _request| {
            Box::pin(async { Ok(Value::Int(41)) })
        })
        .unwrap();

    let client = client_service.client().unwrap();
    let (near, far) = Transport::pair(1 << 16);
    server.create_channel(far, ChannelOptions::default());
    client.create_channel(near, ChannelOptions::default());

    let response = client.emit_message("get", vec![]).await.unwrap();
    assert_eq!(response, Value::Long(41));

    let remotes = client.remote_protocols();
    assert_eq!(remotes.len(), 1);
    assert_eq!(remotes[0].0, server_service.fingerprint_hex());
    assert!(remotes[0].1.contains("Counter"));
}

#[tokio::test]
async fn test_incompatible_protocol() {
    let client_service = Service::from_json(
        r#"{"protocol":"P","messages":{"get":{"request":[],"response":"string"}}}"#,
    )
    .unwrap();
    let server_service = Service::from_json(r#"{"protocol":"P","messages":{}}"#).unwrap();

    let server = server_service.server();
    let client = client_service.client().unwrap();
    let (near, far) = Transport::pair(1 << 16);
    server.create_channel(far, ChannelOptions::default());
    client.create_channel(
        near,
        ChannelOptions {
            // surface the handshake failure on the call instead of the probe
            no_ping: true,
            ..ChannelOptions::default()
        },
    );

    // the client cannot build an adapter against a server missing the message
    let err = client.emit_message("get", vec![]).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::IncompatibleProtocol);
}

#[tokio::test]
async fn test_discover_protocol() {
    let service = Service::from_json(ECHO).unwrap();
    let server = service.server();
    let (near, far) = Transport::pair(1 << 16);
    server.create_channel(far, ChannelOptions::default());

    let json = discover_protocol(near).await.unwrap();
    assert_eq!(json, service.protocol_json());
    let discovered = Service::from_json(&json).unwrap();
    assert_eq!(discovered.fingerprint(), service.fingerprint());
}
