use std::time::{Duration, Instant};

use avrpc::{
    ChannelOptions, Client, EmitOptions, ErrorKind, Server, Service, Transport, Value,
};

const SLOW: &str = r#"{
    "protocol": "Slow",
    "messages": {
        "slow": {
            "request": [{"name": "delay_ms", "type": "int"}, {"name": "tag", "type": "string"}],
            "response": "string"
        }
    }
}"#;

fn connect(client: &Client, server: &Server) {
    let (near, far) = Transport::pair(1 << 16);
    server.create_channel(far, ChannelOptions::default());
    client.create_channel(near, ChannelOptions::default());
}

fn slow_server(service: &std::sync::Arc<Service>) -> Server {
    let server = service.server();
    server
        .on_message("slow", |_ctx, request| {
            Box::pin(async move {
                let delay = match request.field("delay_ms") {
                    Some(Value::Int(d)) => *d,
                    _ => 0,
                };
                let tag = match request.field("tag") {
                    Some(Value::String(t)) => t.clone(),
                    _ => String::new(),
                };
                tokio::time::sleep(Duration::from_millis(u64::from(delay.unsigned_abs()))).await;
                Ok(Value::String(tag))
            })
        })
        .unwrap();
    server
}

async fn slow(client: &Client, delay_ms: i32, tag: &str) -> avrpc::Result<Value> {
    client
        .emit_message(
            "slow",
            vec![Value::Int(delay_ms), Value::String(tag.into())],
        )
        .await
}

/// Interleaved responses resolve the right callbacks: calls A, B, C are
/// answered in order C, A, B by construction of the delays.
#[tokio::test]
async fn test_out_of_order_responses() {
    let service = Service::from_json(SLOW).unwrap();
    let server = slow_server(&service);
    let client = service.client().unwrap();
    connect(&client, &server);

    let (a, b, c) = tokio::join!(
        slow(&client, 90, "A"),
        slow(&client, 120, "B"),
        slow(&client, 30, "C"),
    );
    assert_eq!(a.unwrap(), Value::String("A".into()));
    assert_eq!(b.unwrap(), Value::String("B".into()));
    assert_eq!(c.unwrap(), Value::String("C".into()));
}

/// Three concurrent calls with delays [300, 100, 200] ms complete together
/// well under their 600 ms serial sum.
#[tokio::test]
async fn test_concurrent_calls_share_the_channel() {
    let service = Service::from_json(SLOW).unwrap();
    let server = slow_server(&service);
    let client = service.client().unwrap();
    connect(&client, &server);

    // warm the handshake up so it does not count against the clock
    slow(&client, 0, "warmup").await.unwrap();

    let start = Instant::now();
    let (a, b, c) = tokio::join!(
        slow(&client, 300, "A"),
        slow(&client, 100, "B"),
        slow(&client, 200, "C"),
    );
    let elapsed = start.elapsed();

    assert_eq!(a.unwrap(), Value::String("A".into()));
    assert_eq!(b.unwrap(), Value::String("B".into()));
    assert_eq!(c.unwrap(), Value::String("C".into()));
    assert!(elapsed < Duration::from_millis(500), "took {elapsed:?}");
}

/// A timed-out call fires exactly once, with the timeout error; the late
/// response is discarded and the channel survives.
#[tokio::test]
async fn test_timeout_wins_over_late_response() {
    let service = Service::from_json(SLOW).unwrap();
    let server = slow_server(&service);
    let client = service.client().unwrap();
    connect(&client, &server);

    let err = client
        .emit_message_with(
            "slow",
            Value::Record(vec![
                ("delay_ms".into(), Value::Int(150)),
                ("tag".into(), Value::String("late".into())),
            ]),
            EmitOptions {
                timeout: Some(Duration::from_millis(50)),
                ..EmitOptions::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Timeout);

    // let the late response arrive and be dropped
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(
        slow(&client, 0, "alive").await.unwrap(),
        Value::String("alive".into())
    );
}

#[tokio::test]
async fn test_destroy_interrupts_pending_calls() {
    let service = Service::from_json(SLOW).unwrap();
    let server = slow_server(&service);
    let client = std::sync::Arc::new(service.client().unwrap());
    connect(&client, &server);

    let pending = tokio::spawn({
        let client = client.clone();
        async move { slow(client.as_ref(), 500, "doomed").await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    client.destroy_channels(true);

    let err = pending.await.unwrap().unwrap_err();
    assert_eq!(err.kind, ErrorKind::Interrupted);
    assert!(client.active_channels().is_empty());
}

#[tokio::test]
async fn test_drain_waits_for_pending_calls() {
    let service = Service::from_json(SLOW).unwrap();
    let server = slow_server(&service);
    let client = std::sync::Arc::new(service.client().unwrap());
    connect(&client, &server);
    let channel = client.active_channels().pop().unwrap();

    let pending = tokio::spawn({
        let client = client.clone();
        async move { slow(client.as_ref(), 150, "survivor").await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    channel.destroy(false);

    // draining refuses new sends but lets the in-flight call finish
    let err = slow(client.as_ref(), 0, "refused").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::ChannelDestroyed);
    assert_eq!(
        pending.await.unwrap().unwrap(),
        Value::String("survivor".into())
    );
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(channel.is_destroyed());
}
