use std::sync::{Arc, Mutex};

use avrpc::{ChannelOptions, Client, Server, Service, Transport, Value};

const LOGGER: &str = r#"{
    "protocol": "Logger",
    "messages": {
        "greet": {
            "request": [{"name": "name", "type": "string"}],
            "response": "null",
            "one-way": true
        },
        "flush": {"request": [], "response": "int"}
    }
}"#;

fn connect(client: &Client, server: &Server) {
    let (near, far) = Transport::pair(1 << 16);
    server.create_channel(far, ChannelOptions::default());
    client.create_channel(near, ChannelOptions::default());
}

#[tokio::test]
async fn test_one_way_delivery_order() {
    let service = Service::from_json(LOGGER).unwrap();
    let server = service.server();
    let greeted: Arc<Mutex<Vec<String>>> = Arc::default();
    server
        .on_message("greet", {
            let greeted = greeted.clone();
            move |_ctx, request| {
                let greeted = greeted.clone();
                Box::pin(async move {
                    if let Some(Value::String(name)) = request.field("name") {
                        greeted.lock().unwrap().push(name.clone());
                    }
                    Ok(Value::Null)
                })
            }
        })
        .unwrap();
    server
        .on_message("flush", {
            let greeted = greeted.clone();
            move |_ctx, _request| {
                let greeted = greeted.clone();
                Box::pin(async move { Ok(Value::Int(greeted.lock().unwrap().len() as i32)) })
            }
        })
        .unwrap();

    let client = service.client().unwrap();
    connect(&client, &server);

    for name in ["a", "b", "c"] {
        // the callback fires with no error as soon as the bytes are written
        let response = client
            .emit_message("greet", vec![Value::String(name.into())])
            .await
            .unwrap();
        assert_eq!(response, Value::Null);
    }

    // a regular call behind the one-way records acts as a flush barrier
    let flushed = client.emit_message("flush", vec![]).await.unwrap();
    assert_eq!(flushed, Value::Int(3));
    assert_eq!(
        *greeted.lock().unwrap(),
        vec!["a".to_string(), "b".to_string(), "c".to_string()]
    );
}

#[tokio::test]
async fn test_one_way_emits_no_response_bytes() {
    let service = Service::from_json(LOGGER).unwrap();
    let server = service.server();
    server
        .on_message("greet", |_ctx, _request| Box::pin(async { Ok(Value::Null) }))
        .unwrap();
    server
        .on_message("flush", |_ctx, _request| {
            Box::pin(async { Ok(Value::Int(0)) })
        })
        .unwrap();

    let client = service.client().unwrap();
    connect(&client, &server);

    // warm the handshake so only call traffic remains on the channel
    client.emit_message("flush", vec![]).await.unwrap();

    client
        .emit_message("greet", vec![Value::String("x".into())])
        .await
        .unwrap();
    // nothing travels back for the one-way call, so its registry slot is
    // already free and the channel is idle
    let channel = client.active_channels().pop().unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(channel.pending_count(), 0);
}
