/// The demo protocol served by `avrpc-demo-server`.
pub const PROTOCOL: &str = r#"{
    "protocol": "Demo",
    "namespace": "org.avrpc.demo",
    "messages": {
        "echo": {
            "request": [{"name": "s", "type": "string"}],
            "response": "string"
        },
        "greet": {
            "request": [{"name": "name", "type": "string"}],
            "response": "string"
        }
    }
}"#;
