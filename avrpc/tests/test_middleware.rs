use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use avrpc::{
    CallContext, ChannelOptions, Client, Error, Middleware, Result, Server, Service, Transport,
    Value, WrappedRequest, WrappedResponse,
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

fn connect(client: &Client, server: &Server) {
    let (near, far) = Transport::pair(1 << 16);
    server.create_channel(far, ChannelOptions::default());
    client.create_channel(near, ChannelOptions::default());
}

struct Step {
    tag: &'static str,
    log: Arc<Mutex<Vec<String>>>,
    short_circuit: Option<Value>,
}

#[async_trait]
impl Middleware for Step {
    async fn forward(
        &self,
        _ctx: &mut CallContext,
        _wreq: &mut WrappedRequest,
        wres: &mut WrappedResponse,
    ) -> Result<()> {
        self.log.lock().unwrap().push(format!("fwd:{}", self.tag));
        if let Some(value) = &self.short_circuit {
            wres.response = Some(value.clone());
        }
        Ok(())
    }

    async fn backward(
        &self,
        _ctx: &mut CallContext,
        _wres: &mut WrappedResponse,
        err: Option<Error>,
    ) -> Option<Error> {
        self.log.lock().unwrap().push(format!("bwd:{}", self.tag));
        err
    }
}

fn step(tag: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Arc<dyn Middleware> {
    Arc::new(Step {
        tag,
        log: log.clone(),
        short_circuit: None,
    })
}

/// Server middlewares m1, m2, m3 and the handler observe the order
/// m1, m2, m3, handler, b3, b2, b1.
#[tokio::test]
async fn test_server_phase_ordering() {
    let service = Service::from_json(ECHO).unwrap();
    let server = service.server();
    let log: Arc<Mutex<Vec<String>>> = Arc::default();

    server.use_middleware(step("m1", &log));
    server.use_middleware(step("m2", &log));
    server.use_middleware(step("m3", &log));
    server
        .on_message("echo", {
            let log = log.clone();
            move |_ctx, request| {
                let log = log.clone();
                Box::pin(async move {
                    log.lock().unwrap().push("handler".into());
                    Ok(request.field("s").cloned().unwrap_or(Value::Null))
                })
            }
        })
        .unwrap();

    let client = service.client().unwrap();
    connect(&client, &server);
    client
        .emit_message("echo", vec![Value::String("x".into())])
        .await
        .unwrap();

    assert_eq!(
        *log.lock().unwrap(),
        ["fwd:m1", "fwd:m2", "fwd:m3", "handler", "bwd:m3", "bwd:m2", "bwd:m1"]
    );
}

/// A middleware that populates the response bypasses the rest of the forward
/// phase and the handler; earlier backward callbacks still unwind.
#[tokio::test]
async fn test_bypass_skips_handler() {
    let service = Service::from_json(ECHO).unwrap();
    let server = service.server();
    let log: Arc<Mutex<Vec<String>>> = Arc::default();

    server.use_middleware(step("m1", &log));
    server.use_middleware(Arc::new(Step {
        tag: "m2",
        log: log.clone(),
        short_circuit: Some(Value::String("cached".into())),
    }));
    server.use_middleware(step("m3", &log));
    server
        .on_message("echo", {
            let log = log.clone();
            move |_ctx, _request| {
                let log = log.clone();
                Box::pin(async move {
                    log.lock().unwrap().push("handler".into());
                    Ok(Value::String("never".into()))
                })
            }
        })
        .unwrap();

    let client = service.client().unwrap();
    connect(&client, &server);
    let response = client
        .emit_message("echo", vec![Value::String("x".into())])
        .await
        .unwrap();

    // the short-circuit response travels to the caller
    assert_eq!(response, Value::String("cached".into()));
    assert_eq!(
        *log.lock().unwrap(),
        ["fwd:m1", "fwd:m2", "bwd:m2", "bwd:m1"]
    );
}

/// Client middlewares wrap the emission symmetrically: the backward phase
/// observes the decoded response.
#[tokio::test]
async fn test_client_middleware_sees_response() {
    struct Inspect {
        seen: Arc<Mutex<Option<Value>>>,
    }

    #[async_trait]
    impl Middleware for Inspect {
        async fn forward(
            &self,
            _ctx: &mut CallContext,
            _wreq: &mut WrappedRequest,
            _wres: &mut WrappedResponse,
        ) -> Result<()> {
            Ok(())
        }

        async fn backward(
            &self,
            _ctx: &mut CallContext,
            wres: &mut WrappedResponse,
            err: Option<Error>,
        ) -> Option<Error> {
            *self.seen.lock().unwrap() = wres.response.clone();
            err
        }
    }

    let service = Service::from_json(ECHO).unwrap();
    let server = service.server();
    server
        .on_message("echo", |_ctx, request| {
            Box::pin(async move { Ok(request.field("s").cloned().unwrap_or(Value::Null)) })
        })
        .unwrap();

    let client = service.client().unwrap();
    let seen = Arc::new(Mutex::new(None));
    client.use_middleware(Arc::new(Inspect { seen: seen.clone() }));
    connect(&client, &server);

    client
        .emit_message("echo", vec![Value::String("observed".into())])
        .await
        .unwrap();
    assert_eq!(*seen.lock().unwrap(), Some(Value::String("observed".into())));
}

/// Per-call locals travel from the forward phase to the backward phase.
#[tokio::test]
async fn test_locals_thread_through_phases() {
    struct Stamp;

    #[async_trait]
    impl Middleware for Stamp {
        async fn forward(
            &self,
            ctx: &mut CallContext,
            _wreq: &mut WrappedRequest,
            _wres: &mut WrappedResponse,
        ) -> Result<()> {
            ctx.locals.insert("stamp".into(), serde_json::json!("s1"));
            Ok(())
        }
    }

    struct Check {
        ok: Arc<Mutex<bool>>,
    }

    #[async_trait]
    impl Middleware for Check {
        async fn forward(
            &self,
            _ctx: &mut CallContext,
            _wreq: &mut WrappedRequest,
            _wres: &mut WrappedResponse,
        ) -> Result<()> {
            Ok(())
        }

        async fn backward(
            &self,
            ctx: &mut CallContext,
            _wres: &mut WrappedResponse,
            err: Option<Error>,
        ) -> Option<Error> {
            *self.ok.lock().unwrap() = ctx.locals.get("stamp") == Some(&serde_json::json!("s1"));
            err
        }
    }

    let service = Service::from_json(ECHO).unwrap();
    let server = service.server();
    server
        .on_message("echo", |_ctx, request| {
            Box::pin(async move { Ok(request.field("s").cloned().unwrap_or(Value::Null)) })
        })
        .unwrap();

    let client = service.client().unwrap();
    let ok = Arc::new(Mutex::new(false));
    client.use_middleware(Arc::new(Stamp));
    client.use_middleware(Arc::new(Check { ok: ok.clone() }));
    connect(&client, &server);

    client
        .emit_message("echo", vec![Value::String("x".into())])
        .await
        .unwrap();
    assert!(*ok.lock().unwrap());
}
