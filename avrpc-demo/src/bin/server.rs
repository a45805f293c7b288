use std::sync::atomic::{AtomicU64, Ordering};

use avrpc::{ChannelOptions, Service, Transport, Value};
use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Listen address.
    #[arg(default_value = "0.0.0.0:8000")]
    pub addr: std::net::SocketAddr,
}

#[tokio::main]
async fn main() -> avrpc::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();

    let service = Service::from_json(avrpc_demo::PROTOCOL)?;
    let server = service.server();
    server.on_message("echo", |_ctx, request| {
        Box::pin(async move { Ok(request.field("s").cloned().unwrap_or(Value::Null)) })
    })?;

    static GREETED: AtomicU64 = AtomicU64::new(0);
    server.on_message("greet", |_ctx, request| {
        Box::pin(async move {
            let name = match request.field("name") {
                Some(Value::String(name)) => name.clone(),
                _ => "stranger".to_string(),
            };
            let count = GREETED.fetch_add(1, Ordering::AcqRel);
            Ok(Value::String(format!("hello {name}({count})!")))
        })
    })?;

    let listener = tokio::net::TcpListener::bind(args.addr).await.map_err(|e| {
        avrpc::Error::new(avrpc::ErrorKind::TransportFailed, e.to_string())
    })?;
    tracing::info!("serving {} on {}...", service, args.addr);

    loop {
        let (stream, peer) = listener.accept().await.map_err(|e| {
            avrpc::Error::new(avrpc::ErrorKind::TransportFailed, e.to_string())
        })?;
        tracing::info!("accepted connection from {peer}");
        server.create_channel(Transport::from_tcp(stream), ChannelOptions::default());
    }
}
