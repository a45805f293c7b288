use avrpc::{ChannelOptions, Service, Transport, Value};
use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Server address.
    #[arg(default_value = "127.0.0.1:8000")]
    pub addr: std::net::SocketAddr,

    /// Name to greet.
    #[arg(long, default_value = "avrpc")]
    pub name: String,
}

#[tokio::main]
async fn main() -> avrpc::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();

    let service = Service::from_json(avrpc_demo::PROTOCOL)?;
    let client = service.client()?;
    let stream = tokio::net::TcpStream::connect(args.addr).await.map_err(|e| {
        avrpc::Error::new(avrpc::ErrorKind::TransportFailed, e.to_string())
    })?;
    client.create_channel(Transport::from_tcp(stream), ChannelOptions::default());

    let echoed = client
        .emit_message("echo", vec![Value::String("Rua!".into())])
        .await?;
    tracing::info!("echo response: {echoed:?}");

    let greeting = client
        .emit_message("greet", vec![Value::String(args.name.clone())])
        .await?;
    tracing::info!("greet response: {greeting:?}");

    client.destroy_channels(false);
    Ok(())
}
