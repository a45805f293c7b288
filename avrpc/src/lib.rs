//! # avrpc - An Avro RPC Runtime for Rust
//!
//! avrpc implements the Avro IPC protocol engine: handshake negotiation with
//! fingerprint-keyed schema caching, framed wire records, id-multiplexed
//! calls over shared connections, and a two-phase middleware pipeline applied
//! symmetrically on clients and servers.
//!
//! ## Features
//!
//! - **Schema negotiation**: peers exchange protocol fingerprints and fall
//!   back to full protocol documents only when needed; resolved adapters are
//!   cached per peer.
//! - **Stateful and stateless channels**: long-lived multiplexed connections
//!   or one-shot request/response transports, each with its own framing
//!   dialect.
//! - **Schema evolution**: responses written with a remote schema are
//!   resolved into the locally expected one.
//! - **Middleware**: a forward/backward interceptor chain around both call
//!   emission and handler dispatch.
//! - **Async/Await**: built on tokio for efficient asynchronous I/O.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use avrpc::{ChannelOptions, Service, Transport, Value};
//!
//! const PROTOCOL: &str = r#"{
//!     "protocol": "Echo",
//!     "messages": {
//!         "echo": {
//!             "request": [{"name": "s", "type": "string"}],
//!             "response": "string"
//!         }
//!     }
//! }"#;
//!
//! #[tokio::main]
//! async fn main() -> avrpc::Result<()> {
//!     let service = Service::from_json(PROTOCOL)?;
//!
//!     let server = service.server();
//!     server.on_message("echo", |_ctx, request| {
//!         Box::pin(async move {
//!             Ok(request.field("s").cloned().unwrap_or(Value::Null))
//!         })
//!     })?;
//!
//!     let (near, far) = Transport::pair(1 << 16);
//!     server.create_channel(far, ChannelOptions::default());
//!
//!     let client = service.client()?;
//!     client.create_channel(near, ChannelOptions::default());
//!     let response = client
//!         .emit_message("echo", vec![Value::String("hi".into())])
//!         .await?;
//!     assert_eq!(response, Value::String("hi".into()));
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]

/// A boxed future, the return shape of handlers and transport factories.
pub type BoxFuture<'a, T> = std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Error types and the rpc code taxonomy.
mod error;
pub use error::{Error, ErrorKind, Result};

/// The narrow Avro type layer: schemas, values, resolution.
pub mod schema;
pub use schema::{Schema, Value};

/// Protocol documents: services and their messages.
mod service;
pub use service::{Message, Service, request_record};

/// Framed wire records in the two dialects.
mod frame;
pub use frame::{Dialect, Record};

/// Per-channel pending-call table with timeouts.
mod registry;
pub use registry::Registry;

/// The on-wire handshake records and match levels.
mod handshake;
pub use handshake::{HandshakeMatch, HandshakeRequest, HandshakeResponse};

/// Request/response envelopes observed by middleware.
mod msg;
pub use msg::{Headers, WrappedRequest, WrappedResponse};

/// Peer schema resolution cache entries.
mod adapter;
pub use adapter::Adapter;

/// Explicit per-call context threaded through middleware and handlers.
mod context;
pub use context::{CallContext, ChannelInfo};

/// The two-phase middleware chain.
mod middleware;
pub use middleware::Middleware;

/// Byte transports, record pumps, and transport sharing.
mod transport;
pub use transport::{AcceptorFactory, RecordDuplex, RecordHub, Transport, TransportFactory};

/// Channel variants over the transports.
mod channel;
pub use channel::{
    ChannelOptions, StatefulClientChannel, StatefulServerChannel, StatelessClientChannel,
    StatelessServerChannel,
};

/// Client façade.
mod client;
pub use client::{ChannelPolicy, Client, ClientChannel, ClientOptions, EmitOptions};

/// Server façade.
mod server;
pub use server::{ErrorHook, Handler, Server, ServerChannel, ServerOptions, SystemErrorFormatter};

/// Protocol discovery probe.
mod discover;
pub use discover::discover_protocol;
