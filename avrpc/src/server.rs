use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use bytes::Bytes;
use foldhash::fast::RandomState;
use serde::{Deserialize, Serialize};
use serde_inline_default::serde_inline_default;
use tokio_util::sync::CancellationToken;

use crate::BoxFuture;
use crate::adapter::Adapter;
use crate::channel::{ChannelOptions, StatefulServerChannel, StatelessServerChannel};
use crate::context::{CallContext, ChannelInfo};
use crate::error::{Error, ErrorKind, Result};
use crate::frame::Dialect;
use crate::handshake::{HandshakeMatch, HandshakeRequest, HandshakeResponse};
use crate::middleware::{Middleware, run_backward, run_forward};
use crate::msg::{WrappedResponse, ping_response_body, system_error_body};
use crate::schema::Value;
use crate::service::Service;
use crate::transport::{AcceptorFactory, RecordDuplex, Transport, spawn_record_pumps};

/// A registered message handler: async over the call context and the decoded
/// request record. Application errors are reported by returning `Err` with an
/// [`ErrorKind::Application`] payload.
pub type Handler =
    Arc<dyn for<'a> Fn(&'a mut CallContext, Value) -> BoxFuture<'a, Result<Value>> + Send + Sync>;

/// Renders a server-side error into the string sent on the wire; defaults to
/// the error's rpc code.
pub type SystemErrorFormatter = Box<dyn Fn(&Error) -> String + Send + Sync>;

pub type ErrorHook = Box<dyn Fn(&Error) + Send + Sync>;

#[serde_inline_default]
#[derive(Deserialize, Serialize, Debug, PartialEq, Eq, Clone)]
pub struct ServerOptions {
    /// Require handler errors to match the message's error union exactly
    /// instead of wrapping plain strings into the string branch.
    #[serde_inline_default(false)]
    pub strict_errors: bool,
    /// Suppress error logging; hooks still fire.
    #[serde_inline_default(false)]
    pub silent: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        serde_json::from_value(serde_json::Value::Object(serde_json::Map::default())).unwrap()
    }
}

/// A server-side channel of either flavor.
#[derive(Clone, Debug)]
pub enum ServerChannel {
    Stateful(Arc<StatefulServerChannel>),
    Stateless(Arc<StatelessServerChannel>),
}

impl ServerChannel {
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        match self {
            ServerChannel::Stateful(channel) => channel.is_destroyed(),
            ServerChannel::Stateless(channel) => channel.is_destroyed(),
        }
    }

    pub fn destroy(&self, no_wait: bool) {
        match self {
            ServerChannel::Stateful(channel) => channel.destroy(no_wait),
            ServerChannel::Stateless(channel) => channel.destroy(no_wait),
        }
    }
}

/// State shared between a server and its channels: the service, the adapter
/// cache keyed by client fingerprint, the handler table, and the middleware
/// chain.
pub(crate) struct ServerShared {
    pub(crate) service: Arc<Service>,
    options: ServerOptions,
    adapters: dashmap::DashMap<[u8; 16], Arc<Adapter>, RandomState>,
    handlers: RwLock<HashMap<String, Handler, RandomState>>,
    default_handler: RwLock<Option<Handler>>,
    formatter: RwLock<Option<SystemErrorFormatter>>,
    hooks: RwLock<Vec<ErrorHook>>,
    middlewares: RwLock<Vec<Arc<dyn Middleware>>>,
}

impl ServerShared {
    /// Server half of the handshake: look the client hash up, install the
    /// client's protocol when it was sent along, or report the miss.
    pub(crate) fn process_handshake(
        &self,
        hreq: &HandshakeRequest,
    ) -> (HandshakeResponse, Option<Arc<Adapter>>, Option<Error>) {
        let server_match = hreq.server_hash == self.service.fingerprint();
        let (adapter, err) = match self.adapters.get(&hreq.client_hash) {
            Some(entry) => (Some(Arc::clone(entry.value())), None),
            None => match &hreq.client_protocol {
                Some(json) => match self.install_client(hreq.client_hash, json) {
                    Ok(adapter) => (Some(adapter), None),
                    Err(e) => (None, Some(e)),
                },
                None => (None, Some(Error::kind(ErrorKind::UnknownProtocol))),
            },
        };
        let matched = if adapter.is_none() {
            HandshakeMatch::None
        } else if server_match {
            HandshakeMatch::Both
        } else {
            HandshakeMatch::Client
        };
        let hres = HandshakeResponse {
            matched,
            server_protocol: (!server_match).then(|| self.service.protocol_json().to_string()),
            server_hash: (!server_match).then(|| self.service.fingerprint()),
            meta: None,
        };
        (hres, adapter, err)
    }

    fn install_client(&self, hash: [u8; 16], json: &str) -> Result<Arc<Adapter>> {
        let client = Service::from_json(json)
            .map_err(|e| Error::new(ErrorKind::InvalidHandshakeRequest, e.to_string()))?;
        let adapter = Arc::new(Adapter::new(&client, &self.service, hash, true)?);
        self.adapters.insert(hash, adapter.clone());
        Ok(adapter)
    }

    /// Handshake response for a request that could not even be decoded.
    pub(crate) fn mismatch_handshake_response(&self) -> HandshakeResponse {
        HandshakeResponse {
            matched: HandshakeMatch::None,
            server_protocol: Some(self.service.protocol_json().to_string()),
            server_hash: Some(self.service.fingerprint()),
            meta: None,
        }
    }

    pub(crate) fn format_system_error(&self, err: &Error) -> String {
        match self.formatter.read().unwrap().as_ref() {
            Some(formatter) => formatter(err),
            None => err.kind.rpc_code().to_string(),
        }
    }

    pub(crate) fn emit_error(&self, err: &Error) {
        if !self.options.silent {
            tracing::error!("server error: {err}");
        }
        for hook in self.hooks.read().unwrap().iter() {
            hook(err);
        }
    }

    /// Decodes one incoming request body against the channel's adapter.
    pub(crate) fn decode_call(
        &self,
        adapter: &Adapter,
        body: Bytes,
    ) -> Result<crate::msg::WrappedRequest> {
        adapter.decode_request(body)
    }

    /// Decode-and-dispatch for one-shot exchanges.
    pub(crate) async fn handle_call(
        &self,
        adapter: &Adapter,
        body: Bytes,
        info: ChannelInfo,
    ) -> Option<Bytes> {
        match self.decode_call(adapter, body) {
            Ok(wreq) => self.dispatch_call(wreq, info).await,
            Err(e) => {
                self.emit_error(&e);
                Some(system_error_body(&self.format_system_error(&e)))
            }
        }
    }

    /// Dispatches one decoded request: middleware forward phase, handler
    /// (the transition), backward phase, response encoding. Returns `None`
    /// when nothing must travel back (one-way messages).
    pub(crate) async fn dispatch_call(
        &self,
        mut wreq: crate::msg::WrappedRequest,
        info: ChannelInfo,
    ) -> Option<Bytes> {
        if wreq.message.is_ping() {
            return Some(ping_response_body());
        }

        let message = wreq.message.clone();
        let mut ctx = CallContext::new(message.clone(), info);
        let mut wres = WrappedResponse::default();
        let middlewares: Vec<Arc<dyn Middleware>> = self.middlewares.read().unwrap().clone();

        let outcome = run_forward(&middlewares, &mut ctx, &mut wreq, &mut wres).await;
        let proceed = outcome.proceed(middlewares.len());
        let ran = outcome.ran;
        let mut cause = outcome.cause;

        if proceed {
            let handler = self
                .handlers
                .read()
                .unwrap()
                .get(&message.name)
                .cloned()
                .or_else(|| self.default_handler.read().unwrap().clone());
            match handler {
                None => {
                    cause = Some(Error::new(
                        ErrorKind::NotImplemented,
                        format!("no handler for {}", message.name),
                    ));
                }
                Some(handler) => match handler(&mut ctx, wreq.body.clone()).await {
                    Ok(value) => {
                        if !message.one_way {
                            wres.response = Some(value);
                        }
                    }
                    Err(e) => cause = Some(e),
                },
            }
        }
        let cause = run_backward(&middlewares, ran, &mut ctx, &mut wres, cause).await;

        if message.one_way {
            if let Some(e) = cause {
                self.emit_error(&e);
            }
            return None;
        }

        if let Some(err) = cause {
            self.emit_error(&err);
            match err.kind {
                ErrorKind::Application(value) => {
                    let value = *value;
                    wres.error = Some(match value {
                        Value::Union(..) => value,
                        Value::String(s) if !self.options.strict_errors => {
                            Value::Union(0, Box::new(Value::String(s)))
                        }
                        other => other,
                    });
                    wres.response = None;
                }
                _ => return Some(system_error_body(&self.format_system_error(&err))),
            }
        }

        match wres.encode_to_bytes(&message) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                let err = Error::new(ErrorKind::InternalServerError, e.to_string());
                self.emit_error(&err);
                Some(system_error_body(&self.format_system_error(&err)))
            }
        }
    }
}

/// Server façade: holds the service, handler table, middleware list, and
/// channel set.
pub struct Server {
    shared: Arc<ServerShared>,
    channels: RwLock<Vec<ServerChannel>>,
}

impl Service {
    /// Creates a server for this protocol with default options.
    #[must_use]
    pub fn server(self: &Arc<Self>) -> Server {
        self.server_with_options(ServerOptions::default())
    }

    #[must_use]
    pub fn server_with_options(self: &Arc<Self>, options: ServerOptions) -> Server {
        Server {
            shared: Arc::new(ServerShared {
                service: self.clone(),
                options,
                adapters: dashmap::DashMap::default(),
                handlers: RwLock::default(),
                default_handler: RwLock::default(),
                formatter: RwLock::default(),
                hooks: RwLock::default(),
                middlewares: RwLock::default(),
            }),
            channels: RwLock::default(),
        }
    }
}

impl Server {
    #[must_use]
    pub fn service(&self) -> &Arc<Service> {
        &self.shared.service
    }

    /// Accepts a stateful connection over a byte transport.
    pub fn create_channel(&self, transport: Transport, options: ChannelOptions) -> ServerChannel {
        let pump_stop = CancellationToken::new();
        let duplex = spawn_record_pumps(
            transport,
            Dialect::Netty,
            options.end_writable,
            pump_stop.clone(),
        );
        let channel = StatefulServerChannel::create(self.shared.clone(), duplex, options);
        tokio::spawn({
            let channel = Arc::clone(&channel);
            async move {
                channel.closed().await;
                pump_stop.cancel();
            }
        });
        let channel = ServerChannel::Stateful(channel);
        self.channels.write().unwrap().push(channel.clone());
        channel
    }

    /// Accepts a stateful connection over a record-level transport, skipping
    /// the framing codec.
    pub fn create_channel_from_records(
        &self,
        duplex: RecordDuplex,
        options: ChannelOptions,
    ) -> ServerChannel {
        let channel = ServerChannel::Stateful(StatefulServerChannel::create(
            self.shared.clone(),
            duplex,
            options,
        ));
        self.channels.write().unwrap().push(channel.clone());
        channel
    }

    /// Serves one-shot exchanges: `factory` yields a transport per incoming
    /// request, `None` to stop.
    pub fn create_stateless_channel(
        &self,
        factory: AcceptorFactory,
        options: ChannelOptions,
    ) -> ServerChannel {
        let channel = ServerChannel::Stateless(StatelessServerChannel::create(
            self.shared.clone(),
            factory,
            options,
        ));
        self.channels.write().unwrap().push(channel.clone());
        channel
    }

    /// Registers the handler for a message. Fails if the protocol does not
    /// declare the message.
    pub fn on_message<F>(&self, name: &str, handler: F) -> Result<()>
    where
        F: for<'a> Fn(&'a mut CallContext, Value) -> BoxFuture<'a, Result<Value>>
            + Send
            + Sync
            + 'static,
    {
        if self.shared.service.message(name).is_none() {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("unknown message: {name}"),
            ));
        }
        self.shared
            .handlers
            .write()
            .unwrap()
            .insert(name.to_string(), Arc::new(handler));
        Ok(())
    }

    /// Fallback handler for messages without a registered one.
    pub fn set_default_handler<F>(&self, handler: F)
    where
        F: for<'a> Fn(&'a mut CallContext, Value) -> BoxFuture<'a, Result<Value>>
            + Send
            + Sync
            + 'static,
    {
        *self.shared.default_handler.write().unwrap() = Some(Arc::new(handler));
    }

    pub fn set_system_error_formatter(&self, formatter: SystemErrorFormatter) {
        *self.shared.formatter.write().unwrap() = Some(formatter);
    }

    /// Observes every server-side error, application errors included.
    pub fn on_error(&self, hook: ErrorHook) {
        self.shared.hooks.write().unwrap().push(hook);
    }

    /// Appends a middleware to the chain.
    pub fn use_middleware(&self, middleware: Arc<dyn Middleware>) {
        self.shared.middlewares.write().unwrap().push(middleware);
    }

    #[must_use]
    pub fn active_channels(&self) -> Vec<ServerChannel> {
        let mut channels = self.channels.write().unwrap();
        channels.retain(|c| !c.is_destroyed());
        channels.clone()
    }

    pub fn destroy_channels(&self, no_wait: bool) {
        let channels = std::mem::take(&mut *self.channels.write().unwrap());
        for channel in channels {
            channel.destroy(no_wait);
        }
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("service", &self.shared.service.name())
            .field("channels", &self.channels.read().unwrap().len())
            .finish()
    }
}
