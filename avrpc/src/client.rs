use std::sync::{Arc, RwLock};
use std::time::Duration;

use foldhash::fast::RandomState;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_inline_default::serde_inline_default;
use tokio_util::sync::CancellationToken;

use crate::adapter::Adapter;
use crate::channel::{ChannelOptions, StatefulClientChannel, StatelessClientChannel};
use crate::context::CallContext;
use crate::error::{Error, ErrorKind, Result};
use crate::frame::Dialect;
use crate::handshake::{HandshakeRequest, HandshakeResponse};
use crate::middleware::{Middleware, run_backward, run_forward};
use crate::msg::{Headers, WrappedRequest, WrappedResponse};
use crate::schema::Value;
use crate::service::{Message, Service};
use crate::transport::{RecordDuplex, Transport, TransportFactory, spawn_record_pumps};

#[serde_inline_default]
#[derive(Deserialize, Serialize, Debug, PartialEq, Eq, Clone)]
pub struct ClientOptions {
    /// Default per-call timeout.
    #[serde_inline_default(Duration::from_secs(10))]
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Pass remote errors through typed as the message's error union instead
    /// of coercing string errors.
    #[serde_inline_default(false)]
    pub strict_errors: bool,
    /// Park calls until a channel becomes active instead of failing fast.
    #[serde_inline_default(true)]
    pub buffering: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        serde_json::from_value(serde_json::Value::Object(serde_json::Map::default())).unwrap()
    }
}

/// Per-call overrides for [`Client::emit_message_with`].
#[derive(Debug, Default)]
pub struct EmitOptions {
    pub timeout: Option<Duration>,
    pub headers: Headers,
}

/// Picks the channel index for a call when more than one is active.
pub type ChannelPolicy = Box<dyn Fn(&[ClientChannel]) -> usize + Send + Sync>;

/// A client-side channel of either flavor.
#[derive(Clone, Debug)]
pub enum ClientChannel {
    Stateful(Arc<StatefulClientChannel>),
    Stateless(Arc<StatelessClientChannel>),
}

impl ClientChannel {
    pub(crate) async fn call(
        &self,
        one_way: bool,
        body: bytes::Bytes,
        timeout: Duration,
    ) -> Result<bytes::Bytes> {
        match self {
            ClientChannel::Stateful(channel) => channel.call(one_way, body, timeout).await,
            ClientChannel::Stateless(channel) => channel.call(one_way, body, timeout).await,
        }
    }

    pub(crate) fn adapter(&self) -> Option<Arc<Adapter>> {
        match self {
            ClientChannel::Stateful(channel) => channel.adapter(),
            ClientChannel::Stateless(channel) => channel.adapter(),
        }
    }

    fn info(&self) -> crate::context::ChannelInfo {
        match self {
            ClientChannel::Stateful(channel) => channel.core().info(),
            ClientChannel::Stateless(channel) => channel.core().info(),
        }
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        match self {
            ClientChannel::Stateful(channel) => channel.is_destroyed(),
            ClientChannel::Stateless(channel) => channel.is_destroyed(),
        }
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        match self {
            ClientChannel::Stateful(channel) => channel.pending_count(),
            ClientChannel::Stateless(channel) => channel.pending_count(),
        }
    }

    pub fn destroy(&self, no_wait: bool) {
        match self {
            ClientChannel::Stateful(channel) => channel.destroy(no_wait),
            ClientChannel::Stateless(channel) => channel.destroy(no_wait),
        }
    }
}

/// State shared between a client and its channels: the service, the adapter
/// cache, and the wire-learned peer protocols. The adapter cache is
/// append-only once a fingerprint is installed.
pub(crate) struct ClientShared {
    pub(crate) service: Arc<Service>,
    adapters: dashmap::DashMap<[u8; 16], Arc<Adapter>, RandomState>,
    remote_protocols: dashmap::DashMap<[u8; 16], String, RandomState>,
    /// Best known peer fingerprint, sent as `serverHash` in handshakes.
    server_hash: RwLock<[u8; 16]>,
    pub(crate) channel_added: tokio::sync::Notify,
}

impl ClientShared {
    fn new(service: Arc<Service>) -> Result<Arc<Self>> {
        let fingerprint = service.fingerprint();
        let shared = Arc::new(Self {
            adapters: dashmap::DashMap::default(),
            remote_protocols: dashmap::DashMap::default(),
            server_hash: RwLock::new(fingerprint),
            channel_added: tokio::sync::Notify::new(),
            service,
        });
        let own = Adapter::new(&shared.service, &shared.service, fingerprint, false)?;
        shared.adapters.insert(fingerprint, Arc::new(own));
        Ok(shared)
    }

    pub(crate) fn build_handshake_request(&self, include_protocol: bool) -> HandshakeRequest {
        HandshakeRequest {
            client_hash: self.service.fingerprint(),
            client_protocol: include_protocol
                .then(|| self.service.protocol_json().to_string()),
            server_hash: *self.server_hash.read().unwrap(),
            meta: None,
        }
    }

    /// Applies a handshake response: installs any adapter learned from the
    /// wire and returns the adapter now current for the peer. `None` means
    /// the server misses our protocol and the handshake must be retried with
    /// it included.
    pub(crate) fn process_handshake_response(
        &self,
        hres: &HandshakeResponse,
    ) -> Result<Option<Arc<Adapter>>> {
        use crate::handshake::HandshakeMatch;
        // a mismatching server teaches us its protocol for the next round
        if let (Some(hash), Some(json)) = (&hres.server_hash, &hres.server_protocol) {
            let adapter = self.install_remote(*hash, json)?;
            if hres.matched == HandshakeMatch::None {
                return Ok(None);
            }
            return Ok(Some(adapter));
        }
        match hres.matched {
            HandshakeMatch::None => Ok(None),
            HandshakeMatch::Both | HandshakeMatch::Client => {
                let hash = hres
                    .server_hash
                    .unwrap_or_else(|| *self.server_hash.read().unwrap());
                self.adapters
                    .get(&hash)
                    .map(|entry| Some(Arc::clone(entry.value())))
                    .ok_or_else(|| {
                        Error::new(
                            ErrorKind::InvalidHandshakeResponse,
                            "matched handshake for an unknown server hash".to_string(),
                        )
                    })
            }
        }
    }

    fn install_remote(&self, hash: [u8; 16], json: &str) -> Result<Arc<Adapter>> {
        if let Some(entry) = self.adapters.get(&hash) {
            let adapter = Arc::clone(entry.value());
            drop(entry);
            *self.server_hash.write().unwrap() = hash;
            return Ok(adapter);
        }
        let remote = Service::from_json(json)
            .map_err(|e| Error::new(ErrorKind::InvalidHandshakeResponse, e.to_string()))?;
        let adapter = Arc::new(Adapter::new(&self.service, &remote, hash, true)?);
        self.adapters.insert(hash, adapter.clone());
        self.remote_protocols.insert(hash, json.to_string());
        *self.server_hash.write().unwrap() = hash;
        Ok(adapter)
    }
}

/// Client façade: holds the service, middleware list, and channel set, and
/// dispatches calls by message name.
pub struct Client {
    shared: Arc<ClientShared>,
    options: ClientOptions,
    channels: RwLock<Vec<ClientChannel>>,
    middlewares: RwLock<Vec<Arc<dyn Middleware>>>,
    policy: RwLock<Option<ChannelPolicy>>,
}

impl Service {
    /// Creates a client for this protocol with default options.
    pub fn client(self: &Arc<Self>) -> Result<Client> {
        self.client_with_options(ClientOptions::default())
    }

    pub fn client_with_options(self: &Arc<Self>, options: ClientOptions) -> Result<Client> {
        Ok(Client {
            shared: ClientShared::new(self.clone())?,
            options,
            channels: RwLock::default(),
            middlewares: RwLock::default(),
            policy: RwLock::default(),
        })
    }
}

impl Client {
    #[must_use]
    pub fn service(&self) -> &Arc<Service> {
        &self.shared.service
    }

    /// Opens a stateful channel over a byte transport.
    pub fn create_channel(&self, transport: Transport, options: ChannelOptions) -> ClientChannel {
        let pump_stop = CancellationToken::new();
        let duplex = spawn_record_pumps(
            transport,
            Dialect::Netty,
            options.end_writable,
            pump_stop.clone(),
        );
        self.create_channel_from_records_inner(duplex, options, Some(pump_stop))
    }

    /// Opens a stateful channel over a record-level transport, skipping the
    /// framing codec.
    pub fn create_channel_from_records(
        &self,
        duplex: RecordDuplex,
        options: ChannelOptions,
    ) -> ClientChannel {
        self.create_channel_from_records_inner(duplex, options, None)
    }

    fn create_channel_from_records_inner(
        &self,
        duplex: RecordDuplex,
        options: ChannelOptions,
        pump_stop: Option<CancellationToken>,
    ) -> ClientChannel {
        let channel = StatefulClientChannel::create(self.shared.clone(), duplex, options);
        if let Some(stop) = pump_stop {
            tokio::spawn({
                let channel = Arc::clone(&channel);
                async move {
                    channel.closed().await;
                    stop.cancel();
                }
            });
        }
        let channel = ClientChannel::Stateful(channel);
        self.register_channel(channel.clone());
        channel
    }

    /// Opens a stateless channel: `factory` yields a fresh transport per
    /// call.
    pub fn create_stateless_channel(
        &self,
        factory: TransportFactory,
        options: ChannelOptions,
    ) -> ClientChannel {
        let channel = ClientChannel::Stateless(StatelessClientChannel::create(
            self.shared.clone(),
            factory,
            options,
        ));
        self.register_channel(channel.clone());
        channel
    }

    fn register_channel(&self, channel: ClientChannel) {
        self.channels.write().unwrap().push(channel);
        self.shared.channel_added.notify_waiters();
    }

    /// Appends a middleware to the chain. Effective for calls issued after
    /// registration.
    pub fn use_middleware(&self, middleware: Arc<dyn Middleware>) {
        self.middlewares.write().unwrap().push(middleware);
    }

    /// Installs the channel selection policy consulted when several channels
    /// are active.
    pub fn set_channel_policy(&self, policy: ChannelPolicy) {
        *self.policy.write().unwrap() = Some(policy);
    }

    #[must_use]
    pub fn active_channels(&self) -> Vec<ClientChannel> {
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

    /// Peer protocols learned from the wire, as `(fingerprint hex, protocol
    /// JSON)` pairs. Seeded caches are consulted by the handshake but not
    /// reported here.
    #[must_use]
    pub fn remote_protocols(&self) -> Vec<(String, String)> {
        self.shared
            .remote_protocols
            .iter()
            .map(|entry| {
                let hex: String = entry.key().iter().map(|b| format!("{b:02x}")).collect();
                (hex, entry.value().clone())
            })
            .collect()
    }

    /// Emits a call with positional arguments packed into the request record.
    pub async fn emit_message(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        let message = self.message(name)?;
        let request = crate::service::request_record(&message, args);
        self.emit(message, request, EmitOptions::default()).await
    }

    /// Emits a call with an explicit request record and per-call options.
    pub async fn emit_message_with(
        &self,
        name: &str,
        request: Value,
        options: EmitOptions,
    ) -> Result<Value> {
        let message = self.message(name)?;
        self.emit(message, request, options).await
    }

    fn message(&self, name: &str) -> Result<Arc<Message>> {
        self.shared.service.message(name).ok_or_else(|| {
            Error::new(ErrorKind::InvalidArgument, format!("unknown message: {name}"))
        })
    }

    async fn emit(
        &self,
        message: Arc<Message>,
        request: Value,
        options: EmitOptions,
    ) -> Result<Value> {
        let timeout = options.timeout.unwrap_or(self.options.timeout);
        let channel = self.select_channel().await?;

        let mut ctx = CallContext::new(message.clone(), channel.info());
        let mut wreq = WrappedRequest::new(message.clone(), request);
        wreq.headers = options.headers;
        let mut wres = WrappedResponse::default();
        let middlewares: Vec<Arc<dyn Middleware>> =
            self.middlewares.read().unwrap().clone();

        let outcome = run_forward(&middlewares, &mut ctx, &mut wreq, &mut wres).await;
        let proceed = outcome.proceed(middlewares.len());
        let ran = outcome.ran;
        let mut cause = outcome.cause;
        if proceed {
            // the transition: serialize, register, write, await, decode
            let result: Result<()> = async {
                let body = wreq.encode_to_bytes()?;
                let raw = channel.call(message.one_way, body, timeout).await?;
                if !message.one_way {
                    let adapter = channel.adapter().ok_or_else(|| {
                        Error::new(
                            ErrorKind::InvalidResponse,
                            "no adapter installed on channel".to_string(),
                        )
                    })?;
                    adapter.decode_response(raw, &mut wres, &message)?;
                }
                Ok(())
            }
            .await;
            if let Err(e) = result {
                cause = Some(e);
            }
        }
        let cause = run_backward(&middlewares, ran, &mut ctx, &mut wres, cause).await;

        if let Some(err) = cause {
            return Err(err);
        }
        if let Some(error_value) = wres.error.take() {
            return Err(self.coerce_error(error_value));
        }
        Ok(wres.response.take().unwrap_or(Value::Null))
    }

    /// Single-channel fast path, then the user policy, then a uniform random
    /// pick. With buffering enabled a call with no active channel parks until
    /// one arrives, then retries once.
    async fn select_channel(&self) -> Result<ClientChannel> {
        let mut waited = false;
        loop {
            let notified = self.shared.channel_added.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let alive = self.active_channels();
            match alive.len() {
                0 => {}
                1 => return Ok(alive[0].clone()),
                n => {
                    let index = match self.policy.read().unwrap().as_ref() {
                        Some(policy) => policy(&alive).min(n - 1),
                        None => rand::rng().random_range(0..n),
                    };
                    return Ok(alive[index].clone());
                }
            }
            if !self.options.buffering || waited {
                return Err(Error::new(
                    ErrorKind::NoActiveChannels,
                    "no active channels".to_string(),
                ));
            }
            waited = true;
            notified.await;
        }
    }

    /// Error coercion per client mode. Strict mode surfaces the typed error
    /// value verbatim; non-strict mode turns string errors into plain
    /// message-carrying errors.
    fn coerce_error(&self, value: Value) -> Error {
        if self.options.strict_errors {
            let msg = match &value {
                Value::Union(_, inner) => format!("{inner:?}"),
                other => format!("{other:?}"),
            };
            return Error::application(value, msg);
        }
        match value {
            Value::Union(0, inner) => match *inner {
                Value::String(s) => Error::application(Value::String(s.clone()), s),
                other => Error::application(other.clone(), format!("{other:?}")),
            },
            Value::String(s) => Error::application(Value::String(s.clone()), s),
            other => {
                let unwrapped = other.unwrap_union().clone();
                let msg = format!("{unwrapped:?}");
                Error::application(unwrapped, msg)
            }
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("service", &self.shared.service.name())
            .field("channels", &self.channels.read().unwrap().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = ClientOptions::default();
        assert_eq!(options.timeout, Duration::from_secs(10));
        assert!(!options.strict_errors);
        assert!(options.buffering);
    }

    #[tokio::test]
    async fn test_unknown_message() {
        let svc = Service::from_json(r#"{"protocol":"P","messages":{}}"#).unwrap();
        let client = svc.client().unwrap();
        let err = client.emit_message("nope", vec![]).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_no_active_channels_without_buffering() {
        let svc = Service::from_json(
            r#"{"protocol":"P","messages":{"m":{"request":[],"response":"null"}}}"#,
        )
        .unwrap();
        let client = svc
            .client_with_options(ClientOptions {
                buffering: false,
                ..ClientOptions::default()
            })
            .unwrap();
        let err = client.emit_message("m", vec![]).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NoActiveChannels);
    }
}
