use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use foldhash::fast::RandomState;

use crate::error::{Error, ErrorKind, Result};
use crate::msg::{WrappedRequest, WrappedResponse, read_request_prefix, read_response_prefix};
use crate::schema::Resolver;
use crate::service::{Message, Service};

struct MessageResolvers {
    message: Arc<Message>,
    /// Server reads what the client wrote.
    request: Resolver,
    /// Client reads what the server wrote.
    response: Resolver,
    error: Resolver,
}

/// Resolution cache entry for one `(client service, server service)` pair,
/// keyed by the remote peer's fingerprint on the owning client or server.
/// Created lazily on the first successful handshake against an unseen peer
/// and cached forever.
pub struct Adapter {
    fingerprint: [u8; 16],
    is_remote: bool,
    client: Arc<Service>,
    server: Arc<Service>,
    resolvers: HashMap<String, MessageResolvers, RandomState>,
}

impl Adapter {
    /// Compiles resolvers for every message of the client service. Every
    /// client-side message must exist server-side with a matching one-way
    /// flag.
    pub fn new(
        client: &Arc<Service>,
        server: &Arc<Service>,
        fingerprint: [u8; 16],
        is_remote: bool,
    ) -> Result<Self> {
        let mut resolvers = HashMap::default();
        for client_msg in client.messages() {
            let server_msg = server.message(&client_msg.name).ok_or_else(|| {
                Error::new(
                    ErrorKind::IncompatibleProtocol,
                    format!("missing server message: {}", client_msg.name),
                )
            })?;
            if client_msg.one_way != server_msg.one_way {
                return Err(Error::new(
                    ErrorKind::IncompatibleProtocol,
                    format!("inconsistent one-way message: {}", client_msg.name),
                ));
            }
            resolvers.insert(
                client_msg.name.clone(),
                MessageResolvers {
                    message: server_msg.clone(),
                    request: Resolver::new(client_msg.request.clone(), server_msg.request.clone())?,
                    response: Resolver::new(
                        server_msg.response.clone(),
                        client_msg.response.clone(),
                    )?,
                    error: Resolver::new(server_msg.errors.clone(), client_msg.errors.clone())?,
                },
            );
        }
        Ok(Self {
            fingerprint,
            is_remote,
            client: client.clone(),
            server: server.clone(),
            resolvers,
        })
    }

    #[must_use]
    pub fn fingerprint(&self) -> [u8; 16] {
        self.fingerprint
    }

    #[must_use]
    pub fn is_remote(&self) -> bool {
        self.is_remote
    }

    #[must_use]
    pub fn client_service(&self) -> &Arc<Service> {
        &self.client
    }

    #[must_use]
    pub fn server_service(&self) -> &Arc<Service> {
        &self.server
    }

    /// Decodes an incoming request body on the server side. An empty message
    /// name denotes the built-in ping, whose body must be empty.
    pub(crate) fn decode_request(&self, body: Bytes) -> Result<WrappedRequest> {
        let mut buf = body;
        let wrap = |e: Error| Error::new(ErrorKind::InvalidRequest, e.to_string());
        let (headers, name) = read_request_prefix(&mut buf).map_err(wrap)?;

        if name.is_empty() {
            if !buf.is_empty() {
                return Err(Error::new(
                    ErrorKind::InvalidRequest,
                    format!("non-empty ping request: {} bytes", buf.len()),
                ));
            }
            let mut wreq = WrappedRequest::new(Message::ping(), crate::schema::Value::Record(vec![]));
            wreq.headers = headers;
            return Ok(wreq);
        }

        let resolvers = self.resolvers.get(&name).ok_or_else(|| {
            Error::new(ErrorKind::InvalidRequest, format!("unknown message: {name}"))
        })?;
        let request = resolvers.request.read(&mut buf).map_err(wrap)?;
        if !buf.is_empty() {
            return Err(Error::new(
                ErrorKind::InvalidRequest,
                format!("trailing request bytes for {name}: {}", buf.len()),
            ));
        }
        let mut wreq = WrappedRequest::new(resolvers.message.clone(), request);
        wreq.headers = headers;
        Ok(wreq)
    }

    /// Decodes an incoming response body on the client side into `wres`.
    pub(crate) fn decode_response(
        &self,
        body: Bytes,
        wres: &mut WrappedResponse,
        message: &Message,
    ) -> Result<()> {
        let mut buf = body;
        let wrap = |e: Error| Error::new(ErrorKind::InvalidResponse, e.to_string());
        let (headers, has_error) = read_response_prefix(&mut buf).map_err(wrap)?;
        wres.headers = headers;

        let resolvers = self.resolvers.get(&message.name).ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidResponse,
                format!("unknown message: {}", message.name),
            )
        })?;
        if has_error {
            wres.error = Some(resolvers.error.read(&mut buf).map_err(wrap)?);
        } else {
            wres.response = Some(resolvers.response.read(&mut buf).map_err(wrap)?);
        }
        if !buf.is_empty() {
            return Err(Error::new(
                ErrorKind::InvalidResponse,
                format!("trailing response bytes for {}: {}", message.name, buf.len()),
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Adapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adapter")
            .field("client", &self.client.name())
            .field("server", &self.server.name())
            .field("is_remote", &self.is_remote)
            .finish()
    }
}
