use std::sync::{Arc, RwLock};
use std::time::Duration;

use bytes::Bytes;

use super::{ChannelCore, ChannelOptions};
use crate::adapter::Adapter;
use crate::client::ClientShared;
use crate::error::{Error, ErrorKind, Result};
use crate::frame::{Dialect, Record};
use crate::handshake::{HandshakeRequest, HandshakeResponse};
use crate::msg::system_error_body;
use crate::server::ServerShared;
use crate::transport::{AcceptorFactory, Transport, TransportFactory, read_record, write_record};

/// Client channel over one-shot transports: every call opens a fresh
/// readable/writable pair, carries a handshake, and reads exactly one record
/// back.
pub struct StatelessClientChannel {
    core: ChannelCore,
    shared: Arc<ClientShared>,
    options: ChannelOptions,
    factory: TransportFactory,
    adapter: RwLock<Option<Arc<Adapter>>>,
}

impl StatelessClientChannel {
    pub(crate) fn create(
        shared: Arc<ClientShared>,
        factory: TransportFactory,
        options: ChannelOptions,
    ) -> Arc<Self> {
        Arc::new(Self {
            core: ChannelCore::new(options.scope.clone(), false),
            shared,
            options,
            factory,
            adapter: RwLock::new(None),
        })
    }

    pub(crate) async fn call(
        self: &Arc<Self>,
        one_way: bool,
        body: Bytes,
        timeout: Duration,
    ) -> Result<Bytes> {
        if self.core.is_draining() {
            return Err(Error::new(
                ErrorKind::ChannelDestroyed,
                "channel is draining".to_string(),
            ));
        }

        let (id, rx) = self.core.registry.add(timeout);
        tokio::spawn({
            let channel = Arc::clone(self);
            async move {
                tokio::select! {
                    () = channel.core.stop_token().cancelled() => {}
                    result = channel.exchange(id, one_way, body) => {
                        channel.core.registry.resolve(id, result);
                        channel.core.finish_drain_if_idle();
                    }
                }
            }
        });

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::kind(ErrorKind::Interrupted)),
        }
    }

    /// One request/response exchange on a fresh transport, retrying once with
    /// the full protocol after a NONE handshake. Later calls drop back to
    /// hash-only handshakes, relying on the peer's fingerprint cache.
    async fn exchange(&self, id: u32, one_way: bool, body: Bytes) -> Result<Bytes> {
        for attempt in 0..2 {
            let hreq = self.shared.build_handshake_request(attempt > 0);
            let mut transport = (self.factory)().await?;

            // the id is embedded for transports that preserve it, even
            // though each exchange is isolated
            let record = Record::new(
                Some(id),
                vec![hreq.encode_to_bytes(), body.clone()],
            );
            write_record(transport.writer.as_mut(), Dialect::Standard, &record).await?;
            if self.options.end_writable {
                use tokio::io::AsyncWriteExt;
                let _ = transport.writer.shutdown().await;
            }
            if one_way {
                return Ok(Bytes::new());
            }

            let response = read_record(transport.reader.as_mut(), Dialect::Standard).await?;
            let mut rbody = response.body();
            let hres = HandshakeResponse::decode(&mut rbody)?;
            match self.shared.process_handshake_response(&hres)? {
                None => continue,
                Some(adapter) => {
                    *self.adapter.write().unwrap() = Some(adapter);
                    return Ok(rbody);
                }
            }
        }
        Err(Error::new(
            ErrorKind::UnknownProtocol,
            "handshake failed after protocol retry".to_string(),
        ))
    }

    pub(crate) fn adapter(&self) -> Option<Arc<Adapter>> {
        self.adapter.read().unwrap().clone()
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.core.is_destroyed()
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.core.registry.pending_count()
    }

    pub fn destroy(&self, no_wait: bool) {
        self.core.destroy(no_wait);
    }

    pub(crate) fn core(&self) -> &ChannelCore {
        &self.core
    }
}

impl std::fmt::Debug for StatelessClientChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatelessClientChannel")
            .field("scope", &self.core.scope)
            .finish()
    }
}

/// Server channel over one-shot transports: each accepted transport carries
/// exactly one record in and one record out.
pub struct StatelessServerChannel {
    core: ChannelCore,
    shared: Arc<ServerShared>,
    options: ChannelOptions,
}

impl StatelessServerChannel {
    pub(crate) fn create(
        shared: Arc<ServerShared>,
        factory: AcceptorFactory,
        options: ChannelOptions,
    ) -> Arc<Self> {
        let channel = Arc::new(Self {
            core: ChannelCore::new(options.scope.clone(), false),
            shared,
            options,
        });
        tokio::spawn({
            let channel = Arc::clone(&channel);
            async move { channel.accept_loop(factory).await }
        });
        channel
    }

    async fn accept_loop(self: Arc<Self>, factory: AcceptorFactory) {
        loop {
            let accepted = tokio::select! {
                () = self.core.stop_token().cancelled() => break,
                accepted = (factory)() => accepted,
            };
            match accepted {
                Ok(Some(transport)) => {
                    let channel = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(e) = channel.handle_exchange(transport).await {
                            tracing::error!("stateless exchange failed: {e}");
                        }
                    });
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::error!("stateless accept failed: {e}");
                    break;
                }
            }
        }
        self.core.destroy(true);
    }

    async fn handle_exchange(&self, mut transport: Transport) -> Result<()> {
        let record = read_record(transport.reader.as_mut(), Dialect::Standard).await?;
        let mut body = record.body();

        let payload = match HandshakeRequest::decode(&mut body) {
            Err(e) => {
                self.shared.emit_error(&e);
                vec![
                    self.shared.mismatch_handshake_response().encode_to_bytes(),
                    system_error_body(&self.shared.format_system_error(&e)),
                ]
            }
            Ok(hreq) => {
                let (hres, adapter, err) = self.shared.process_handshake(&hreq);
                match adapter {
                    Some(adapter) => {
                        let mut payload = vec![hres.encode_to_bytes()];
                        if let Some(response) = self
                            .shared
                            .handle_call(&adapter, body, self.core.info())
                            .await
                        {
                            payload.push(response);
                        }
                        payload
                    }
                    None => {
                        let mut payload = vec![hres.encode_to_bytes()];
                        if let Some(e) = err {
                            if e.kind == ErrorKind::UnknownProtocol {
                                tracing::debug!("handshake miss: {e}");
                            } else {
                                self.shared.emit_error(&e);
                                payload
                                    .push(system_error_body(&self.shared.format_system_error(&e)));
                            }
                        }
                        payload
                    }
                }
            }
        };

        write_record(
            transport.writer.as_mut(),
            Dialect::Standard,
            &Record::new(record.id, payload),
        )
        .await?;
        if self.options.end_writable {
            use tokio::io::AsyncWriteExt;
            let _ = transport.writer.shutdown().await;
        }
        Ok(())
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.core.is_destroyed()
    }

    pub fn destroy(&self, no_wait: bool) {
        self.core.destroy(no_wait);
    }
}

impl std::fmt::Debug for StatelessServerChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatelessServerChannel")
            .field("scope", &self.core.scope)
            .finish()
    }
}
