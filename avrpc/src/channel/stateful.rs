use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};

use super::{ChannelCore, ChannelOptions};
use crate::adapter::Adapter;
use crate::client::ClientShared;
use crate::error::{Error, ErrorKind, Result};
use crate::frame::Record;
use crate::handshake::{HandshakeRequest, HandshakeResponse};
use crate::msg::{ping_request_body, system_error_body};
use crate::server::ServerShared;
use crate::transport::RecordDuplex;

/// Client end of a long-lived connection: one transport shared across calls,
/// a single handshake, and id-multiplexed responses.
pub struct StatefulClientChannel {
    core: ChannelCore,
    shared: Arc<ClientShared>,
    options: ChannelOptions,
    tx: mpsc::Sender<Record>,
    connected_tx: watch::Sender<bool>,
    connected_rx: watch::Receiver<bool>,
    adapter: RwLock<Option<Arc<Adapter>>>,
    handshake_sent: AtomicBool,
    include_protocol: AtomicBool,
    /// The handshake-bearing record to replay when the server answers NONE.
    pending_handshake: Mutex<Option<(u32, Bytes)>>,
}

impl StatefulClientChannel {
    pub(crate) fn create(
        shared: Arc<ClientShared>,
        duplex: RecordDuplex,
        options: ChannelOptions,
    ) -> Arc<Self> {
        let RecordDuplex { tx, rx } = duplex;
        let (connected_tx, connected_rx) = watch::channel(false);
        let channel = Arc::new(Self {
            core: ChannelCore::new(options.scope.clone(), true),
            shared,
            options,
            tx,
            connected_tx,
            connected_rx,
            adapter: RwLock::new(None),
            handshake_sent: AtomicBool::new(false),
            include_protocol: AtomicBool::new(false),
            pending_handshake: Mutex::new(None),
        });

        tokio::spawn({
            let channel = Arc::clone(&channel);
            async move { channel.recv_loop(rx).await }
        });
        if !channel.options.no_ping {
            tokio::spawn({
                let channel = Arc::clone(&channel);
                async move { channel.send_ping().await }
            });
        }
        channel
    }

    /// Sends the connection probe carrying the handshake, and enforces the
    /// handshake timeout.
    async fn send_ping(self: Arc<Self>) {
        if self.handshake_sent.swap(true, Ordering::SeqCst) {
            return;
        }
        let body = ping_request_body();
        let (id, rx) = self.core.registry.add(self.options.timeout);
        *self.pending_handshake.lock().unwrap() = Some((id, body.clone()));
        let hreq = self.build_handshake_request();
        let record = Record::new(Some(id), vec![hreq.encode_to_bytes(), body]);
        if self.tx.send(record).await.is_err() {
            tracing::error!("handshake send failed: channel transport closed");
            self.core.destroy(true);
            return;
        }
        match rx.await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) if e.kind == ErrorKind::Timeout => {
                tracing::error!("connection timeout");
                self.core.destroy(true);
            }
            Ok(Err(e)) => {
                tracing::error!("handshake failed: {e}");
                self.core.destroy(true);
            }
            Err(_) => {}
        }
    }

    fn build_handshake_request(&self) -> HandshakeRequest {
        self.shared
            .build_handshake_request(self.include_protocol.load(Ordering::SeqCst))
    }

    async fn recv_loop(self: Arc<Self>, mut rx: mpsc::Receiver<Record>) {
        loop {
            let record = tokio::select! {
                () = self.core.stop_token().cancelled() => break,
                record = rx.recv() => match record {
                    Some(record) => record,
                    None => break,
                },
            };
            if !self.core.accepts(record.id) {
                tracing::trace!("discarding frame for foreign scope: {:?}", record.id);
                continue;
            }

            let mut body = record.body();
            if !*self.connected_rx.borrow() {
                let hres = match HandshakeResponse::decode(&mut body) {
                    Ok(hres) => hres,
                    Err(e) => {
                        tracing::error!("invalid handshake response: {e}");
                        self.fail_handshake(e);
                        break;
                    }
                };
                match self.shared.process_handshake_response(&hres) {
                    Err(e) => {
                        tracing::error!("handshake failed: {e}");
                        self.fail_handshake(e);
                        break;
                    }
                    Ok(None) => {
                        // server misses our protocol, replay with it included
                        self.include_protocol.store(true, Ordering::SeqCst);
                        let pending = self.pending_handshake.lock().unwrap().clone();
                        if let Some((id, pending_body)) = pending {
                            let hreq = self.build_handshake_request();
                            let record =
                                Record::new(Some(id), vec![hreq.encode_to_bytes(), pending_body]);
                            if self.tx.send(record).await.is_err() {
                                break;
                            }
                        }
                        continue;
                    }
                    Ok(Some(adapter)) => {
                        *self.adapter.write().unwrap() = Some(adapter);
                        *self.pending_handshake.lock().unwrap() = None;
                        let _ = self.connected_tx.send(true);
                    }
                }
            }

            if let Some(id) = record.id {
                self.core.registry.resolve(id, Ok(body));
                self.core.finish_drain_if_idle();
            }
        }
        self.core.registry.clear();
        self.core.destroy(true);
    }

    /// Fails the handshake-bearing call with the actual cause before the
    /// channel tears down; other pending calls surface as interrupted.
    fn fail_handshake(&self, err: Error) {
        if let Some((id, _)) = self.pending_handshake.lock().unwrap().take() {
            self.core.registry.resolve(id, Err(err));
        }
    }

    async fn wait_connected(&self) -> Result<()> {
        let mut rx = self.connected_rx.clone();
        loop {
            if *rx.borrow() {
                return Ok(());
            }
            tokio::select! {
                () = self.core.stop_token().cancelled() => {
                    return Err(Error::new(
                        ErrorKind::ChannelDestroyed,
                        "channel destroyed before handshake completed".to_string(),
                    ));
                }
                changed = rx.changed() => {
                    changed.map_err(|_| Error::kind(ErrorKind::ChannelDestroyed))?;
                }
            }
        }
    }

    /// Registers a call and writes its frame. One-way calls free their
    /// registry slot immediately with a synthetic empty response.
    pub(crate) async fn call(&self, one_way: bool, body: Bytes, timeout: Duration) -> Result<Bytes> {
        if self.core.is_draining() {
            return Err(Error::new(
                ErrorKind::ChannelDestroyed,
                "channel is draining".to_string(),
            ));
        }

        let carries_handshake =
            !*self.connected_rx.borrow() && !self.handshake_sent.swap(true, Ordering::SeqCst);
        let (id, rx) = self.core.registry.add(timeout);
        let record = if carries_handshake {
            *self.pending_handshake.lock().unwrap() = Some((id, body.clone()));
            let hreq = self.build_handshake_request();
            Record::new(Some(id), vec![hreq.encode_to_bytes(), body])
        } else {
            // buffer behind the in-flight handshake
            if !*self.connected_rx.borrow() {
                self.wait_connected().await?;
            }
            Record::new(Some(id), vec![body])
        };

        self.tx.send(record).await.map_err(|_| {
            Error::new(
                ErrorKind::TransportFailed,
                "channel transport closed".to_string(),
            )
        })?;
        if one_way {
            self.core.registry.resolve(id, Ok(Bytes::new()));
            self.core.finish_drain_if_idle();
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::kind(ErrorKind::Interrupted)),
        }
    }

    pub(crate) fn adapter(&self) -> Option<Arc<Adapter>> {
        self.adapter.read().unwrap().clone()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        *self.connected_rx.borrow()
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

    /// Resolves once the channel reaches end-of-transmission.
    pub async fn closed(&self) {
        self.core.stop_token().cancelled().await;
    }

    pub(crate) fn core(&self) -> &ChannelCore {
        &self.core
    }
}

impl std::fmt::Debug for StatefulClientChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatefulClientChannel")
            .field("scope", &self.core.scope)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Server end of a long-lived connection: the first record carries the
/// handshake, later records are bare requests decoded with the cached
/// adapter. The channel never re-handshakes; a restarting client must open
/// a new one.
pub struct StatefulServerChannel {
    core: ChannelCore,
    shared: Arc<ServerShared>,
    tx: mpsc::Sender<Record>,
    adapter: RwLock<Option<Arc<Adapter>>>,
}

impl StatefulServerChannel {
    pub(crate) fn create(
        shared: Arc<ServerShared>,
        duplex: RecordDuplex,
        options: ChannelOptions,
    ) -> Arc<Self> {
        let RecordDuplex { tx, rx } = duplex;
        let channel = Arc::new(Self {
            core: ChannelCore::new(options.scope.clone(), true),
            shared,
            tx,
            adapter: RwLock::new(None),
        });
        tokio::spawn({
            let channel = Arc::clone(&channel);
            async move { channel.recv_loop(rx).await }
        });
        channel
    }

    async fn recv_loop(self: Arc<Self>, mut rx: mpsc::Receiver<Record>) {
        loop {
            let record = tokio::select! {
                () = self.core.stop_token().cancelled() => break,
                record = rx.recv() => match record {
                    Some(record) => record,
                    None => break,
                },
            };
            if !self.core.accepts(record.id) {
                tracing::trace!("discarding frame for foreign scope: {:?}", record.id);
                continue;
            }

            let mut body = record.body();
            let adapter = self.adapter.read().unwrap().clone();
            match adapter {
                Some(adapter) => self.handle_record(&adapter, body, record.id, None).await,
                None => {
                    let hreq = match HandshakeRequest::decode(&mut body) {
                        Ok(hreq) => hreq,
                        Err(e) => {
                            self.shared.emit_error(&e);
                            let hres = self.shared.mismatch_handshake_response();
                            let payload = vec![
                                hres.encode_to_bytes(),
                                system_error_body(&self.shared.format_system_error(&e)),
                            ];
                            let _ = self.tx.send(Record::new(record.id, payload)).await;
                            continue;
                        }
                    };
                    let (hres, adapter, err) = self.shared.process_handshake(&hreq);
                    match adapter {
                        Some(adapter) => {
                            *self.adapter.write().unwrap() = Some(adapter.clone());
                            self.handle_record(&adapter, body, record.id, Some(hres.encode_to_bytes()))
                                .await;
                        }
                        None => {
                            let mut payload = vec![hres.encode_to_bytes()];
                            if let Some(e) = err {
                                // transient misses retry; terminal failures are
                                // reported to the client as system errors
                                if e.kind == ErrorKind::UnknownProtocol {
                                    tracing::debug!("handshake miss: {e}");
                                } else {
                                    self.shared.emit_error(&e);
                                    payload.push(system_error_body(
                                        &self.shared.format_system_error(&e),
                                    ));
                                }
                            }
                            let _ = self.tx.send(Record::new(record.id, payload)).await;
                        }
                    }
                }
            }
        }
        self.core.destroy(true);
    }

    /// Response-bearing requests are handled concurrently and multiplex back
    /// over the shared sender in completion order; one-way requests run in
    /// arrival order.
    async fn handle_record(
        self: &Arc<Self>,
        adapter: &Arc<Adapter>,
        body: Bytes,
        id: Option<u32>,
        handshake: Option<Bytes>,
    ) {
        let wreq = match self.shared.decode_call(adapter, body) {
            Ok(wreq) => wreq,
            Err(e) => {
                self.shared.emit_error(&e);
                let mut payload = Vec::new();
                if let Some(h) = handshake {
                    payload.push(h);
                }
                payload.push(system_error_body(&self.shared.format_system_error(&e)));
                let _ = self.tx.send(Record::new(id, payload)).await;
                return;
            }
        };

        if wreq.message.one_way {
            let _ = self.shared.dispatch_call(wreq, self.core.info()).await;
            if let Some(h) = handshake {
                let _ = self.tx.send(Record::new(id, vec![h])).await;
            }
            return;
        }

        let channel = Arc::clone(self);
        tokio::spawn(async move {
            let response = channel
                .shared
                .dispatch_call(wreq, channel.core.info())
                .await;
            let mut payload = Vec::new();
            if let Some(h) = handshake {
                payload.push(h);
            }
            if let Some(b) = response {
                payload.push(b);
            }
            if !payload.is_empty() {
                let _ = channel.tx.send(Record::new(id, payload)).await;
            }
        });
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.core.is_destroyed()
    }

    pub fn destroy(&self, no_wait: bool) {
        self.core.destroy(no_wait);
    }

    pub async fn closed(&self) {
        self.core.stop_token().cancelled().await;
    }
}

impl std::fmt::Debug for StatefulServerChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatefulServerChannel")
            .field("scope", &self.core.scope)
            .finish()
    }
}
