use std::sync::{Arc, Mutex};

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::BoxFuture;
use crate::error::{Error, ErrorKind, Result};
use crate::frame::{Dialect, Record};

const RECORD_QUEUE_DEPTH: usize = 64;

/// A byte transport: one readable source and one writable sink, owned
/// exclusively by the channel they are handed to.
pub struct Transport {
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    pub writer: Box<dyn AsyncWrite + Send + Unpin>,
}

impl Transport {
    #[must_use]
    pub fn new(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }

    #[must_use]
    pub fn from_tcp(stream: tokio::net::TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self::new(reader, writer)
    }

    #[must_use]
    pub fn from_duplex(stream: tokio::io::DuplexStream) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self::new(reader, writer)
    }

    /// An in-memory transport pair, each side seeing the other's writes.
    #[must_use]
    pub fn pair(max_buf_size: usize) -> (Self, Self) {
        let (a, b) = tokio::io::duplex(max_buf_size);
        (Self::from_duplex(a), Self::from_duplex(b))
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport").finish()
    }
}

/// Produces a fresh transport per call, the stateless client contract.
pub type TransportFactory = Box<dyn Fn() -> BoxFuture<'static, Result<Transport>> + Send + Sync>;

/// Yields one transport per incoming exchange on a stateless server;
/// `None` ends the channel.
pub type AcceptorFactory =
    Box<dyn Fn() -> BoxFuture<'static, Result<Option<Transport>>> + Send + Sync>;

/// A record-level duplex: what channels actually operate on. Constructed
/// from a byte transport by [`spawn_record_pumps`], from a [`RecordHub`]
/// subscription, or directly via [`RecordDuplex::pair`] for transports that
/// carry whole records (skipping the framing codec).
pub struct RecordDuplex {
    pub(crate) tx: mpsc::Sender<Record>,
    pub(crate) rx: mpsc::Receiver<Record>,
}

impl RecordDuplex {
    /// An in-memory record pipe: each side's sends surface on the other
    /// side's receives.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::channel(RECORD_QUEUE_DEPTH);
        let (b_tx, b_rx) = mpsc::channel(RECORD_QUEUE_DEPTH);
        (Self { tx: a_tx, rx: b_rx }, Self { tx: b_tx, rx: a_rx })
    }
}

impl std::fmt::Debug for RecordDuplex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordDuplex").finish()
    }
}

/// Converts a byte transport into a record duplex by spawning a send loop
/// and a recv loop around the framing codec.
pub(crate) fn spawn_record_pumps(
    transport: Transport,
    dialect: Dialect,
    end_writable: bool,
    stop: CancellationToken,
) -> RecordDuplex {
    let Transport { reader, writer } = transport;
    let (out_tx, out_rx) = mpsc::channel(RECORD_QUEUE_DEPTH);
    let (in_tx, in_rx) = mpsc::channel(RECORD_QUEUE_DEPTH);

    tokio::spawn({
        let stop = stop.clone();
        async move {
            tokio::select! {
                () = stop.cancelled() => {}
                r = send_loop(writer, out_rx, dialect, end_writable) => {
                    if let Err(e) = r {
                        tracing::error!("send loop failed: {e}");
                    }
                }
            }
        }
    });

    tokio::spawn(async move {
        tokio::select! {
            () = stop.cancelled() => {}
            r = recv_loop(reader, in_tx, dialect) => {
                if let Err(e) = r {
                    tracing::error!("recv loop failed: {e}");
                }
            }
        }
    });

    RecordDuplex {
        tx: out_tx,
        rx: in_rx,
    }
}

async fn send_loop(
    mut writer: Box<dyn AsyncWrite + Send + Unpin>,
    mut out_rx: mpsc::Receiver<Record>,
    dialect: Dialect,
    end_writable: bool,
) -> Result<()> {
    while let Some(record) = out_rx.recv().await {
        let mut buf = BytesMut::new();
        dialect.encode(&record, &mut buf)?;
        writer
            .write_all(&buf)
            .await
            .map_err(|e| Error::new(ErrorKind::TransportFailed, e.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|e| Error::new(ErrorKind::TransportFailed, e.to_string()))?;
    }
    if end_writable {
        let _ = writer.shutdown().await;
    }
    Ok(())
}

async fn recv_loop(
    mut reader: Box<dyn AsyncRead + Send + Unpin>,
    in_tx: mpsc::Sender<Record>,
    dialect: Dialect,
) -> Result<()> {
    let mut buffer = BytesMut::with_capacity(8 << 10);
    loop {
        while let Some(record) = dialect.parse(&mut buffer)? {
            if in_tx.send(record).await.is_err() {
                return Ok(());
            }
        }
        let n = reader
            .read_buf(&mut buffer)
            .await
            .map_err(|e| Error::new(ErrorKind::TransportFailed, e.to_string()))?;
        if n == 0 {
            return dialect.finish(&buffer);
        }
    }
}

/// Writes one framed record and flushes.
pub(crate) async fn write_record(
    writer: &mut (dyn AsyncWrite + Send + Unpin),
    dialect: Dialect,
    record: &Record,
) -> Result<()> {
    let mut buf = BytesMut::new();
    dialect.encode(record, &mut buf)?;
    writer
        .write_all(&buf)
        .await
        .map_err(|e| Error::new(ErrorKind::TransportFailed, e.to_string()))?;
    writer
        .flush()
        .await
        .map_err(|e| Error::new(ErrorKind::TransportFailed, e.to_string()))
}

/// Reads until exactly one framed record is available.
pub(crate) async fn read_record(
    reader: &mut (dyn AsyncRead + Send + Unpin),
    dialect: Dialect,
) -> Result<Record> {
    let mut buffer = BytesMut::with_capacity(8 << 10);
    loop {
        if let Some(record) = dialect.parse(&mut buffer)? {
            return Ok(record);
        }
        let n = reader
            .read_buf(&mut buffer)
            .await
            .map_err(|e| Error::new(ErrorKind::TransportFailed, e.to_string()))?;
        if n == 0 {
            return Err(Error::new(
                ErrorKind::TransportFailed,
                "transport closed before a full record".to_string(),
            ));
        }
    }
}

/// Owns one physical transport and fans incoming records out to every
/// attached logical channel; outgoing records from all of them interleave on
/// the shared writer. Channels discriminate by their scope prefix.
pub struct RecordHub {
    out_tx: mpsc::Sender<Record>,
    subscribers: Arc<Mutex<Vec<mpsc::Sender<Record>>>>,
    stop: CancellationToken,
}

impl RecordHub {
    #[must_use]
    pub fn new(transport: Transport, dialect: Dialect) -> Self {
        let stop = CancellationToken::new();
        let duplex = spawn_record_pumps(transport, dialect, true, stop.clone());
        let subscribers: Arc<Mutex<Vec<mpsc::Sender<Record>>>> = Arc::default();

        tokio::spawn({
            let subscribers = Arc::clone(&subscribers);
            let mut rx = duplex.rx;
            async move {
                while let Some(record) = rx.recv().await {
                    let subs: Vec<_> = subscribers.lock().unwrap().clone();
                    for sub in subs {
                        let _ = sub.send(record.clone()).await;
                    }
                    subscribers.lock().unwrap().retain(|s| !s.is_closed());
                }
            }
        });

        Self {
            out_tx: duplex.tx,
            stop,
            subscribers,
        }
    }

    /// Attaches a new logical channel to the shared transport.
    #[must_use]
    pub fn attach(&self) -> RecordDuplex {
        let (tx, rx) = mpsc::channel(RECORD_QUEUE_DEPTH);
        self.subscribers.lock().unwrap().push(tx);
        RecordDuplex {
            tx: self.out_tx.clone(),
            rx,
        }
    }

    /// Tears down the pump tasks; attached channels see end-of-stream.
    pub fn shutdown(&self) {
        self.stop.cancel();
    }
}
