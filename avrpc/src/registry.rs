use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use bytes::Bytes;
use foldhash::fast::RandomState;
use tokio::sync::oneshot;

use crate::error::{Error, ErrorKind, Result};

/// Number of wire-id bits reserved for the channel scope prefix.
pub(crate) const PREFIX_LENGTH: u32 = 16;
/// Mask selecting the per-call id bits.
pub(crate) const ID_MASK: u32 = (1 << (32 - PREFIX_LENGTH)) - 1;
/// Mask selecting the scope prefix bits.
pub(crate) const PREFIX_MASK: u32 = !ID_MASK;

/// Per-channel table correlating outgoing call ids with their completion
/// channels. Ids wrap within the low 16 bits; the scope prefix occupies the
/// high bits of every id handed out.
pub struct Registry {
    prefix: u32,
    index: AtomicU32,
    pending: dashmap::DashMap<u32, oneshot::Sender<Result<Bytes>>, RandomState>,
}

impl Registry {
    #[must_use]
    pub fn new(prefix: u32) -> Self {
        Self {
            prefix,
            index: AtomicU32::new(0),
            pending: dashmap::DashMap::default(),
        }
    }

    #[must_use]
    pub fn prefix(&self) -> u32 {
        self.prefix
    }

    /// Allocates the next id and registers a completion slot for it. When
    /// `timeout` is non-zero, a timer fires the slot with a timeout error and
    /// frees it.
    pub fn add(self: &Arc<Self>, timeout: Duration) -> (u32, oneshot::Receiver<Result<Bytes>>) {
        let key = self.index.fetch_add(1, Ordering::SeqCst) & ID_MASK;
        let (tx, rx) = oneshot::channel();
        self.pending.insert(key, tx);

        if !timeout.is_zero() {
            let registry = Arc::clone(self);
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                registry.resolve(key, Err(Error::kind(ErrorKind::Timeout)));
            });
        }

        (self.prefix | key, rx)
    }

    /// Completes the slot registered under `id`, masking off the scope
    /// prefix. A slot fires at most once; resolving an unknown id (late
    /// response after a timeout, or a foreign frame) is a no-op.
    pub fn resolve(&self, id: u32, result: Result<Bytes>) {
        if let Some((_, tx)) = self.pending.remove(&(id & ID_MASK)) {
            let _ = tx.send(result);
        } else {
            tracing::debug!("no pending call for id {id:#010x}");
        }
    }

    /// Interrupts every pending call and empties the table.
    pub fn clear(&self) {
        let keys: Vec<u32> = self.pending.iter().map(|entry| *entry.key()).collect();
        for key in keys {
            if let Some((_, tx)) = self.pending.remove(&key) {
                let _ = tx.send(Err(Error::kind(ErrorKind::Interrupted)));
            }
        }
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("prefix", &self.prefix)
            .field("pending", &self.pending.len())
            .finish()
    }
}
