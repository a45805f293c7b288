//! Channel variants: stateless/stateful on each of the client and server
//! sides. A channel owns its transport, drives the handshake, and routes
//! records between the wire and the registry or dispatcher.

mod stateful;
mod stateless;

pub use stateful::{StatefulClientChannel, StatefulServerChannel};
pub use stateless::{StatelessClientChannel, StatelessServerChannel};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_inline_default::serde_inline_default;
use tokio_util::sync::CancellationToken;

use crate::context::ChannelInfo;
use crate::registry::{PREFIX_MASK, Registry};

/// Derives the 16-bit scope prefix embedded in the high bits of wire ids.
/// The hash must agree between peers, so it comes from md5 rather than a
/// process-seeded hasher.
#[must_use]
pub(crate) fn scope_prefix(scope: Option<&str>) -> u32 {
    match scope {
        None => 0,
        Some(s) => {
            let digest = md5::compute(s.as_bytes());
            (u32::from(digest.0[0]) << 24) | (u32::from(digest.0[1]) << 16)
        }
    }
}

#[serde_inline_default]
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ChannelOptions {
    /// Scope string isolating this channel's frames on a shared transport.
    #[serde_inline_default(None)]
    pub scope: Option<String>,
    /// Handshake timeout for stateful channels.
    #[serde_inline_default(Duration::from_secs(10))]
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Skip the connection probe; the first real call carries the handshake.
    #[serde_inline_default(false)]
    pub no_ping: bool,
    /// Shut the writable side down once the channel is done with it.
    #[serde_inline_default(true)]
    pub end_writable: bool,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        serde_json::from_value(serde_json::Value::Object(serde_json::Map::default())).unwrap()
    }
}

/// State shared by every channel variant: the scope prefix, the pending-call
/// registry, and the draining/destroyed flags.
pub(crate) struct ChannelCore {
    pub scope: Option<String>,
    pub prefix: u32,
    pub registry: Arc<Registry>,
    pub stateful: bool,
    draining: AtomicBool,
    stop: CancellationToken,
}

impl ChannelCore {
    pub fn new(scope: Option<String>, stateful: bool) -> Self {
        let prefix = scope_prefix(scope.as_deref());
        Self {
            scope,
            prefix,
            registry: Arc::new(Registry::new(prefix)),
            stateful,
            draining: AtomicBool::new(false),
            stop: CancellationToken::new(),
        }
    }

    /// Frames whose prefix belongs to another logical channel are discarded.
    pub fn accepts(&self, id: Option<u32>) -> bool {
        match id {
            Some(id) => id & PREFIX_MASK == self.prefix,
            None => true,
        }
    }

    pub fn info(&self) -> ChannelInfo {
        ChannelInfo {
            scope: self.scope.clone(),
            stateful: self.stateful,
        }
    }

    /// Starts draining; with `no_wait`, or with nothing pending, in-flight
    /// calls are interrupted and the channel reaches end-of-transmission
    /// immediately. Otherwise it stays open for responses but refuses new
    /// sends.
    pub fn destroy(&self, no_wait: bool) {
        self.draining.store(true, Ordering::SeqCst);
        if no_wait || self.registry.pending_count() == 0 {
            self.registry.clear();
            self.stop.cancel();
        }
    }

    /// Completes a pending drain once the last call resolves.
    pub fn finish_drain_if_idle(&self) {
        if self.draining.load(Ordering::SeqCst) && self.registry.pending_count() == 0 {
            self.stop.cancel();
        }
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    pub fn is_destroyed(&self) -> bool {
        self.stop.is_cancelled()
    }

    pub fn stop_token(&self) -> &CancellationToken {
        &self.stop
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_prefix() {
        assert_eq!(scope_prefix(None), 0);
        let a = scope_prefix(Some("A"));
        let b = scope_prefix(Some("B"));
        assert_ne!(a, b);
        assert_eq!(a & !PREFIX_MASK, 0);
        // deterministic across calls (and processes)
        assert_eq!(a, scope_prefix(Some("A")));
    }

    #[test]
    fn test_accepts() {
        let core = ChannelCore::new(Some("A".to_string()), true);
        assert!(core.accepts(Some(core.prefix | 0x12)));
        assert!(!core.accepts(Some(core.prefix ^ 0x0001_0000)));
        assert!(core.accepts(None));

        let unscoped = ChannelCore::new(None, true);
        assert!(unscoped.accepts(Some(0x0000_0042)));
        assert!(!unscoped.accepts(Some(core.prefix | 0x42)));
    }

    #[test]
    fn test_default_options() {
        let opts = ChannelOptions::default();
        assert_eq!(opts.timeout, Duration::from_secs(10));
        assert!(!opts.no_ping);
        assert!(opts.end_writable);
        assert_eq!(opts.scope, None);
    }

    #[test]
    fn test_drain_lifecycle() {
        let core = ChannelCore::new(None, true);
        assert!(!core.is_draining());
        core.destroy(false);
        assert!(core.is_draining());
        // nothing pending, so eot is immediate
        assert!(core.is_destroyed());
    }
}
