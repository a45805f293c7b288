use std::collections::HashMap;
use std::sync::Arc;

use foldhash::fast::RandomState;

use crate::service::Message;

/// Which channel flavor a call is traveling over, available to middleware
/// for configuration lookup.
#[derive(Clone, Debug, Default)]
pub struct ChannelInfo {
    pub scope: Option<String>,
    pub stateful: bool,
}

/// Per-call state threaded explicitly through middleware and handlers, so
/// user code can carry call-scoped values without globals.
pub struct CallContext {
    pub message: Arc<Message>,
    pub channel: ChannelInfo,
    pub locals: HashMap<String, serde_json::Value, RandomState>,
}

impl CallContext {
    #[must_use]
    pub fn new(message: Arc<Message>, channel: ChannelInfo) -> Self {
        Self {
            message,
            channel,
            locals: HashMap::default(),
        }
    }
}

impl std::fmt::Debug for CallContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallContext")
            .field("message", &self.message.name)
            .field("locals", &self.locals.keys())
            .finish()
    }
}
