//! Events reported by a running session

use std::sync::Arc;
use std::time::Duration;

use super::SessionState;
use crate::StreamError;

/// Notification emitted by the receive loop on the session's event channel.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged(SessionState),
    /// A transport connection was established
    Connected { endpoint: String },
    /// The transport failed; the reconnect policy decides what happens next
    TransportError(Arc<StreamError>),
    ReconnectScheduled { attempt: u32, delay: Duration },
    /// A handler failed on one record and the loop continued
    CallbackError { sequence: u64, error: Arc<StreamError> },
    /// The session moved to `Failed`
    Failed(Arc<StreamError>),
}
