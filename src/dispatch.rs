//! Dispatch of decoded records to registered handlers
//!
//! Dispatch runs synchronously on the receive loop. The next record is not
//! assembled until every handler has returned for the current one, so a slow
//! handler stalls ingestion instead of growing a queue. The cost is that a
//! handler slower than the device's record rate can push the transport into
//! receive timeouts or server-side drops. Applications that need decoupling
//! should hand records to their own bounded channel from inside the handler.
//!
//! A session holds exactly one handler set. Registering a new set replaces the
//! old one; the receive loop picks the change up before the next record.
//! Handlers in a set run in registration order.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::warn;

use crate::config::CallbackPolicy;
use crate::error::BoxError;
use crate::types::Record;
use crate::{Result, StreamError};

/// Receives decoded records.
///
/// Returning an error (or panicking) produces a [`StreamError::Callback`],
/// handled according to the session's [`CallbackPolicy`].
pub trait RecordHandler: Send + Sync + 'static {
    fn on_record(&self, record: &Record) -> std::result::Result<(), BoxError>;
}

impl<F> RecordHandler for F
where
    F: Fn(&Record) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
{
    fn on_record(&self, record: &Record) -> std::result::Result<(), BoxError> {
        self(record)
    }
}

/// Immutable list of handlers active at one time.
pub type HandlerSet = Arc<[Arc<dyn RecordHandler>]>;

/// Owner side of the handler set, held by the session.
#[derive(Debug)]
pub struct HandlerRegistry {
    tx: watch::Sender<HandlerSet>,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        let empty: HandlerSet = Arc::new([]);
        let (tx, _rx) = watch::channel(empty);
        Self { tx }
    }
}

impl HandlerRegistry {
    /// Replace the active set.
    pub fn replace(&self, handlers: Vec<Arc<dyn RecordHandler>>) {
        self.tx.send_replace(handlers.into());
    }

    pub fn clear(&self) {
        self.replace(Vec::new());
    }

    pub fn len(&self) -> usize {
        self.tx.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Create the loop side that observes replacements.
    pub fn dispatcher(&self, policy: CallbackPolicy) -> Dispatcher {
        Dispatcher { handlers: self.tx.subscribe(), policy }
    }
}

impl std::fmt::Debug for dyn RecordHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RecordHandler")
    }
}

/// Loop side of the handler set.
#[derive(Debug)]
pub struct Dispatcher {
    handlers: watch::Receiver<HandlerSet>,
    policy: CallbackPolicy,
}

impl Dispatcher {
    /// Deliver one record to every handler in the current set.
    ///
    /// Under [`CallbackPolicy::Continue`] each failure is passed to
    /// `on_error` and the remaining handlers still run. Under
    /// [`CallbackPolicy::Fatal`] the first failure is returned.
    pub fn dispatch<E>(&self, record: &Record, mut on_error: E) -> Result<()>
    where
        E: FnMut(StreamError),
    {
        let handlers = self.handlers.borrow().clone();

        for handler in handlers.iter() {
            let outcome = catch_unwind(AssertUnwindSafe(|| handler.on_record(record)));
            let error = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(source)) => StreamError::callback_failed(
                    format!("handler rejected record {}: {source}", record.sequence()),
                    Some(source),
                ),
                Err(payload) => StreamError::callback_failed(
                    format!(
                        "handler panicked on record {}: {}",
                        record.sequence(),
                        panic_message(payload.as_ref())
                    ),
                    None,
                ),
            };

            match self.policy {
                CallbackPolicy::Continue => {
                    warn!(sequence = record.sequence(), error = %error, "Record handler failed");
                    on_error(error);
                }
                CallbackPolicy::Fatal => return Err(error),
            }
        }

        Ok(())
    }

    pub fn policy(&self) -> CallbackPolicy {
        self.policy
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
