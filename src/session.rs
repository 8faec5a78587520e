//! Session handle: the caller-owned connection controller
//!
//! A [`Session`] owns one stream's configuration, handler set and receive loop.
//! There is no global state; dropping the session cancels its loop.
//!
//! ```rust,no_run
//! use ascan_stream::{Record, Session, SessionConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> ascan_stream::Result<()> {
//! // sample_count comes from the device's ascan_length parameter
//! let mut session = Session::new(SessionConfig::websocket("ws://192.168.200.18:80", 2048))?;
//! session.on_record(|record: &Record| {
//!     println!("record {} peak {:?}", record.sequence(), record.samples().iter().max());
//!     Ok(())
//! });
//!
//! session.connect().await?;
//! tokio::time::sleep(std::time::Duration::from_secs(10)).await;
//! session.disconnect().await;
//! # Ok(())
//! # }
//! ```

use futures::Stream;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, error, info};

use crate::config::SessionConfig;
use crate::dispatch::{HandlerRegistry, RecordHandler};
use crate::driver::{ReceiveLoop, Shared};
use crate::error::BoxError;
use crate::stats::StatsSnapshot;
use crate::transport::{Connector, connector_for};
use crate::types::{Record, SessionEvent, SessionOutcome, SessionState};
use crate::{Result, StreamError};

/// Caller-owned streaming session.
pub struct Session {
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    /// `connector` was built from `config` and is rebuilt by `set_sample_count`
    connector_from_config: bool,
    handlers: HandlerRegistry,
    shared: Arc<Shared>,
    state_rx: watch::Receiver<SessionState>,
    task: Option<JoinHandle<SessionOutcome>>,
    outcome: Option<SessionOutcome>,
}

impl Session {
    /// Validate `config` and build a session for its transport variant.
    ///
    /// No connection is attempted until [`Session::connect`].
    pub fn new(config: SessionConfig) -> Result<Self> {
        let connector = connector_for(&config)?;
        Ok(Self::build(config, connector, true))
    }

    /// Build a session over a caller-supplied connector.
    pub fn with_connector(config: SessionConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config, connector, false))
    }

    fn build(config: SessionConfig, connector: Arc<dyn Connector>, from_config: bool) -> Self {
        let shared = Arc::new(Shared::new());
        let state_rx = shared.subscribe_state();
        Self {
            config,
            connector,
            connector_from_config: from_config,
            handlers: HandlerRegistry::default(),
            shared,
            state_rx,
            task: None,
            outcome: None,
        }
    }

    /// Register a closure as the only handler, replacing any previous set.
    ///
    /// Safe while streaming; the loop uses the new handler from the next record.
    pub fn on_record<F>(&self, handler: F)
    where
        F: Fn(&Record) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        self.set_handler(handler);
    }

    /// Register a [`RecordHandler`] as the only handler.
    pub fn set_handler<H: RecordHandler>(&self, handler: H) {
        self.handlers.replace(vec![Arc::new(handler)]);
    }

    /// Replace the handler set with an ordered fan-out list.
    pub fn set_handlers(&self, handlers: Vec<Arc<dyn RecordHandler>>) {
        self.handlers.replace(handlers);
    }

    pub fn clear_handlers(&self) {
        self.handlers.clear();
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Change the record length while the session is not streaming.
    ///
    /// Must match the device's new `ascan_length`.
    pub fn set_sample_count(&mut self, sample_count: u32) -> Result<()> {
        self.ensure_inactive()?;
        let mut config = self.config.clone();
        config.sample_count = sample_count;
        config.validate()?;
        if self.connector_from_config {
            self.connector = connector_for(&config)?;
        }
        info!(sample_count, "Sample count updated");
        self.config = config;
        Ok(())
    }

    /// Start the receive loop.
    ///
    /// Returns once the loop is spawned; watch [`Session::state`] or
    /// [`Session::wait_for_state`] to follow the connection. Fails with
    /// [`StreamError::AlreadyActive`] if a loop is already running.
    pub async fn connect(&mut self) -> Result<()> {
        self.ensure_inactive()?;
        self.reap().await;

        self.shared.reset();
        self.outcome = None;
        let cancel = self.shared.renew_cancel();
        self.shared.set_state(SessionState::Connecting);

        let receive_loop = ReceiveLoop::new(
            Arc::clone(&self.connector),
            self.config.clone(),
            self.handlers.dispatcher(self.config.callback_policy),
            Arc::clone(&self.shared),
            cancel,
        )?;
        info!(
            endpoint = self.connector.endpoint(),
            transport = %self.config.transport,
            sample_count = self.config.sample_count,
            "Connecting session"
        );
        self.task = Some(receive_loop.spawn());
        Ok(())
    }

    /// Stop the receive loop and release the transport.
    ///
    /// No handler runs after this returns. Calling it again, or on a session
    /// that never connected or already failed, does nothing.
    pub async fn disconnect(&mut self) {
        self.shared.cancel();
        if self.task.is_some() {
            debug!("Disconnecting session");
        }
        self.reap().await;
    }

    /// Wait for the receive loop to end.
    ///
    /// The loop ends on a terminal error or when a [`DisconnectHandle`] stops
    /// it. Returns `None` if the session was never connected.
    pub async fn wait(&mut self) -> Option<SessionOutcome> {
        self.reap().await;
        self.outcome.clone()
    }

    /// Handle for stopping the session from another task or thread.
    ///
    /// The handle stays valid across reconnects and later `connect()` calls;
    /// it always stops the loop that is running when it is used.
    pub fn disconnect_handle(&self) -> DisconnectHandle {
        DisconnectHandle { shared: Arc::clone(&self.shared) }
    }

    /// Wait until the state satisfies `predicate`, returning that state.
    pub async fn wait_for_state<F>(&self, mut predicate: F) -> SessionState
    where
        F: FnMut(SessionState) -> bool,
    {
        let mut rx = self.state_rx.clone();
        match rx.wait_for(|state| predicate(*state)).await {
            Ok(state) => *state,
            // Sender lives in `shared`, which outlives this borrow.
            Err(_) => self.state(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Stream of lifecycle states, starting with the current one.
    ///
    /// Intermediate states may be skipped by a slow consumer; use
    /// [`Session::take_events`] for every transition.
    pub fn state_updates(&self) -> impl Stream<Item = SessionState> + Send + use<> {
        WatchStream::new(self.state_rx.clone())
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Streaming
    }

    /// The error that moved the session to `Failed`, if any.
    pub fn last_error(&self) -> Option<Arc<StreamError>> {
        self.shared.last_error()
    }

    /// Take the event channel. Events are only queued after this is called,
    /// and a second call replaces the first receiver.
    pub fn take_events(&self) -> mpsc::UnboundedReceiver<SessionEvent> {
        self.shared.install_events()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn ensure_inactive(&self) -> Result<()> {
        let state = self.state();
        if state.is_active() {
            return Err(StreamError::AlreadyActive { state });
        }
        Ok(())
    }

    /// Join a finished or cancelled loop and keep its outcome.
    async fn reap(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        match task.await {
            Ok(outcome) => self.outcome = Some(outcome),
            Err(join_error) => {
                error!(error = %join_error, "Receive loop aborted");
                let error = Arc::new(StreamError::transport_failed(format!(
                    "receive loop aborted: {join_error}"
                )));
                self.shared.set_state(SessionState::Failed);
                self.outcome = Some(SessionOutcome::Failed(error));
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        debug!("Dropping session");
        self.shared.cancel();
    }
}

/// Cloneable handle that stops a [`Session`]'s receive loop.
///
/// ```rust,no_run
/// # use ascan_stream::Session;
/// # async fn run(mut session: Session) {
/// let stop = session.disconnect_handle();
/// tokio::spawn(async move {
///     tokio::time::sleep(std::time::Duration::from_secs(10)).await;
///     stop.disconnect();
/// });
/// let outcome = session.wait().await;
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct DisconnectHandle {
    shared: Arc<Shared>,
}

impl DisconnectHandle {
    /// Cancel the receive loop. It closes the transport and moves to `Closed`
    /// at its next suspension point, without calling further handlers.
    ///
    /// Does nothing if no receive loop is running.
    pub fn disconnect(&self) {
        debug!("Disconnect requested through handle");
        self.shared.cancel();
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("endpoint", &self.connector.endpoint())
            .field("state", &self.state())
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests;
