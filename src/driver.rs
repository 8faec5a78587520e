//! Receive loop that owns a session's transport, framing buffer and lifecycle
//!
//! One loop runs per session. It opens a transport, pumps chunks through the
//! frame assembler and decoder, dispatches records, and applies the reconnect
//! policy on transport errors. Cancellation is observed at every suspension
//! point (connect, receive, backoff) and between records.

use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::SessionConfig;
use crate::decoder::RecordDecoder;
use crate::dispatch::Dispatcher;
use crate::framing::FrameAssembler;
use crate::stats::StreamStats;
use crate::transport::{Connector, Transport};
use crate::types::{SessionEvent, SessionOutcome, SessionState};
use crate::{Result, StreamError};

/// State shared between a session handle and its receive loop.
#[derive(Debug)]
pub(crate) struct Shared {
    state: watch::Sender<SessionState>,
    last_error: Mutex<Option<Arc<StreamError>>>,
    events: Mutex<Option<mpsc::UnboundedSender<SessionEvent>>>,
    /// Token of the current `connect()`; replaced on every connect
    cancel: Mutex<CancellationToken>,
    pub(crate) stats: StreamStats,
}

impl Shared {
    pub(crate) fn new() -> Self {
        let (state, _rx) = watch::channel(SessionState::Idle);
        Self {
            state,
            last_error: Mutex::new(None),
            events: Mutex::new(None),
            cancel: Mutex::new(CancellationToken::new()),
            stats: StreamStats::default(),
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub(crate) fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub(crate) fn set_state(&self, next: SessionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(from = %previous, to = %next, "Session state changed");
            self.emit(SessionEvent::StateChanged(next));
        }
    }

    pub(crate) fn last_error(&self) -> Option<Arc<StreamError>> {
        self.last_error.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn record_error(&self, error: Arc<StreamError>) {
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(error);
    }

    /// Prepare for a new `connect()`.
    pub(crate) fn reset(&self) {
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.stats.reset();
    }

    /// Issue the cancellation token for a new receive loop.
    pub(crate) fn renew_cancel(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.cancel.lock().unwrap_or_else(PoisonError::into_inner) = token.clone();
        token
    }

    /// Ask the current receive loop to stop. Safe from any task or thread.
    pub(crate) fn cancel(&self) {
        self.cancel.lock().unwrap_or_else(PoisonError::into_inner).cancel();
    }

    pub(crate) fn install_events(&self) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.events.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        rx
    }

    fn emit(&self, event: SessionEvent) {
        let mut slot = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = slot.as_ref() {
            if tx.send(event).is_err() {
                // Receiver dropped; stop queueing.
                *slot = None;
            }
        }
    }
}

/// How one connection's streaming phase ended.
enum StreamEnd {
    Cancelled,
    /// Eligible for the reconnect policy
    Transport(StreamError),
    Fatal(StreamError),
}

/// The receive loop for one `connect()` call.
pub(crate) struct ReceiveLoop {
    connector: Arc<dyn Connector>,
    config: SessionConfig,
    assembler: FrameAssembler,
    decoder: RecordDecoder,
    dispatcher: Dispatcher,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    sequence: u64,
    attempts: u32,
}

impl ReceiveLoop {
    pub(crate) fn new(
        connector: Arc<dyn Connector>,
        config: SessionConfig,
        dispatcher: Dispatcher,
        shared: Arc<Shared>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let shape = config.shape()?;
        Ok(Self {
            connector,
            assembler: FrameAssembler::with_limit(shape.record_size(), config.framing_limit()?),
            decoder: RecordDecoder::new(shape, config.byte_order),
            config,
            dispatcher,
            shared,
            cancel,
            sequence: 0,
            attempts: 0,
        })
    }

    /// Spawn the loop on the current runtime.
    pub(crate) fn spawn(self) -> tokio::task::JoinHandle<SessionOutcome> {
        tokio::spawn(self.run())
    }

    pub(crate) async fn run(mut self) -> SessionOutcome {
        info!(
            endpoint = self.connector.endpoint(),
            record_size = self.assembler.record_size(),
            "Receive loop started"
        );
        let cancel = self.cancel.clone();

        loop {
            self.shared.set_state(SessionState::Connecting);

            let opened = tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.finish_closed(None).await,
                opened = self.connector.open() => opened,
            };

            let failure = match opened {
                Ok(mut transport) => {
                    self.shared.stats.connection_opened();
                    self.shared.emit(SessionEvent::Connected {
                        endpoint: self.connector.endpoint().to_string(),
                    });
                    // A partial frame from an earlier connection can never complete.
                    self.assembler.reset();
                    self.shared.stats.set_buffered(0);
                    self.shared.set_state(SessionState::Streaming);

                    match self.pump(transport.as_mut()).await {
                        StreamEnd::Cancelled => return self.finish_closed(Some(transport)).await,
                        StreamEnd::Fatal(error) => {
                            release(transport.as_mut()).await;
                            return self.finish_failed(error);
                        }
                        StreamEnd::Transport(error) => {
                            release(transport.as_mut()).await;
                            error
                        }
                    }
                }
                Err(error) => error,
            };

            let policy = &self.config.reconnect;
            if !failure.is_retryable() || !policy.enabled || self.attempts >= policy.max_attempts {
                return self.finish_failed(failure);
            }

            self.attempts += 1;
            let delay = policy.backoff_for(self.attempts);
            warn!(
                error = %failure,
                attempt = self.attempts,
                max_attempts = policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                "Transport failed, scheduling reconnect"
            );
            self.shared.stats.reconnect_attempted();
            self.shared.emit(SessionEvent::TransportError(Arc::new(failure)));
            self.shared.set_state(SessionState::Reconnecting);
            self.shared.emit(SessionEvent::ReconnectScheduled { attempt: self.attempts, delay });

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.finish_closed(None).await,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Stream chunks from one open transport until it ends.
    async fn pump(&mut self, transport: &mut dyn Transport) -> StreamEnd {
        let cancel = self.cancel.clone();
        let receive_timeout = self.config.receive_timeout();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return StreamEnd::Cancelled,
                next = receive(transport, receive_timeout) => next,
            };

            let chunk = match next {
                Ok(Some(chunk)) => chunk,
                Ok(None) => {
                    return StreamEnd::Transport(StreamError::transport_failed(
                        "connection closed by peer",
                    ));
                }
                Err(error) if error.is_retryable() => return StreamEnd::Transport(error),
                Err(error) => return StreamEnd::Fatal(error),
            };

            // Data is flowing again, so the reconnect budget starts over.
            self.attempts = 0;
            self.shared.stats.chunk_received(chunk.len());
            trace!(len = chunk.len(), buffered = self.assembler.buffered(), "Chunk received");

            for framed in self.assembler.feed(&chunk) {
                let block = match framed {
                    Ok(block) => block,
                    Err(error) => return StreamEnd::Fatal(error),
                };
                if cancel.is_cancelled() {
                    return StreamEnd::Cancelled;
                }

                let record = self.decoder.decode(self.sequence, &block);
                self.sequence += 1;

                let shared = &self.shared;
                let dispatched = self.dispatcher.dispatch(&record, |error| {
                    shared.stats.callback_failed();
                    shared.emit(SessionEvent::CallbackError {
                        sequence: record.sequence(),
                        error: Arc::new(error),
                    });
                });
                if let Err(error) = dispatched {
                    return StreamEnd::Fatal(error);
                }
                self.shared.stats.record_delivered();
            }

            self.shared.stats.set_buffered(self.assembler.buffered());
        }
    }

    async fn finish_closed(&self, transport: Option<Box<dyn Transport>>) -> SessionOutcome {
        self.shared.set_state(SessionState::Closing);
        if let Some(mut transport) = transport {
            release(transport.as_mut()).await;
        }
        self.shared.set_state(SessionState::Closed);
        info!(records = self.sequence, "Session closed");
        SessionOutcome::Closed
    }

    fn finish_failed(&self, error: StreamError) -> SessionOutcome {
        error!(error = %error, records = self.sequence, "Session failed");
        let error = Arc::new(error);
        self.shared.record_error(Arc::clone(&error));
        self.shared.emit(SessionEvent::Failed(Arc::clone(&error)));
        self.shared.set_state(SessionState::Failed);
        SessionOutcome::Failed(error)
    }
}

async fn receive(
    transport: &mut dyn Transport,
    timeout: Option<std::time::Duration>,
) -> Result<Option<bytes::Bytes>> {
    match timeout {
        Some(duration) => tokio::time::timeout(duration, transport.next_chunk())
            .await
            .map_err(|_| StreamError::Timeout { duration })?,
        None => transport.next_chunk().await,
    }
}

async fn release(transport: &mut dyn Transport) {
    if let Err(e) = transport.close().await {
        debug!(error = %e, "Error while closing transport");
    }
}
