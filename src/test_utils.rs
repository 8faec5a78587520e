//! Test utilities: record encoding and a scripted in-memory transport
//!
//! The scripted connector replays a fixed sequence of connections, each a list
//! of [`Step`]s, so lifecycle behaviour can be tested without sockets.

#![cfg(any(test, feature = "benchmark"))]

use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::dispatch::RecordHandler;
use crate::error::BoxError;
use crate::transport::{Connector, Transport};
use crate::types::{ByteOrder, EXPECTED_MAGIC, HEADER_SIZE, Record};
use crate::{Result, StreamError};

/// Serialise one record the way the device puts it on the wire.
pub fn encode_record(header: &[u8; HEADER_SIZE], samples: &[i16], order: ByteOrder) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_SIZE + samples.len() * 2);
    out.extend_from_slice(header);
    for &sample in samples {
        out.extend_from_slice(&order.write_i16(sample));
    }
    out
}

/// A header with the firmware magic and the given packet number.
pub fn magic_header(packet_number: u8) -> [u8; HEADER_SIZE] {
    let mut header = [0u8; HEADER_SIZE];
    header[..4].copy_from_slice(&EXPECTED_MAGIC);
    header[19] = packet_number;
    header
}

/// Cut `data` into chunks, cycling through `sizes`.
pub fn split_by_sizes(data: &[u8], sizes: &[usize]) -> Vec<Bytes> {
    assert!(sizes.iter().all(|&s| s > 0), "chunk sizes must be positive");
    let mut chunks = Vec::new();
    let mut offset = 0;
    for &size in sizes.iter().cycle() {
        if offset >= data.len() {
            break;
        }
        let end = (offset + size).min(data.len());
        chunks.push(Bytes::copy_from_slice(&data[offset..end]));
        offset = end;
    }
    chunks
}

/// One scripted transport action.
#[derive(Debug, Clone)]
pub enum Step {
    Chunk(Bytes),
    /// Transport error
    Fail(String),
    /// Peer closes the connection
    Close,
    /// Never produce anything again
    Hang,
}

/// Convert chunks into steps.
pub fn chunk_steps(chunks: Vec<Bytes>) -> Vec<Step> {
    chunks.into_iter().map(Step::Chunk).collect()
}

type Script = std::result::Result<Vec<Step>, String>;

/// Connector that hands out pre-scripted transports in order.
///
/// When the script runs out every further `open()` is refused.
#[derive(Debug, Default)]
pub struct ScriptedConnector {
    scripts: Mutex<VecDeque<Script>>,
    opens: AtomicUsize,
    closes: Arc<AtomicUsize>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a connection that succeeds and plays `steps`.
    pub fn connection(self, steps: Vec<Step>) -> Self {
        self.push(Ok(steps));
        self
    }

    /// Queue a connection attempt that fails.
    pub fn refuse(self, reason: impl Into<String>) -> Self {
        self.push(Err(reason.into()));
        self
    }

    fn push(&self, script: Script) {
        self.scripts.lock().unwrap_or_else(|e| e.into_inner()).push_back(script);
    }

    /// Number of `open()` calls so far.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Number of transports closed by the session.
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Connector for ScriptedConnector {
    async fn open(&self) -> Result<Box<dyn Transport>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let next = self.scripts.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
        match next {
            Some(Ok(steps)) => Ok(Box::new(ScriptedTransport {
                steps: steps.into(),
                closes: Arc::clone(&self.closes),
            })),
            Some(Err(reason)) => Err(StreamError::transport_failed(reason)),
            None => Err(StreamError::transport_failed("connection refused")),
        }
    }

    fn endpoint(&self) -> &str {
        "scripted"
    }
}

struct ScriptedTransport {
    steps: VecDeque<Step>,
    closes: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl Transport for ScriptedTransport {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        match self.steps.pop_front() {
            Some(Step::Chunk(bytes)) => Ok(Some(bytes)),
            Some(Step::Fail(reason)) => Err(StreamError::transport_failed(reason)),
            Some(Step::Close) | None => Ok(None),
            Some(Step::Hang) => {
                self.steps.push_front(Step::Hang);
                futures::future::pending().await
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Handler that keeps every record it sees.
#[derive(Debug, Default)]
pub struct RecordSink {
    records: Mutex<Vec<Record>>,
}

impl RecordSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn records(&self) -> Vec<Record> {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn samples(&self) -> Vec<Vec<i16>> {
        self.records().iter().map(|r| r.samples().to_vec()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RecordHandler for RecordSink {
    fn on_record(&self, record: &Record) -> std::result::Result<(), BoxError> {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).push(record.clone());
        Ok(())
    }
}
