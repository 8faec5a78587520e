//! Per-session counters for monitoring stream health

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters updated by the receive loop.
#[derive(Debug, Default)]
pub struct StreamStats {
    records_delivered: AtomicU64,
    bytes_received: AtomicU64,
    chunks_received: AtomicU64,
    callback_errors: AtomicU64,
    reconnect_attempts: AtomicU64,
    connections_opened: AtomicU64,
    buffered_bytes: AtomicU64,
}

/// Point-in-time copy of [`StreamStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub records_delivered: u64,
    pub bytes_received: u64,
    pub chunks_received: u64,
    pub callback_errors: u64,
    pub reconnect_attempts: u64,
    pub connections_opened: u64,
    /// Bytes of an incomplete record waiting in the framing buffer
    pub buffered_bytes: u64,
}

impl StreamStats {
    pub(crate) fn chunk_received(&self, bytes: usize) {
        self.chunks_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_delivered(&self) {
        self.records_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn callback_failed(&self) {
        self.callback_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn reconnect_attempted(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn connection_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_buffered(&self, bytes: usize) {
        self.buffered_bytes.store(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn reset(&self) {
        for counter in [
            &self.records_delivered,
            &self.bytes_received,
            &self.chunks_received,
            &self.callback_errors,
            &self.reconnect_attempts,
            &self.connections_opened,
            &self.buffered_bytes,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            records_delivered: self.records_delivered.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            chunks_received: self.chunks_received.load(Ordering::Relaxed),
            callback_errors: self.callback_errors.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            buffered_bytes: self.buffered_bytes.load(Ordering::Relaxed),
        }
    }
}
