//! Server counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters shared by the receive loop and the workers
#[derive(Debug, Default)]
pub struct ServerStats {
    pub(crate) packets_received: AtomicU64,
    pub(crate) decode_errors: AtomicU64,
    pub(crate) messages_received: AtomicU64,
    pub(crate) messages_queued: AtomicU64,
    pub(crate) messages_unmatched: AtomicU64,
    pub(crate) messages_dropped: AtomicU64,
    pub(crate) handler_invocations: AtomicU64,
    pub(crate) handler_failures: AtomicU64,
    pub(crate) receive_errors: AtomicU64,
}

impl ServerStats {
    #[inline]
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            packets_received: self.packets_received.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_queued: self.messages_queued.load(Ordering::Relaxed),
            messages_unmatched: self.messages_unmatched.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            handler_invocations: self.handler_invocations.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            receive_errors: self.receive_errors.load(Ordering::Relaxed),
        }
    }
}

/// Counter values at one instant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Datagrams read from the socket
    pub packets_received: u64,
    /// Datagrams dropped as malformed or oversized
    pub decode_errors: u64,
    /// Messages decoded, counting each bundle element
    pub messages_received: u64,
    /// Messages handed to the worker pool
    pub messages_queued: u64,
    /// Messages no registration matched
    pub messages_unmatched: u64,
    /// Messages dropped because the work queue was full
    pub messages_dropped: u64,
    /// Handler calls that ran to completion, successfully or not
    pub handler_invocations: u64,
    /// Handler calls that returned an error or panicked
    pub handler_failures: u64,
    /// Recoverable socket read errors
    pub receive_errors: u64,
}
