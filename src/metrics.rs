use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe, optional metrics for a single channel endpoint.
///
/// Carried as ambient observability regardless of `spec.md`'s feature
/// Non-goals; mirrors the teacher's `Metrics`/`MetricsSnapshot` pair but
/// made atomic so it can be shared behind a `&self` receiver the way the
/// producer/consumer handles in this crate are.
#[derive(Debug, Default)]
pub struct Metrics {
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    batches_sent: AtomicU64,
    batches_received: AtomicU64,
    lock_contended: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_messages_sent(&self, n: u64) {
        self.messages_sent.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn add_messages_received(&self, n: u64) {
        self.messages_received.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn add_batch_sent(&self) {
        self.batches_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_batch_received(&self) {
        self.batches_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_lock_contended(&self) {
        self.lock_contended.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            batches_sent: self.batches_sent.load(Ordering::Relaxed),
            batches_received: self.batches_received.load(Ordering::Relaxed),
            lock_contended: self.lock_contended.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of a [`Metrics`] instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub batches_sent: u64,
    pub batches_received: u64,
    pub lock_contended: u64,
}
