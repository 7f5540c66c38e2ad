use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

#[derive(Debug, Default)]
struct InnerMetrics {
    records_emitted: AtomicU64,
    pages_fetched: AtomicU64,
    http_requests: AtomicU64,
    retry_count: AtomicU64,
    state_flushes: AtomicU64,
}

/// Cheap-to-clone counters shared by the fetch adapters and the orchestrator.
#[derive(Debug, Clone)]
pub struct Metrics {
    inner: Arc<InnerMetrics>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub records_emitted: u64,
    pub pages_fetched: u64,
    pub http_requests: u64,
    pub retry_count: u64,
    pub state_flushes: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics {
            inner: Arc::new(InnerMetrics::default()),
        }
    }

    pub fn increment_records(&self, count: u64) {
        self.inner.records_emitted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_pages(&self, count: u64) {
        self.inner.pages_fetched.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_requests(&self, count: u64) {
        self.inner.http_requests.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_retries(&self, count: u64) {
        self.inner.retry_count.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_flushes(&self, count: u64) {
        self.inner.state_flushes.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            records_emitted: self.inner.records_emitted.load(Ordering::Relaxed),
            pages_fetched: self.inner.pages_fetched.load(Ordering::Relaxed),
            http_requests: self.inner.http_requests.load(Ordering::Relaxed),
            retry_count: self.inner.retry_count.load(Ordering::Relaxed),
            state_flushes: self.inner.state_flushes.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSnapshot {
    /// Counts accumulated since `earlier`, e.g. for a single stream.
    pub fn since(&self, earlier: &MetricsSnapshot) -> MetricsSnapshot {
        MetricsSnapshot {
            records_emitted: self.records_emitted.saturating_sub(earlier.records_emitted),
            pages_fetched: self.pages_fetched.saturating_sub(earlier.pages_fetched),
            http_requests: self.http_requests.saturating_sub(earlier.http_requests),
            retry_count: self.retry_count.saturating_sub(earlier.retry_count),
            state_flushes: self.state_flushes.saturating_sub(earlier.state_flushes),
        }
    }
}
