// src/metrics.rs
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

/// Per-worker counters, cache-line aligned to avoid false sharing between
/// workers hammering their own metrics.
#[repr(C, align(64))]
#[derive(Debug)]
pub struct WorkerMetrics {
    pub requests_processed: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub bytes_received: AtomicU64,
    pub errors: AtomicU64,
    pub active_conns: AtomicUsize,
}

impl WorkerMetrics {
    pub fn new() -> Self {
        Self {
            requests_processed: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            active_conns: AtomicUsize::new(0),
        }
    }

    pub fn inc_req(&self) {
        self.requests_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_conn(&self) {
        self.active_conns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_conn(&self) {
        self.active_conns.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn add_bytes_sent(&self, bytes: usize) {
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn add_bytes_received(&self, bytes: usize) {
        self.bytes_received
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn inc_errors(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for WorkerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time aggregate over every worker. Counters are advisory; reads
/// across workers are eventually consistent, never a snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerStats {
    pub requests_processed: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub errors: u64,
    pub active_conns: usize,
}

impl ServerStats {
    pub fn aggregate<'a>(workers: impl IntoIterator<Item = &'a WorkerMetrics>) -> Self {
        let mut total = ServerStats::default();
        for m in workers {
            total.requests_processed += m.requests_processed.load(Ordering::Relaxed);
            total.bytes_sent += m.bytes_sent.load(Ordering::Relaxed);
            total.bytes_received += m.bytes_received.load(Ordering::Relaxed);
            total.errors += m.errors.load(Ordering::Relaxed);
            total.active_conns += m.active_conns.load(Ordering::Relaxed);
        }
        total
    }

    pub fn requests_per_second(&self, since: Instant) -> f64 {
        let secs = since.elapsed().as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.requests_processed as f64 / secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_sums_workers() {
        let a = WorkerMetrics::new();
        let b = WorkerMetrics::new();
        a.inc_req();
        a.inc_req();
        a.add_bytes_sent(10);
        b.inc_req();
        b.add_bytes_received(5);
        b.inc_conn();

        let total = ServerStats::aggregate([&a, &b]);
        assert_eq!(total.requests_processed, 3);
        assert_eq!(total.bytes_sent, 10);
        assert_eq!(total.bytes_received, 5);
        assert_eq!(total.active_conns, 1);
    }
}
