//! Port traffic statistics

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

/// Snapshot of a port's buffer traffic
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortStats {
    /// Buffers registered over the port's lifetime
    pub registered: u64,
    /// Buffers unregistered (freed or handed back to a tunnel peer)
    pub unregistered: u64,
    /// Successful checkouts through `allocate_next_buffer`
    pub checkouts: u64,
    /// Checkouts that found every buffer in use
    pub backpressure: u64,
    /// Buffers released back to the port
    pub releases: u64,
    /// Buffers pushed onto the pending queue
    pub pushes: u64,
    /// Buffers popped from the pending queue
    pub pops: u64,
    /// Deepest the pending queue has been
    pub peak_queue_depth: usize,
}

impl PortStats {
    /// Create new statistics instance
    pub fn new() -> Self {
        Default::default()
    }

    /// Buffers pushed but not yet popped or cleared
    pub fn in_flight(&self) -> u64 {
        self.pushes.saturating_sub(self.pops)
    }

    /// Fraction of checkout attempts that hit backpressure (0.0 to 1.0)
    pub fn backpressure_rate(&self) -> f64 {
        let attempts = self.checkouts + self.backpressure;
        if attempts == 0 {
            return 0.0;
        }
        self.backpressure as f64 / attempts as f64
    }

    /// Get a summary string of the statistics
    pub fn summary(&self) -> String {
        format!(
            "PortStats {{ registered: {}, checkouts: {}, backpressure: {:.2}%, \
             pushes: {}, pops: {}, peak_queue: {} }}",
            self.registered,
            self.checkouts,
            self.backpressure_rate() * 100.0,
            self.pushes,
            self.pops,
            self.peak_queue_depth
        )
    }
}

/// Thread-safe statistics for a port
#[derive(Debug, Default)]
pub struct AtomicPortStats {
    registered: AtomicU64,
    unregistered: AtomicU64,
    checkouts: AtomicU64,
    backpressure: AtomicU64,
    releases: AtomicU64,
    pushes: AtomicU64,
    pops: AtomicU64,
    peak_queue_depth: AtomicUsize,
}

impl AtomicPortStats {
    /// Create new atomic statistics instance
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_registration(&self) {
        self.registered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unregistration(&self, count: usize) {
        self.unregistered.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Record a checkout attempt
    pub fn record_checkout(&self, success: bool) {
        if success {
            self.checkouts.fetch_add(1, Ordering::Relaxed);
        } else {
            self.backpressure.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_release(&self) {
        self.releases.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a push and the queue depth it produced
    pub fn record_push(&self, depth: usize) {
        self.pushes.fetch_add(1, Ordering::Relaxed);
        self.peak_queue_depth.fetch_max(depth, Ordering::Relaxed);
    }

    pub fn record_pop(&self) {
        self.pops.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current statistics snapshot
    pub fn snapshot(&self) -> PortStats {
        PortStats {
            registered: self.registered.load(Ordering::Relaxed),
            unregistered: self.unregistered.load(Ordering::Relaxed),
            checkouts: self.checkouts.load(Ordering::Relaxed),
            backpressure: self.backpressure.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            pushes: self.pushes.load(Ordering::Relaxed),
            pops: self.pops.load(Ordering::Relaxed),
            peak_queue_depth: self.peak_queue_depth.load(Ordering::Relaxed),
        }
    }

    /// Reset all statistics
    pub fn reset(&self) {
        self.registered.store(0, Ordering::Relaxed);
        self.unregistered.store(0, Ordering::Relaxed);
        self.checkouts.store(0, Ordering::Relaxed);
        self.backpressure.store(0, Ordering::Relaxed);
        self.releases.store(0, Ordering::Relaxed);
        self.pushes.store(0, Ordering::Relaxed);
        self.pops.store(0, Ordering::Relaxed);
        self.peak_queue_depth.store(0, Ordering::Relaxed);
    }
}
