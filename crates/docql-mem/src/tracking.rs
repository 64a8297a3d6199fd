//! Peak arena-estimate tracking.
//!
//! Keep this optional and cheap. GC checkpoints record the estimate they
//! observe before each collection decision.

use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct PeakTracker {
    peak_bytes: AtomicUsize,
}

impl PeakTracker {
    pub fn new() -> Self {
        Self {
            peak_bytes: AtomicUsize::new(0),
        }
    }

    /// Record an observed arena estimate; updates peak if higher.
    pub fn record(&self, estimate_bytes: usize) {
        let mut cur = self.peak_bytes.load(Ordering::Relaxed);
        while estimate_bytes > cur {
            match self.peak_bytes.compare_exchange(
                cur,
                estimate_bytes,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => cur = observed,
            }
        }
        #[cfg(feature = "tracing")]
        tracing::trace!(
            estimate_bytes,
            peak = self.peak_bytes.load(Ordering::Relaxed),
            "arena estimate"
        );
    }

    pub fn peak(&self) -> usize {
        self.peak_bytes.load(Ordering::Relaxed)
    }
}
