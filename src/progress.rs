use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Live counters for a running scan. Cheap to clone; all clones share state.
#[derive(Clone, Debug, Default)]
pub struct ScanProgress {
    inner: Arc<Counters>,
}

#[derive(Debug, Default)]
struct Counters {
    total: AtomicU64,
    issued: AtomicU64,
    in_flight: AtomicU64,
    peak_in_flight: AtomicU64,
    completed: AtomicU64,
    open: AtomicU64,
}

/// Snapshot of [`ScanProgress`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct ProgressSnapshot {
    pub total: u64,
    pub issued: u64,
    pub in_flight: u64,
    pub peak_in_flight: u64,
    pub completed: u64,
    pub open: u64,
}

impl ScanProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let c = &self.inner;
        ProgressSnapshot {
            total: c.total.load(Ordering::Relaxed),
            issued: c.issued.load(Ordering::Relaxed),
            in_flight: c.in_flight.load(Ordering::Relaxed),
            peak_in_flight: c.peak_in_flight.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            open: c.open.load(Ordering::Relaxed),
        }
    }

    pub fn peak_in_flight(&self) -> u64 {
        self.inner.peak_in_flight.load(Ordering::Relaxed)
    }

    pub(crate) fn reset(&self, total: u64) {
        let c = &self.inner;
        c.total.store(total, Ordering::Relaxed);
        for counter in [&c.issued, &c.in_flight, &c.peak_in_flight, &c.completed, &c.open] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub(crate) fn issued(&self) {
        self.inner.issued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn completed(&self, open: bool) {
        self.inner.completed.fetch_add(1, Ordering::Relaxed);
        if open {
            self.inner.open.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Mark one probe as `Connecting` until the returned guard drops.
    pub(crate) fn connecting(&self) -> InFlightGuard {
        let now = self.inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlightGuard {
            counters: self.inner.clone(),
        }
    }
}

pub(crate) struct InFlightGuard {
    counters: Arc<Counters>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
