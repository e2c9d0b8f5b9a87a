use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use parking_lot::Mutex;

/// Counts queue submissions and how many were in flight at once.
#[derive(Debug, Default)]
pub(crate) struct SubmissionTracker {
    count: AtomicU64,
    in_flight: AtomicU32,
    peak_in_flight: AtomicU32,
}

impl SubmissionTracker {
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    pub fn in_flight(&self) -> u32 {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn peak_in_flight(&self) -> u32 {
        self.peak_in_flight.load(Ordering::Acquire)
    }

    /// Marks a submission as in flight until the returned guard is dropped.
    fn track(&self) -> InFlight<'_> {
        self.count.fetch_add(1, Ordering::AcqRel);
        let in_flight = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_in_flight.fetch_max(in_flight, Ordering::AcqRel);

        InFlight { tracker: self }
    }
}

/// Decrements the in flight count on drop.
struct InFlight<'a> {
    tracker: &'a SubmissionTracker,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.tracker.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Runs `submit` while holding `queue`. The submission stays in flight until `submit` returns,
/// which must be after the queue has finished the work.
pub(crate) fn submit_serialized<Q, R, F>(
    queue: &Mutex<Q>,
    tracker: &SubmissionTracker,
    submit: F,
) -> R
where
    F: FnOnce(&Q) -> R,
{
    let queue = queue.lock();
    let _in_flight = tracker.track();

    submit(&queue)
}
