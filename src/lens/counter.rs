//! Counter lens: a pair of per-epoch signed accumulators.

use crate::sync::{AtomicI64, Ordering};

/// One accumulator per epoch, each on its own cache line so recorders on
/// the active epoch never share a line with the poller's reads of the
/// quiescent one.
#[repr(align(64))]
struct CounterEpoch {
    value: AtomicI64,
}

const _: () = assert!(std::mem::align_of::<CounterEpoch>() == 64);

pub(crate) struct CounterLens {
    epochs: [CounterEpoch; 2],
}

impl CounterLens {
    pub(crate) fn new() -> CounterLens {
        CounterLens {
            epochs: [
                CounterEpoch {
                    value: AtomicI64::new(0),
                },
                CounterEpoch {
                    value: AtomicI64::new(0),
                },
            ],
        }
    }

    /// Accumulate `delta` into the given epoch's record. Individual updates
    /// may be observed out of order; only the per-epoch sum is meaningful.
    pub(crate) fn inc(&self, epoch: usize, delta: i64) {
        self.epochs[epoch].value.fetch_add(delta, Ordering::Relaxed);
    }

    /// Drain the accumulated delta since the last read of this epoch.
    pub(crate) fn read(&self, epoch: usize) -> i64 {
        self.epochs[epoch].value.swap(0, Ordering::Relaxed)
    }
}
