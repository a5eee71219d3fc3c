//! Epoch state: a monotonically increasing counter whose low bit selects the
//! record buffer recorders write into, leaving the other buffer quiescent
//! for the poller.
//!
//! The memory order semantics are a little unusual in that the flip does not
//! publish any data to recorders; the acquire on the read side only prevents
//! record ops from being hoisted above the parity load.

use crate::sync::{AtomicU64, Ordering};

pub(crate) struct Epoch {
    counter: AtomicU64,

    // Wall clock of the last flip. Only the poller touches it, so relaxed
    // swaps are enough.
    last_inc: AtomicU64,
}

impl Epoch {
    pub(crate) fn new(now: u64) -> Epoch {
        Epoch {
            counter: AtomicU64::new(0),
            last_inc: AtomicU64::new(now),
        }
    }

    /// Parity of the active epoch.
    pub(crate) fn current(&self) -> usize {
        (self.counter.load(Ordering::Acquire) & 1) as usize
    }

    /// Advance the epoch. Returns the pre-increment parity (the now
    /// quiescent buffer the poller will read) and the previous flip
    /// timestamp.
    ///
    /// Poller only. The caller drains the defer queue for the non-active
    /// parity *before* calling this; see `Optics::flip_at`.
    pub(crate) fn flip_at(&self, now: u64) -> (usize, u64) {
        let last_inc = self.last_inc.swap(now, Ordering::Relaxed);
        let prev = self.counter.fetch_add(1, Ordering::AcqRel);
        ((prev & 1) as usize, last_inc)
    }
}
