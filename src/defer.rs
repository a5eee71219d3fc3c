//! Deferred reclamation of closed lenses.
//!
//! A closed lens is unlinked from the registry immediately, but a lock-free
//! traversal that loaded a pointer to it before the unlink may still follow
//! its `next` pointer. Retired lenses are therefore parked on the stack for
//! the epoch that was active at close time, and the poller frees a parity's
//! stack only once that epoch has been quiescent for a full cycle: the drain
//! for parity `p` happens on the flip *after* the flip that retired `p`.
//!
//! Each node pins its lens with an `Arc`, so "free" here means dropping the
//! registry's last strong count; a recorder still holding a typed handle
//! keeps the allocation alive past reclamation, it just stops being polled.

use crate::lens::LensShared;
use crate::sync::{AtomicPtr, Ordering};
use std::ptr;
use std::sync::Arc;

struct DeferNode {
    lens: Arc<LensShared>,
    next: *mut DeferNode,
}

pub(crate) struct DeferQueues {
    heads: [AtomicPtr<DeferNode>; 2],
}

impl DeferQueues {
    pub(crate) fn new() -> DeferQueues {
        DeferQueues {
            heads: [
                AtomicPtr::new(ptr::null_mut()),
                AtomicPtr::new(ptr::null_mut()),
            ],
        }
    }

    /// Park `lens` on the stack for `parity`, which must be the active
    /// epoch at the time of the call.
    pub(crate) fn push(&self, parity: usize, lens: Arc<LensShared>) {
        let node = Box::into_raw(Box::new(DeferNode {
            lens,
            next: ptr::null_mut(),
        }));

        // Release on success pairs with the acquire exchange in `drain` so
        // the node is fully written before the poller walks it.
        let head = &self.heads[parity];
        let mut old = head.load(Ordering::Relaxed);
        loop {
            // SAFETY: `node` came out of Box::into_raw above and is not yet
            // shared; we own it until the exchange succeeds.
            unsafe { (*node).next = old };

            match head.compare_exchange_weak(old, node, Ordering::Release, Ordering::Relaxed) {
                Ok(_) => break,
                Err(cur) => old = cur,
            }
        }
    }

    /// Drop every node parked for `parity`. Called only by the poller, and
    /// only for the non-active parity.
    pub(crate) fn drain(&self, parity: usize) {
        let mut node = self.heads[parity].swap(ptr::null_mut(), Ordering::Acquire);

        while !node.is_null() {
            // SAFETY: the exchange above took sole ownership of the chain,
            // and every node was allocated by `push` via Box::into_raw.
            let owned = unsafe { Box::from_raw(node) };
            node = owned.next;
        }
    }
}

impl Drop for DeferQueues {
    fn drop(&mut self) {
        self.drain(0);
        self.drain(1);
    }
}
