//! Lens entities: named typed aggregators threaded on the registry's
//! intrusive list.
//!
//! A lens is shared three ways: the registry map owns one strong count, the
//! lock-free list reaches it through raw pointers, and every user handle
//! clones the `Arc`. The list pointers are only ever written under the
//! registry mutex; traversal is lock-free and leans on the defer queues for
//! the safety of reading a just-unlinked node (see `defer.rs`).

mod counter;
mod dist;
mod gauge;
mod histo;
mod quantile;

pub(crate) use counter::CounterLens;
pub(crate) use dist::DistLens;
pub(crate) use gauge::GaugeLens;
pub(crate) use histo::HistoLens;
pub(crate) use quantile::QuantileLens;

pub use dist::DistSummary;
pub use histo::HistoSummary;
pub use quantile::QuantileSummary;

use crate::error::ReadError;
use crate::optics::Optics;
use crate::sync::{AtomicPtr, Ordering};
use std::fmt;
use std::ops::ControlFlow;
use std::ptr;
use std::sync::Arc;

/// The five lens kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Counter,
    Gauge,
    Dist,
    Histo,
    Quantile,
}

/// A typed sample harvested from one lens for one interval.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Counter(i64),
    Gauge(f64),
    Dist(DistSummary),
    Histo(HistoSummary),
    Quantile(QuantileSummary),
}

pub(crate) enum Payload {
    Counter(CounterLens),
    Gauge(GaugeLens),
    Dist(DistLens),
    Histo(HistoLens),
    Quantile(QuantileLens),
}

pub(crate) struct LensShared {
    name: String,

    next: AtomicPtr<LensShared>,

    // Guarded by the registry mutex; relaxed atomics stand in for the plain
    // field a shared allocation can't hold.
    prev: AtomicPtr<LensShared>,

    payload: Payload,
}

const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<LensShared>();
};

impl LensShared {
    pub(crate) fn new(name: &str, payload: Payload) -> Arc<LensShared> {
        Arc::new(LensShared {
            name: name.to_owned(),
            next: AtomicPtr::new(ptr::null_mut()),
            prev: AtomicPtr::new(ptr::null_mut()),
            payload,
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn kind(&self) -> Kind {
        match self.payload {
            Payload::Counter(_) => Kind::Counter,
            Payload::Gauge(_) => Kind::Gauge,
            Payload::Dist(_) => Kind::Dist,
            Payload::Histo(_) => Kind::Histo,
            Payload::Quantile(_) => Kind::Quantile,
        }
    }

    pub(crate) fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Harvest this lens's record for the given (quiescent) epoch.
    pub(crate) fn read(&self, epoch: usize) -> Result<Value, ReadError> {
        match &self.payload {
            Payload::Counter(counter) => Ok(Value::Counter(counter.read(epoch))),
            // An interval with no set reports the zeroed value; callers
            // can't tell it apart from an explicit set(0.0).
            Payload::Gauge(gauge) => Ok(Value::Gauge(gauge.read(epoch).unwrap_or(0.0))),
            Payload::Dist(dist) => dist.read(epoch).map(Value::Dist),
            Payload::Histo(histo) => Ok(Value::Histo(histo.read(epoch))),
            Payload::Quantile(quantile) => Ok(Value::Quantile(quantile.read(epoch))),
        }
    }

    /// Link `lens` in front of the current head.
    ///
    /// # Safety
    ///
    /// The registry mutex must be held, and every node reachable from
    /// `head` must be live (guaranteed by the registry map's strong
    /// counts).
    pub(crate) unsafe fn push(head: &AtomicPtr<LensShared>, lens: &Arc<LensShared>) {
        let old_head = head.load(Ordering::Relaxed);

        lens.next.store(old_head, Ordering::Relaxed);
        lens.prev.store(ptr::null_mut(), Ordering::Relaxed);
        if !old_head.is_null() {
            (*old_head)
                .prev
                .store(Arc::as_ptr(lens) as *mut LensShared, Ordering::Relaxed);
        }

        // Release pairs with the acquire in `for_each`: a traversal that
        // observes the new head also observes its name and payload.
        head.store(Arc::as_ptr(lens) as *mut LensShared, Ordering::Release);
    }

    /// Unlink `lens`, patching its neighbours. The victim keeps its own
    /// `next` intact so an in-flight traversal can still step over it.
    ///
    /// # Safety
    ///
    /// The registry mutex must be held and `lens` must currently be linked.
    pub(crate) unsafe fn kill(head: &AtomicPtr<LensShared>, lens: &LensShared) {
        let next = lens.next.load(Ordering::Relaxed);
        let prev = lens.prev.load(Ordering::Relaxed);

        if !next.is_null() {
            (*next).prev.store(prev, Ordering::Relaxed);
        }

        if !prev.is_null() {
            (*prev).next.store(next, Ordering::Relaxed);
        } else {
            head.store(next, Ordering::Relaxed);
        }
    }

    /// Lock-free walk of the list, yielding each node to `visit`.
    pub(crate) fn for_each<F>(head: &AtomicPtr<LensShared>, mut visit: F) -> ControlFlow<()>
    where
        F: FnMut(&LensShared) -> ControlFlow<()>,
    {
        // Acquire pairs with the release store in `push`.
        let mut cursor = head.load(Ordering::Acquire);

        while !cursor.is_null() {
            // SAFETY: nodes are reclaimed only by the poller's defer drain,
            // two epoch flips after the unlink; a pointer loaded from the
            // live list is valid for the duration of a traversal.
            let lens = unsafe { &*cursor };

            if let ControlFlow::Break(()) = visit(lens) {
                return ControlFlow::Break(());
            }

            // Relaxed is fine: an unlinked node's next is never recycled
            // before reclamation, so a stale pointer still leads somewhere
            // valid.
            cursor = lens.next.load(Ordering::Relaxed);
        }

        ControlFlow::Continue(())
    }
}

/// A handle on a registered lens of any kind.
///
/// Handles are cheap clones; the lens allocation lives as long as any
/// handle does, though [`close`](Lens::close) ends its registration (and
/// polling) immediately.
#[derive(Clone)]
pub struct Lens {
    pub(crate) optics: Arc<Optics>,
    pub(crate) shared: Arc<LensShared>,
}

const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<Lens>();
};

impl fmt::Debug for Lens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lens")
            .field("name", &self.name())
            .field("kind", &self.kind())
            .finish()
    }
}

impl Lens {
    pub fn name(&self) -> &str {
        self.shared.name()
    }

    pub fn kind(&self) -> Kind {
        self.shared.kind()
    }

    /// Unregister the lens and park its storage for reclamation on the
    /// next epoch flip. Returns false if it was already closed.
    pub fn close(self) -> bool {
        self.optics.close_lens(&self.shared)
    }

    pub fn as_counter(&self) -> Result<Counter, crate::Error> {
        self.expect_kind(Kind::Counter)?;
        Ok(Counter {
            inner: self.clone(),
        })
    }

    pub fn as_gauge(&self) -> Result<Gauge, crate::Error> {
        self.expect_kind(Kind::Gauge)?;
        Ok(Gauge {
            inner: self.clone(),
        })
    }

    pub fn as_dist(&self) -> Result<Dist, crate::Error> {
        self.expect_kind(Kind::Dist)?;
        Ok(Dist {
            inner: self.clone(),
        })
    }

    pub fn as_histo(&self) -> Result<Histo, crate::Error> {
        self.expect_kind(Kind::Histo)?;
        Ok(Histo {
            inner: self.clone(),
        })
    }

    pub fn as_quantile(&self) -> Result<Quantile, crate::Error> {
        self.expect_kind(Kind::Quantile)?;
        Ok(Quantile {
            inner: self.clone(),
        })
    }

    fn expect_kind(&self, expected: Kind) -> Result<(), crate::Error> {
        let actual = self.kind();
        if actual != expected {
            return Err(crate::Error::TypeMismatch {
                name: self.name().to_owned(),
                expected,
                actual,
            });
        }
        Ok(())
    }

    fn active_epoch(&self) -> usize {
        self.optics.current_epoch()
    }
}

macro_rules! typed_handle {
    ($(#[$doc:meta])* $handle:ident, $variant:ident, $payload:ty) => {
        $(#[$doc])*
        #[derive(Clone)]
        pub struct $handle {
            pub(crate) inner: Lens,
        }

        impl fmt::Debug for $handle {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_tuple(stringify!($handle))
                    .field(&self.name())
                    .finish()
            }
        }

        impl $handle {
            pub fn name(&self) -> &str {
                self.inner.name()
            }

            /// See [`Lens::close`].
            pub fn close(self) -> bool {
                self.inner.close()
            }

            /// The untyped view of this lens.
            pub fn as_lens(&self) -> Lens {
                self.inner.clone()
            }

            fn payload(&self) -> &$payload {
                match self.inner.shared.payload() {
                    Payload::$variant(payload) => payload,
                    _ => unreachable!("handle kind is checked at construction"),
                }
            }
        }
    };
}

typed_handle!(
    /// A monotonically accumulating signed counter, emitted as a rate.
    Counter,
    Counter,
    CounterLens
);

typed_handle!(
    /// A last-write-wins double.
    Gauge,
    Gauge,
    GaugeLens
);

typed_handle!(
    /// A reservoir-sampled distribution with percentile emission.
    Dist,
    Dist,
    DistLens
);

typed_handle!(
    /// A fixed-boundary histogram.
    Histo,
    Histo,
    HistoLens
);

typed_handle!(
    /// An online estimator of one target quantile.
    Quantile,
    Quantile,
    QuantileLens
);

impl Counter {
    /// Add `delta` to the current interval. Wait-free.
    pub fn inc(&self, delta: i64) {
        self.payload().inc(self.inner.active_epoch(), delta);
    }
}

impl Gauge {
    /// Record the latest value. Wait-free; the newest write wins.
    pub fn set(&self, value: f64) {
        self.payload().set(value);
    }
}

impl Dist {
    /// Feed one sample into the current interval's reservoir. Bounded
    /// wait: a short spin if another recorder is mid-update.
    pub fn record(&self, value: f64) {
        self.payload()
            .record_value(self.inner.active_epoch(), value);
    }
}

impl Histo {
    /// Count `value` into its bucket. Wait-free.
    pub fn inc(&self, value: f64) {
        self.payload().inc(self.inner.active_epoch(), value);
    }
}

impl Quantile {
    /// Feed one sample to the estimator. Wait-free.
    pub fn update(&self, value: f64) {
        self.payload().update(self.inner.active_epoch(), value);
    }
}
