//! The root context: registry, epoch state, and deferred reclamation.
//!
//! One mutex serializes the name map and all list-head writes; everything
//! on the record path (epoch reads, lens record ops, list traversal) stays
//! lock-free. Keeping the map and the list consistent under one lock isn't
//! strictly required, but it is much simpler to reason about.

use crate::defer::DeferQueues;
use crate::epoch::Epoch;
use crate::error::Error;
use crate::lens::{
    Counter, CounterLens, Dist, DistLens, Gauge, GaugeLens, Histo, HistoLens, Lens, LensShared,
    Payload, Quantile, QuantileLens,
};
use crate::sync::{AtomicPtr, Mutex};
use crate::NAME_MAX_LEN;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::ops::ControlFlow;
use std::ptr;
use std::sync::Arc;

/// The root context: owns the lens registry, the epoch, and the defer
/// queues. Always handled as `Arc<Optics>`; recorders, handles, and the
/// poller keep it alive, and it tears down when the last reference drops.
pub struct Optics {
    registry: Mutex<HashMap<String, Arc<LensShared>>>,
    head: AtomicPtr<LensShared>,

    epoch: Epoch,
    defers: DeferQueues,

    prefix: String,
}

const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<Optics>();
};

impl Optics {
    /// Create a root with the given key prefix, stamping the epoch with
    /// `now` as the time of the (notional) zeroth flip.
    pub fn with_prefix_at(prefix: &str, now: u64) -> Result<Arc<Optics>, Error> {
        validate_prefix(prefix)?;

        Ok(Arc::new(Optics {
            registry: Mutex::new(HashMap::new()),
            head: AtomicPtr::new(ptr::null_mut()),
            epoch: Epoch::new(now),
            defers: DeferQueues::new(),
            prefix: prefix.to_owned(),
        }))
    }

    /// [`with_prefix_at`](Optics::with_prefix_at) stamped with the wall
    /// clock.
    pub fn with_prefix(prefix: &str) -> Result<Arc<Optics>, Error> {
        Optics::with_prefix_at(prefix, crate::clock_wall())
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Parity of the epoch recorders currently write into.
    pub(crate) fn current_epoch(&self) -> usize {
        self.epoch.current()
    }

    /// Advance the epoch for a new harvest. Returns the now-quiescent
    /// parity and the previous flip timestamp.
    ///
    /// Reclaims the defer queue for the non-active parity first: that
    /// queue was filled while its epoch was active one full cycle ago, so
    /// any traversal or straggler that could reach those lenses is long
    /// gone. Draining before the increment keeps the two-flip grace.
    pub(crate) fn flip_at(&self, now: u64) -> (usize, u64) {
        self.defers.drain(self.epoch.current() ^ 1);
        self.epoch.flip_at(now)
    }

    /// Create a counter lens, failing if the name is taken.
    pub fn create_counter(self: &Arc<Self>, name: &str) -> Result<Counter, Error> {
        validate_name(name)?;
        let shared = LensShared::new(name, Payload::Counter(CounterLens::new()));
        Ok(Counter {
            inner: self.register_new(shared)?,
        })
    }

    /// Return the counter registered under `name`, creating it if absent.
    pub fn open_counter(self: &Arc<Self>, name: &str) -> Result<Counter, Error> {
        validate_name(name)?;
        let shared = LensShared::new(name, Payload::Counter(CounterLens::new()));
        self.register_or_existing(shared).as_counter()
    }

    /// Create a gauge lens, failing if the name is taken.
    pub fn create_gauge(self: &Arc<Self>, name: &str) -> Result<Gauge, Error> {
        validate_name(name)?;
        let shared = LensShared::new(name, Payload::Gauge(GaugeLens::new()));
        Ok(Gauge {
            inner: self.register_new(shared)?,
        })
    }

    /// Return the gauge registered under `name`, creating it if absent.
    pub fn open_gauge(self: &Arc<Self>, name: &str) -> Result<Gauge, Error> {
        validate_name(name)?;
        let shared = LensShared::new(name, Payload::Gauge(GaugeLens::new()));
        self.register_or_existing(shared).as_gauge()
    }

    /// Create a distribution lens, failing if the name is taken.
    pub fn create_dist(self: &Arc<Self>, name: &str) -> Result<Dist, Error> {
        validate_name(name)?;
        let shared = LensShared::new(name, Payload::Dist(DistLens::new()));
        Ok(Dist {
            inner: self.register_new(shared)?,
        })
    }

    /// Return the distribution registered under `name`, creating it if
    /// absent.
    pub fn open_dist(self: &Arc<Self>, name: &str) -> Result<Dist, Error> {
        validate_name(name)?;
        let shared = LensShared::new(name, Payload::Dist(DistLens::new()));
        self.register_or_existing(shared).as_dist()
    }

    /// Create a histogram lens over the given bucket boundaries, failing
    /// if the name is taken.
    pub fn create_histo(self: &Arc<Self>, name: &str, edges: &[f64]) -> Result<Histo, Error> {
        validate_name(name)?;
        let shared = LensShared::new(name, Payload::Histo(HistoLens::new(edges)?));
        Ok(Histo {
            inner: self.register_new(shared)?,
        })
    }

    /// Return the histogram registered under `name`, creating it with
    /// `edges` if absent. An existing histogram keeps its boundaries.
    pub fn open_histo(self: &Arc<Self>, name: &str, edges: &[f64]) -> Result<Histo, Error> {
        validate_name(name)?;
        let shared = LensShared::new(name, Payload::Histo(HistoLens::new(edges)?));
        self.register_or_existing(shared).as_histo()
    }

    /// Create a target-quantile lens, failing if the name is taken.
    /// `estimate` seeds the tracker and `adjustment` is its step size.
    pub fn create_quantile(
        self: &Arc<Self>,
        name: &str,
        quantile: f64,
        estimate: f64,
        adjustment: f64,
    ) -> Result<Quantile, Error> {
        validate_name(name)?;
        let shared = LensShared::new(
            name,
            Payload::Quantile(QuantileLens::new(quantile, estimate, adjustment)?),
        );
        Ok(Quantile {
            inner: self.register_new(shared)?,
        })
    }

    /// Return the quantile lens registered under `name`, creating it if
    /// absent. An existing lens keeps its target and step.
    pub fn open_quantile(
        self: &Arc<Self>,
        name: &str,
        quantile: f64,
        estimate: f64,
        adjustment: f64,
    ) -> Result<Quantile, Error> {
        validate_name(name)?;
        let shared = LensShared::new(
            name,
            Payload::Quantile(QuantileLens::new(quantile, estimate, adjustment)?),
        );
        self.register_or_existing(shared).as_quantile()
    }

    /// Look up a registered lens by name.
    pub fn lens(self: &Arc<Self>, name: &str) -> Option<Lens> {
        let registry = self.registry.lock().unwrap();

        registry.get(name).map(|shared| Lens {
            optics: Arc::clone(self),
            shared: Arc::clone(shared),
        })
    }

    /// Lock-free enumeration of every registered lens. The visitor can
    /// stop the walk early by returning `ControlFlow::Break`.
    pub fn for_each_lens<F>(self: &Arc<Self>, mut visit: F) -> ControlFlow<()>
    where
        F: FnMut(Lens) -> ControlFlow<()>,
    {
        LensShared::for_each(&self.head, |shared| {
            // SAFETY: the traversal guarantees the node is live right now
            // (defer grace); bumping the strong count up front makes the
            // handle we give out independent of that window.
            let shared = unsafe {
                Arc::increment_strong_count(shared as *const LensShared);
                Arc::from_raw(shared as *const LensShared)
            };

            visit(Lens {
                optics: Arc::clone(self),
                shared,
            })
        })
    }

    /// Borrowing flavour of the traversal for the poll driver, which has
    /// no use for handles.
    pub(crate) fn for_each_shared<F>(&self, visit: F) -> ControlFlow<()>
    where
        F: FnMut(&LensShared) -> ControlFlow<()>,
    {
        LensShared::for_each(&self.head, visit)
    }

    fn register_new(self: &Arc<Self>, shared: Arc<LensShared>) -> Result<Lens, Error> {
        let mut registry = self.registry.lock().unwrap();

        match registry.entry(shared.name().to_owned()) {
            Entry::Occupied(_) => Err(Error::NameExists(shared.name().to_owned())),
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&shared));

                // SAFETY: registry mutex held; every linked node is kept
                // live by the map.
                unsafe { LensShared::push(&self.head, &shared) };

                Ok(Lens {
                    optics: Arc::clone(self),
                    shared,
                })
            }
        }
    }

    fn register_or_existing(self: &Arc<Self>, shared: Arc<LensShared>) -> Lens {
        let mut registry = self.registry.lock().unwrap();

        let shared = match registry.entry(shared.name().to_owned()) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&shared));

                // SAFETY: as in `register_new`.
                unsafe { LensShared::push(&self.head, &shared) };
                shared
            }
        };

        Lens {
            optics: Arc::clone(self),
            shared,
        }
    }

    /// Unregister `shared` and park its storage on the active epoch's
    /// defer queue. False if it was already closed (or its name has since
    /// been re-created by a different lens).
    pub(crate) fn close_lens(&self, shared: &Arc<LensShared>) -> bool {
        {
            let mut registry = self.registry.lock().unwrap();

            match registry.get(shared.name()) {
                Some(current) if Arc::ptr_eq(current, shared) => {
                    registry.remove(shared.name());

                    // SAFETY: mutex held, and the map hit proves the lens
                    // is currently linked.
                    unsafe { LensShared::kill(&self.head, shared) };
                }
                _ => return false,
            }
        }

        // Outside the mutex: the lens is already unreachable, and the
        // defer stack is lock-free.
        self.defers.push(self.epoch.current(), Arc::clone(shared));
        true
    }
}

fn validate_name(name: &str) -> Result<(), Error> {
    if name.is_empty() || name.bytes().any(|b| b == b'.' || b == 0) {
        return Err(Error::NameInvalid(name.to_owned()));
    }
    if name.len() > NAME_MAX_LEN - 1 {
        return Err(Error::NameTooLong(name.to_owned()));
    }
    Ok(())
}

fn validate_prefix(prefix: &str) -> Result<(), Error> {
    if prefix.bytes().any(|b| b == 0) {
        return Err(Error::NameInvalid(prefix.to_owned()));
    }
    if prefix.len() > NAME_MAX_LEN - 1 {
        return Err(Error::NameTooLong(prefix.to_owned()));
    }
    Ok(())
}
