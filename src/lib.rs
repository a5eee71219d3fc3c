//! In-process metrics with wait-free recording and epoch-based harvesting.
//!
//! Application threads record into named typed aggregators ("lenses");
//! a poller periodically harvests every lens and hands the aggregated
//! interval to backends. The record path never blocks on the poller:
//!
//! - Recording is a handful of relaxed atomic ops (counter, gauge,
//!   histogram, quantile) or a short per-lens spinlock (distribution).
//!   No allocation, no shared locks.
//! - Every lens keeps two records, indexed by the low bit of a global
//!   epoch counter. The poller flips the epoch, sleeps a short grace
//!   window for stragglers, and reads the now-quiescent record while
//!   recorders carry on against the other one.
//! - Lens enumeration is a lock-free walk of an intrusive list; closed
//!   lenses are parked on a per-epoch defer queue and reclaimed two flips
//!   later, so a traversal never follows a dangling pointer.
//!
//! Five lens kinds: [`Counter`] (rate), [`Gauge`] (last write wins),
//! [`Dist`] (reservoir-sampled percentiles), [`Histo`] (fixed buckets),
//! and [`Quantile`] (online single-quantile estimator).
//!
//! ```
//! use std::ops::ControlFlow;
//!
//! let optics = optics::Optics::with_prefix("web").unwrap();
//!
//! let hits = optics.create_counter("hits").unwrap();
//! let latency = optics.create_dist("latency_us").unwrap();
//!
//! // Hot path, from any thread:
//! hits.inc(1);
//! latency.record(112.0);
//!
//! // Somewhere else, on a timer:
//! let mut poller = optics::Poller::new(optics.clone());
//! poller.set_host("host01").unwrap();
//! poller.backend(optics::StdoutBackend::new());
//! poller.poll();
//!
//! // Lenses stay registered until closed:
//! let _ = optics.for_each_lens(|lens| {
//!     println!("{:?} {}", lens.kind(), lens.name());
//!     ControlFlow::Continue(())
//! });
//! ```

mod defer;
mod epoch;
mod error;
mod key;
mod lens;
mod optics;
mod poller;
mod spin;
mod sync;

pub use crate::error::{Error, ReadError};
pub use crate::key::Key;
pub use crate::lens::{
    Counter, Dist, DistSummary, Gauge, Histo, HistoSummary, Kind, Lens, Quantile,
    QuantileSummary, Value,
};
pub use crate::optics::Optics;
pub use crate::poller::{Backend, Event, Poll, PollThread, Poller, StdoutBackend, POLL_GRACE};

/// Maximum byte length of names, prefixes, and composed keys, including
/// the terminator slot of the wire formats this feeds; usable length is
/// one less.
pub const NAME_MAX_LEN: usize = 256;

/// Reservoir slots per distribution record. Percentile error bounds grow
/// with the stream length past this, so it leans toward the low side of
/// memory use while staying comfortably above the 100 samples that
/// p99 needs to mean anything.
pub const DIST_RESERVOIR_LEN: usize = 200;

/// Maximum number of histogram buckets.
pub const HISTO_MAX_BUCKETS: usize = 8;

/// Wall-clock seconds since the unix epoch.
pub(crate) fn clock_wall() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}
