//! Target-quantile lens: an online estimator that tracks a single quantile
//! without retaining samples.
//!
//! The estimate is `e0 + m * delta` for a signed multiplier `m`. Each
//! update draws a Bernoulli with success probability `q` and nudges `m`
//! toward the point where a sample falls below the estimate exactly `q` of
//! the time. `delta` trades tracking speed against noise.

use crate::sync::{AtomicI64, AtomicU64, Ordering};
use crate::Error;
use rand::Rng;

#[repr(align(64))]
struct QuantileEpoch {
    count: AtomicU64,
}

const _: () = assert!(std::mem::align_of::<QuantileEpoch>() == 64);

/// One interval's view of the estimator.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct QuantileSummary {
    /// The target quantile `q`.
    pub quantile: f64,
    /// The current estimate of that quantile.
    pub sample: f64,
    /// Arrivals this interval.
    pub count: u64,
}

pub(crate) struct QuantileLens {
    quantile: f64,
    estimate: f64,
    adjustment: f64,

    // Estimator state, deliberately shared across epochs: the estimate
    // tracks the stream, not the interval, and is never reset on read.
    multiplier: AtomicI64,

    epochs: [QuantileEpoch; 2],
}

impl QuantileLens {
    pub(crate) fn new(quantile: f64, estimate: f64, adjustment: f64) -> Result<QuantileLens, Error> {
        if !(quantile > 0.0 && quantile < 1.0) {
            return Err(Error::InvalidQuantile(quantile));
        }

        Ok(QuantileLens {
            quantile,
            estimate,
            adjustment,
            multiplier: AtomicI64::new(0),
            epochs: [
                QuantileEpoch {
                    count: AtomicU64::new(0),
                },
                QuantileEpoch {
                    count: AtomicU64::new(0),
                },
            ],
        })
    }

    fn current(&self) -> f64 {
        let multiplier = self.multiplier.load(Ordering::Relaxed) as f64;
        self.estimate + multiplier * self.adjustment
    }

    pub(crate) fn update(&self, epoch: usize, value: f64) {
        let estimate = self.current();
        let hit = rand::thread_rng().gen_bool(self.quantile);

        if value < estimate {
            if !hit {
                self.multiplier.fetch_sub(1, Ordering::Relaxed);
            }
        } else if hit {
            self.multiplier.fetch_add(1, Ordering::Relaxed);
        }

        // The count is informational and never feeds back into the
        // estimate, so ordering doesn't matter.
        self.epochs[epoch].count.fetch_add(1, Ordering::Relaxed);
    }

    /// Estimate plus drained arrival count. The multiplier survives the
    /// read; only the count is per-interval.
    pub(crate) fn read(&self, epoch: usize) -> QuantileSummary {
        QuantileSummary {
            quantile: self.quantile,
            sample: self.current(),
            count: self.epochs[epoch].count.swap(0, Ordering::Relaxed),
        }
    }
}
