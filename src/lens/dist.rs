//! Distribution lens: a fixed-size uniform sample of the interval's stream.
//!
//! The reservoir is Algorithm R: the first 200 arrivals fill the array, and
//! the `t`-th arrival past that replaces a uniformly drawn slot with
//! probability `200/t`. The per-epoch record is guarded by a spinlock held
//! for a slot write and two scalar updates; recorders only contend with
//! recorders on the same epoch, and the poller declines to wait.

use crate::error::ReadError;
use crate::spin::SpinLock;
use crate::DIST_RESERVOIR_LEN;
use rand::Rng;

struct DistRecord {
    n: u64,
    max: f64,
    samples: [f64; DIST_RESERVOIR_LEN],
}

#[repr(align(64))]
struct DistEpoch {
    record: SpinLock<DistRecord>,
}

const _: () = assert!(std::mem::align_of::<DistEpoch>() == 64);

/// Quantile summary of one interval's reservoir.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DistSummary {
    /// Total arrivals this interval, including those not retained.
    pub n: u64,
    pub p50: f64,
    pub p90: f64,
    pub p99: f64,
    pub max: f64,
    /// The retained reservoir, sorted ascending.
    pub samples: Vec<f64>,
}

pub(crate) struct DistLens {
    epochs: [DistEpoch; 2],
}

impl DistLens {
    pub(crate) fn new() -> DistLens {
        DistLens {
            epochs: [DistLens::record(), DistLens::record()],
        }
    }

    fn record() -> DistEpoch {
        DistEpoch {
            record: SpinLock::new(DistRecord {
                n: 0,
                max: 0.0,
                samples: [0.0; DIST_RESERVOIR_LEN],
            }),
        }
    }

    pub(crate) fn record_value(&self, epoch: usize, value: f64) {
        let mut record = self.epochs[epoch].record.lock();

        let mut i = record.n as usize;
        if i >= DIST_RESERVOIR_LEN {
            // Inclusive upper bound: the n+1-th arrival must be retained
            // with probability len/(n+1), which the exclusive draw misses.
            i = rand::thread_rng().gen_range(0..=record.n) as usize;
        }
        if i < DIST_RESERVOIR_LEN {
            record.samples[i] = value;
        }

        record.n += 1;
        if value > record.max {
            record.max = value;
        }
    }

    /// Extract and reset this epoch's reservoir. Fails `Busy` rather than
    /// stealing the lock from a straggling recorder.
    pub(crate) fn read(&self, epoch: usize) -> Result<DistSummary, ReadError> {
        let mut summary = DistSummary::default();

        {
            let mut record = self.epochs[epoch]
                .record
                .try_lock()
                .ok_or(ReadError::Busy)?;

            summary.n = record.n;
            summary.max = record.max;

            let retained = (record.n as usize).min(DIST_RESERVOIR_LEN);
            summary.samples.extend_from_slice(&record.samples[..retained]);

            record.n = 0;
            record.max = 0.0;
        }

        if summary.n == 0 {
            return Ok(summary);
        }

        summary.samples.sort_by(|a, b| a.total_cmp(b));
        summary.p50 = summary.samples[percentile_index(50, summary.samples.len())];
        summary.p90 = summary.samples[percentile_index(90, summary.samples.len())];
        summary.p99 = summary.samples[percentile_index(99, summary.samples.len())];

        Ok(summary)
    }
}

fn percentile_index(percentile: usize, len: usize) -> usize {
    (len * percentile / 100).min(len - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_stream_is_kept_whole() {
        let dist = DistLens::new();
        for v in [3.0, 1.0, 2.0] {
            dist.record_value(0, v);
        }

        let summary = dist.read(0).unwrap();
        assert_eq!(summary.n, 3);
        assert_eq!(summary.max, 3.0);
        assert_eq!(summary.samples, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn read_resets_the_record() {
        let dist = DistLens::new();
        dist.record_value(0, 5.0);

        assert_eq!(dist.read(0).unwrap().n, 1);

        let summary = dist.read(0).unwrap();
        assert_eq!(summary.n, 0);
        assert_eq!(summary.max, 0.0);
        assert!(summary.samples.is_empty());
    }

    #[test]
    fn percentiles_of_a_full_reservoir() {
        let dist = DistLens::new();
        for v in 1..=200 {
            dist.record_value(0, v as f64);
        }

        let summary = dist.read(0).unwrap();
        assert_eq!(summary.n, 200);
        assert_eq!(summary.max, 200.0);
        assert_eq!(summary.p50, 101.0);
        assert_eq!(summary.p90, 181.0);
        assert_eq!(summary.p99, 199.0);
    }

    #[test]
    fn overflow_keeps_a_uniform_subset() {
        let dist = DistLens::new();
        for v in 1..=1000 {
            dist.record_value(0, v as f64);
        }

        let summary = dist.read(0).unwrap();
        assert_eq!(summary.n, 1000);
        assert_eq!(summary.max, 1000.0);
        assert_eq!(summary.samples.len(), DIST_RESERVOIR_LEN);
        assert!(summary
            .samples
            .iter()
            .all(|v| (1.0..=1000.0).contains(v) && v.fract() == 0.0));
    }

    #[test]
    fn busy_when_a_recorder_holds_the_lock() {
        let dist = DistLens::new();

        let guard = dist.epochs[0].record.lock();
        assert_eq!(dist.read(0), Err(ReadError::Busy));
        drop(guard);

        assert!(dist.read(0).is_ok());
    }

    #[test]
    fn epochs_are_independent() {
        let dist = DistLens::new();
        dist.record_value(0, 1.0);
        dist.record_value(1, 9.0);

        assert_eq!(dist.read(1).unwrap().samples, vec![9.0]);
        assert_eq!(dist.read(0).unwrap().samples, vec![1.0]);
    }
}
