//! Histogram lens: fixed boundaries, one atomic counter per bucket.

use crate::sync::{AtomicU64, Ordering};
use crate::{Error, HISTO_MAX_BUCKETS};

#[repr(align(64))]
struct HistoEpoch {
    below: AtomicU64,
    above: AtomicU64,
    counts: [AtomicU64; HISTO_MAX_BUCKETS],
}

const _: () = assert!(std::mem::align_of::<HistoEpoch>() == 64);

/// One interval's bucket counts, paired with the boundaries that shaped
/// them so backends can label the buckets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoSummary {
    pub edges: Vec<f64>,
    pub below: u64,
    pub above: u64,
    pub counts: Vec<u64>,
}

pub(crate) struct HistoLens {
    edges: Vec<f64>,
    epochs: [HistoEpoch; 2],
}

impl HistoLens {
    /// `edges` are the `B + 1` bucket boundaries: strictly increasing,
    /// finite, with `1 <= B <= 8`.
    pub(crate) fn new(edges: &[f64]) -> Result<HistoLens, Error> {
        if edges.len() < 2 {
            return Err(Error::InvalidBuckets("fewer than two edges"));
        }
        if edges.len() > HISTO_MAX_BUCKETS + 1 {
            return Err(Error::InvalidBuckets("more than nine edges"));
        }
        if edges.iter().any(|e| !e.is_finite()) {
            return Err(Error::InvalidBuckets("non-finite edge"));
        }
        if edges.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::InvalidBuckets("edges not strictly increasing"));
        }

        Ok(HistoLens {
            edges: edges.to_vec(),
            epochs: [HistoLens::record(), HistoLens::record()],
        })
    }

    fn record() -> HistoEpoch {
        HistoEpoch {
            below: AtomicU64::new(0),
            above: AtomicU64::new(0),
            counts: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    pub(crate) fn inc(&self, epoch: usize, value: f64) {
        let record = &self.epochs[epoch];

        // Negated lower-bound test so NaN lands in `below` instead of
        // tripping the binary search.
        if !(value >= self.edges[0]) {
            record.below.fetch_add(1, Ordering::Relaxed);
        } else if value >= self.edges[self.edges.len() - 1] {
            record.above.fetch_add(1, Ordering::Relaxed);
        } else {
            // Bucket k covers edges[k] <= v < edges[k + 1]; boundaries are
            // lower-bound inclusive.
            let k = self.edges.partition_point(|edge| *edge <= value) - 1;
            record.counts[k].fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Snapshot and reset this epoch's counters. Never busy.
    pub(crate) fn read(&self, epoch: usize) -> HistoSummary {
        let record = &self.epochs[epoch];
        let buckets = self.edges.len() - 1;

        HistoSummary {
            edges: self.edges.clone(),
            below: record.below.swap(0, Ordering::Relaxed),
            above: record.above.swap(0, Ordering::Relaxed),
            counts: record.counts[..buckets]
                .iter()
                .map(|count| count.swap(0, Ordering::Relaxed))
                .collect(),
        }
    }
}
