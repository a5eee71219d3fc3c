//! Gauge lens: last-write-wins double, stored as its bit pattern.

use crate::sync::{AtomicBool, AtomicU64, Ordering};

#[repr(align(64))]
struct GaugeEpoch {
    present: AtomicBool,

    // IEEE-754 bit pattern of the last value written. A torn pair (flag up
    // before the bits land) can at worst surface one stale sample, which
    // the next poll corrects.
    bits: AtomicU64,
}

const _: () = assert!(std::mem::align_of::<GaugeEpoch>() == 64);

pub(crate) struct GaugeLens {
    epochs: [GaugeEpoch; 2],
}

impl GaugeLens {
    pub(crate) fn new() -> GaugeLens {
        GaugeLens {
            epochs: [GaugeLens::record(), GaugeLens::record()],
        }
    }

    fn record() -> GaugeEpoch {
        GaugeEpoch {
            present: AtomicBool::new(false),
            bits: AtomicU64::new(0),
        }
    }

    /// Store `value` for both epochs' next harvest. Writing both records
    /// keeps the last value visible for exactly one read per epoch: a gauge
    /// set once is emitted on the next two polls and empty afterwards.
    pub(crate) fn set(&self, value: f64) {
        for record in &self.epochs {
            record.bits.store(value.to_bits(), Ordering::Relaxed);
            record.present.store(true, Ordering::Relaxed);
        }
    }

    /// Take the value pending for this epoch, or `None` if no `set`
    /// refreshed it since the previous read.
    pub(crate) fn read(&self, epoch: usize) -> Option<f64> {
        let record = &self.epochs[epoch];

        if !record.present.swap(false, Ordering::Relaxed) {
            return None;
        }
        Some(f64::from_bits(record.bits.swap(0, Ordering::Relaxed)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_feeds_one_read_per_epoch() {
        let gauge = GaugeLens::new();
        gauge.set(1.2e-4);

        assert_eq!(gauge.read(0), Some(1.2e-4));
        assert_eq!(gauge.read(0), None);

        assert_eq!(gauge.read(1), Some(1.2e-4));
        assert_eq!(gauge.read(1), None);
    }

    #[test]
    fn last_write_wins() {
        let gauge = GaugeLens::new();

        gauge.set(1.0);
        gauge.set(-1.0);
        assert_eq!(gauge.read(0), Some(-1.0));
    }

    #[test]
    fn fresh_gauge_is_empty() {
        let gauge = GaugeLens::new();
        assert_eq!(gauge.read(0), None);
        assert_eq!(gauge.read(1), None);
    }
}
