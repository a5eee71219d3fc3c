//! The poll driver: flips the epoch, waits out stragglers, harvests every
//! registered lens, and hands typed samples to the configured backends.

use crate::key::Key;
use crate::lens::{Kind, Value};
use crate::optics::Optics;
use crate::Error;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// How long the poller sleeps after a flip before reading the quiescent
/// records. A recorder that sampled the old parity just before the flip may
/// still be mid-write; the grace window bounds that race, and anything
/// slower surfaces as a busy skip instead of corruption.
pub const POLL_GRACE: Duration = Duration::from_millis(1);

/// One lens's harvest for one interval.
///
/// `key` is the bare lens name; backends compose the full
/// `prefix.host.key[.suffix]` form, usually via [`Poll::normalize`].
#[derive(Debug, Clone)]
pub struct Poll<'a> {
    pub host: &'a str,
    pub prefix: &'a str,
    pub key: &'a str,
    pub kind: Kind,
    pub value: Value,
    pub ts: u64,
    pub elapsed: u64,
}

impl Poll<'_> {
    /// Flatten the typed value into `(ts, key, scalar)` callbacks, one per
    /// sub-key. Counter values and distribution counts are rescaled by the
    /// poll interval; everything else is emitted raw. Returns false if the
    /// callback aborted the walk.
    pub fn normalize<F>(&self, mut emit: F) -> bool
    where
        F: FnMut(u64, &str, f64) -> bool,
    {
        let mut key = Key::new();
        key.push(self.key);

        match &self.value {
            Value::Counter(count) => emit(self.ts, key.as_str(), self.rescale(*count as f64)),
            Value::Gauge(value) => emit(self.ts, key.as_str(), *value),
            Value::Quantile(summary) => emit(self.ts, key.as_str(), summary.sample),

            Value::Dist(summary) => {
                let subs = [
                    ("count", self.rescale(summary.n as f64)),
                    ("p50", summary.p50),
                    ("p90", summary.p90),
                    ("p99", summary.p99),
                    ("max", summary.max),
                ];

                for (suffix, value) in subs {
                    let pos = key.push(suffix);
                    if !emit(self.ts, key.as_str(), value) {
                        return false;
                    }
                    key.pop(pos);
                }
                true
            }

            Value::Histo(summary) => {
                if summary.edges.len() < 2 {
                    return true;
                }
                let first = summary.edges[0];
                let last = summary.edges[summary.edges.len() - 1];

                let pos = key.push(&format!("bucket_inf_{}", first));
                if !emit(self.ts, key.as_str(), summary.below as f64) {
                    return false;
                }
                key.pop(pos);

                for (k, count) in summary.counts.iter().enumerate() {
                    let pos =
                        key.push(&format!("bucket_{}_{}", summary.edges[k], summary.edges[k + 1]));
                    if !emit(self.ts, key.as_str(), *count as f64) {
                        return false;
                    }
                    key.pop(pos);
                }

                let pos = key.push(&format!("bucket_{}_inf", last));
                if !emit(self.ts, key.as_str(), summary.above as f64) {
                    return false;
                }
                key.pop(pos);
                true
            }
        }
    }

    fn rescale(&self, value: f64) -> f64 {
        value / self.elapsed as f64
    }
}

/// What a backend sees during one poll cycle: `Begin`, one `Metric` per
/// readable lens, then `Done`.
#[derive(Clone, Copy)]
pub enum Event<'a> {
    Begin,
    Metric(&'a Poll<'a>),
    Done,
}

/// Sink for poll events. Implementations run on the poller thread; slow
/// backends stretch the cycle, not the recorders.
pub trait Backend: Send {
    fn record(&mut self, event: Event<'_>);
}

/// Drives harvest cycles against one optics root.
pub struct Poller {
    optics: Arc<Optics>,
    host: String,
    backends: Vec<Box<dyn Backend>>,
}

impl Poller {
    /// A poller with the machine hostname as its host label.
    pub fn new(optics: Arc<Optics>) -> Poller {
        let host = hostname::get()
            .ok()
            .and_then(|host| host.into_string().ok())
            .unwrap_or_else(|| "localhost".to_owned());

        Poller {
            optics,
            host,
            backends: Vec::new(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn set_host(&mut self, host: &str) -> Result<(), Error> {
        if host.len() > crate::NAME_MAX_LEN - 1 {
            return Err(Error::NameTooLong(host.to_owned()));
        }

        self.host = host.to_owned();
        Ok(())
    }

    /// Register a backend for all subsequent cycles.
    pub fn backend<B: Backend + 'static>(&mut self, backend: B) {
        self.backends.push(Box::new(backend));
    }

    /// One harvest cycle stamped with the wall clock.
    pub fn poll(&mut self) -> bool {
        self.poll_at(crate::clock_wall())
    }

    /// One harvest cycle stamped with `ts`: flip, grace, traverse, emit.
    ///
    /// The cycle always runs to completion; unreadable lenses are warned
    /// about and skipped for the interval, their samples rolling over into
    /// the next epoch's records.
    pub fn poll_at(&mut self, ts: u64) -> bool {
        let (epoch, last_inc) = self.optics.flip_at(ts);

        let elapsed = if ts > last_inc {
            ts - last_inc
        } else {
            if ts < last_inc {
                warn!(
                    prefix = self.optics.prefix(),
                    optics_ts = last_inc,
                    poller_ts = ts,
                    "clock out of sync"
                );
            }
            1
        };

        #[cfg(not(loom))]
        std::thread::sleep(POLL_GRACE);

        emit_all(&mut self.backends, Event::Begin);

        let optics = Arc::clone(&self.optics);
        let backends = &mut self.backends;
        let host = &self.host;

        let _ = optics.for_each_shared(|shared| {
            match shared.read(epoch) {
                Ok(value) => {
                    let poll = Poll {
                        host,
                        prefix: optics.prefix(),
                        key: shared.name(),
                        kind: shared.kind(),
                        value,
                        ts,
                        elapsed,
                    };
                    emit_all(backends, Event::Metric(&poll));
                }
                Err(err) => {
                    let mut key = Key::new();
                    key.push(optics.prefix());
                    key.push(host);
                    key.push(shared.name());
                    warn!(key = %key, error = %err, "skipping lens");
                }
            }

            ControlFlow::Continue(())
        });

        emit_all(&mut self.backends, Event::Done);
        true
    }
}

fn emit_all(backends: &mut [Box<dyn Backend>], event: Event<'_>) {
    for backend in backends.iter_mut() {
        backend.record(event);
    }
}

/// Backend that buffers one cycle's normalized samples and writes them to
/// stdout on `Done`, one `prefix.host.key value ts` line each.
#[derive(Default)]
pub struct StdoutBackend {
    lines: Vec<String>,
}

impl StdoutBackend {
    pub fn new() -> StdoutBackend {
        StdoutBackend::default()
    }
}

impl Backend for StdoutBackend {
    fn record(&mut self, event: Event<'_>) {
        match event {
            Event::Begin => self.lines.clear(),

            Event::Metric(poll) => {
                let mut base = Key::new();
                base.push(poll.prefix);
                base.push(poll.host);

                let lines = &mut self.lines;
                poll.normalize(|ts, key, value| {
                    lines.push(format!("{}.{} {} {}", base, key, value, ts));
                    true
                });
            }

            Event::Done => {
                use std::io::Write;

                let stdout = std::io::stdout();
                let mut out = stdout.lock();
                for line in self.lines.drain(..) {
                    let _ = writeln!(out, "{}", line);
                }
            }
        }
    }
}

/// A background thread calling [`Poller::poll`] every `freq` until stopped.
pub struct PollThread {
    stop: Arc<AtomicBool>,
    handle: std::thread::JoinHandle<Poller>,
}

impl PollThread {
    pub fn spawn(mut poller: Poller, freq: Duration) -> PollThread {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let handle = std::thread::spawn(move || {
            while !stop_flag.load(Ordering::Acquire) {
                std::thread::sleep(freq);
                poller.poll();
            }
            poller
        });

        PollThread { stop, handle }
    }

    /// Stop the loop and hand the poller back. Blocks for at most one
    /// sleep interval.
    pub fn stop(self) -> Poller {
        self.stop.store(true, Ordering::Release);
        self.handle
            .join()
            .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lens::{DistSummary, HistoSummary, QuantileSummary};

    fn poll(value: Value, elapsed: u64) -> Poll<'static> {
        Poll {
            host: "h",
            prefix: "p",
            key: "l",
            kind: Kind::Counter,
            value,
            ts: 7,
            elapsed,
        }
    }

    fn normalized(poll: &Poll<'_>) -> Vec<(String, f64)> {
        let mut out = Vec::new();
        assert!(poll.normalize(|_, key, value| {
            out.push((key.to_owned(), value));
            true
        }));
        out
    }

    #[test]
    fn counter_is_rescaled() {
        let flat = normalized(&poll(Value::Counter(10), 10));
        assert_eq!(flat, vec![("l".to_owned(), 1.0)]);

        let flat = normalized(&poll(Value::Counter(10), 1));
        assert_eq!(flat, vec![("l".to_owned(), 10.0)]);
    }

    #[test]
    fn gauge_is_raw() {
        let flat = normalized(&poll(Value::Gauge(1.2e-4), 10));
        assert_eq!(flat, vec![("l".to_owned(), 1.2e-4)]);
    }

    #[test]
    fn dist_fans_out_five_keys() {
        let summary = DistSummary {
            n: 20,
            p50: 1.0,
            p90: 2.0,
            p99: 3.0,
            max: 4.0,
            samples: Vec::new(),
        };

        let flat = normalized(&poll(Value::Dist(summary), 10));
        assert_eq!(
            flat,
            vec![
                ("l.count".to_owned(), 2.0),
                ("l.p50".to_owned(), 1.0),
                ("l.p90".to_owned(), 2.0),
                ("l.p99".to_owned(), 3.0),
                ("l.max".to_owned(), 4.0),
            ]
        );
    }

    #[test]
    fn histo_buckets_are_labeled_and_raw() {
        let summary = HistoSummary {
            edges: vec![0.0, 10.0, 100.0],
            below: 1,
            above: 2,
            counts: vec![3, 4],
        };

        let flat = normalized(&poll(Value::Histo(summary), 10));
        assert_eq!(
            flat,
            vec![
                ("l.bucket_inf_0".to_owned(), 1.0),
                ("l.bucket_0_10".to_owned(), 3.0),
                ("l.bucket_10_100".to_owned(), 4.0),
                ("l.bucket_100_inf".to_owned(), 2.0),
            ]
        );
    }

    #[test]
    fn quantile_emits_the_estimate() {
        let summary = QuantileSummary {
            quantile: 0.9,
            sample: 42.0,
            count: 5,
        };

        let flat = normalized(&poll(Value::Quantile(summary), 10));
        assert_eq!(flat, vec![("l".to_owned(), 42.0)]);
    }

    #[test]
    fn normalize_aborts_on_false() {
        let summary = DistSummary {
            n: 1,
            ..DistSummary::default()
        };

        let mut seen = 0;
        let ok = poll(Value::Dist(summary), 1).normalize(|_, _, _| {
            seen += 1;
            false
        });

        assert!(!ok);
        assert_eq!(seen, 1);
    }
}
