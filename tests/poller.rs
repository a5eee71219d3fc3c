use optics::{Backend, Event, Optics, Poller};
use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex};

type Results = Arc<Mutex<HashMap<String, f64>>>;

/// Backend that flattens every metric into `prefix.host.key` entries, the
/// way the carbon wire format would.
struct MapBackend {
    results: Results,
}

impl Backend for MapBackend {
    fn record(&mut self, event: Event<'_>) {
        if let Event::Metric(poll) = event {
            let results = &self.results;
            poll.normalize(|_, key, value| {
                let full = format!("{}.{}.{}", poll.prefix, poll.host, key);
                results.lock().unwrap().insert(full, value);
                true
            });
        }
    }
}

fn harness(prefix: &str, host: &str, at: u64) -> (Arc<Optics>, Poller, Results) {
    let optics = Optics::with_prefix_at(prefix, at).unwrap();

    let results = Results::default();
    let mut poller = Poller::new(optics.clone());
    poller.set_host(host).unwrap();
    poller.backend(MapBackend {
        results: results.clone(),
    });

    (optics, poller, results)
}

fn take(results: &Results) -> HashMap<String, f64> {
    std::mem::take(&mut *results.lock().unwrap())
}

fn expect(entries: &[(&str, f64)]) -> HashMap<String, f64> {
    entries
        .iter()
        .map(|(key, value)| ((*key).to_owned(), *value))
        .collect()
}

#[test]
fn multi_gauge_visibility_across_closes() {
    let (optics, mut poller, results) = harness("prefix", "host", 0);

    let g1 = optics.create_gauge("g1").unwrap();
    let g2 = optics.create_gauge("g2").unwrap();
    let g3 = optics.create_gauge("g3").unwrap();
    g2.set(1.0);
    g3.set(1.2e-4);

    assert!(poller.poll_at(1));
    assert_eq!(
        take(&results),
        expect(&[
            ("prefix.host.g1", 0.0),
            ("prefix.host.g2", 1.0),
            ("prefix.host.g3", 1.2e-4),
        ])
    );

    let g4 = optics.create_gauge("g4").unwrap();
    assert!(g1.close());
    g2.set(2.0);
    g4.set(-1.0);

    assert!(poller.poll_at(2));
    assert_eq!(
        take(&results),
        expect(&[
            ("prefix.host.g2", 2.0),
            ("prefix.host.g3", 1.2e-4),
            ("prefix.host.g4", -1.0),
        ])
    );

    assert!(g2.close());
    assert!(g3.close());
    assert!(g4.close());

    assert!(poller.poll_at(3));
    assert!(take(&results).is_empty());
}

#[test]
fn counter_rate_and_clock_skew() {
    // The root's clock starts ahead of the poller's, so the first cycle
    // falls back to an elapsed of 1 and emits the raw delta.
    let (optics, mut poller, results) = harness("r", "h", 20);
    let counter = optics.create_counter("l").unwrap();

    counter.inc(10);
    assert!(poller.poll_at(10));
    assert_eq!(take(&results), expect(&[("r.h.l", 10.0)]));

    counter.inc(10);
    assert!(poller.poll_at(20));
    assert_eq!(take(&results), expect(&[("r.h.l", 1.0)]));

    counter.inc(10);
    assert!(poller.poll_at(30));
    assert_eq!(take(&results), expect(&[("r.h.l", 1.0)]));

    // A poll that doesn't advance the clock also rescales by 1.
    counter.inc(10);
    assert!(poller.poll_at(30));
    assert_eq!(take(&results), expect(&[("r.h.l", 10.0)]));
}

#[test]
fn empty_interval_emits_zero_counts() {
    let (optics, mut poller, results) = harness("p", "h", 0);
    let counter = optics.create_counter("c").unwrap();

    counter.inc(7);
    poller.poll_at(1);
    assert_eq!(take(&results), expect(&[("p.h.c", 7.0)]));

    poller.poll_at(2);
    assert_eq!(take(&results), expect(&[("p.h.c", 0.0)]));
}

#[test]
fn histogram_boundary_classification() {
    let (optics, mut poller, results) = harness("p", "h", 0);
    let histo = optics.create_histo("lat", &[0.0, 10.0, 100.0]).unwrap();

    for value in [0.0, 5.0, 10.0, 99.0, 100.0, -1.0] {
        histo.inc(value);
    }

    assert!(poller.poll_at(1));
    assert_eq!(
        take(&results),
        expect(&[
            ("p.h.lat.bucket_inf_0", 1.0),
            ("p.h.lat.bucket_0_10", 2.0),
            ("p.h.lat.bucket_10_100", 2.0),
            ("p.h.lat.bucket_100_inf", 1.0),
        ])
    );
}

#[test]
fn distribution_percentiles() {
    let (optics, mut poller, results) = harness("p", "h", 0);
    let dist = optics.create_dist("d").unwrap();

    for value in 1..=200 {
        dist.record(value as f64);
    }

    assert!(poller.poll_at(1));
    assert_eq!(
        take(&results),
        expect(&[
            ("p.h.d.count", 200.0),
            ("p.h.d.p50", 101.0),
            ("p.h.d.p90", 181.0),
            ("p.h.d.p99", 199.0),
            ("p.h.d.max", 200.0),
        ])
    );
}

#[test]
fn quantile_tracks_a_uniform_median() {
    use rand::Rng;

    let (optics, mut poller, results) = harness("p", "h", 0);
    let quantile = optics.create_quantile("q", 0.5, 0.0, 1.0).unwrap();

    let mut rng = rand::thread_rng();
    for _ in 0..10_000 {
        quantile.update(rng.gen_range(0.0..100.0));
    }

    assert!(poller.poll_at(1));
    let sample = take(&results)["p.h.q"];
    assert!((40.0..=60.0).contains(&sample), "estimate was {}", sample);
}

#[test]
fn counter_sums_across_recording_threads() {
    let (optics, mut poller, results) = harness("p", "h", 0);
    let counter = optics.create_counter("c").unwrap();

    let threads: Vec<_> = (0..4)
        .map(|_| {
            let counter = counter.clone();
            std::thread::spawn(move || {
                for _ in 0..10_000 {
                    counter.inc(1);
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }

    assert!(poller.poll_at(1));
    assert_eq!(take(&results), expect(&[("p.h.c", 40_000.0)]));
}

#[test]
fn traversal_tracks_registration() {
    let (optics, mut poller, _results) = harness("p", "h", 0);

    let c1 = optics.create_counter("c1").unwrap();
    let c2 = optics.create_counter("c2").unwrap();
    let _c3 = optics.create_counter("c3").unwrap();

    assert!(c2.close());

    let names = |optics: &Arc<Optics>| {
        let mut names = Vec::new();
        let _ = optics.for_each_lens(|lens| {
            names.push(lens.name().to_owned());
            ControlFlow::Continue(())
        });
        names.sort();
        names
    };

    assert_eq!(names(&optics), ["c1", "c3"]);
    assert!(optics.lens("c2").is_none());

    // Reclamation doesn't change what's reachable.
    poller.poll_at(1);
    poller.poll_at(2);
    assert_eq!(names(&optics), ["c1", "c3"]);

    // A handle that outlives its registration still records, harmlessly:
    // the parked storage is live, just never polled.
    let keep = c1.clone();
    assert!(c1.close());
    keep.inc(1);
    assert_eq!(names(&optics), ["c3"]);
}

#[test]
fn every_cycle_is_bracketed() {
    struct CountingBackend {
        events: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Backend for CountingBackend {
        fn record(&mut self, event: Event<'_>) {
            let tag = match event {
                Event::Begin => "begin",
                Event::Metric(_) => "metric",
                Event::Done => "done",
            };
            self.events.lock().unwrap().push(tag);
        }
    }

    let optics = Optics::with_prefix_at("p", 0).unwrap();
    let gauge = optics.create_gauge("g").unwrap();
    gauge.set(1.0);

    let events = Arc::new(Mutex::new(Vec::new()));
    let mut poller = Poller::new(optics.clone());
    poller.set_host("h").unwrap();
    poller.backend(CountingBackend {
        events: events.clone(),
    });

    poller.poll_at(1);
    assert_eq!(*events.lock().unwrap(), ["begin", "metric", "done"]);

    // A root with no lenses still brackets the cycle.
    events.lock().unwrap().clear();
    assert!(gauge.close());
    poller.poll_at(2);
    assert_eq!(*events.lock().unwrap(), ["begin", "done"]);
}
