use std::sync::{
    atomic::{
        AtomicU64,
        Ordering::{AcqRel, Acquire, Relaxed, Release},
    },
    Arc,
};

use metrics::{CounterFn, GaugeFn, HistogramFn, Key};
use metrics_util::{registry::Storage, storage::AtomicBucket};

/// A monotonic counter that reports its cumulative value.
pub(crate) struct AtomicCounter {
    current: AtomicU64,
    updates: AtomicU64,
}

impl AtomicCounter {
    /// Creates a new `AtomicCounter`.
    fn new() -> Self {
        Self { current: AtomicU64::new(0), updates: AtomicU64::new(0) }
    }

    /// Flushes the counter, returning its cumulative value and the number of updates since the last flush.
    pub fn flush(&self) -> (u64, u64) {
        let current = self.current.load(Acquire);
        let updates = self.updates.swap(0, AcqRel);

        (current, updates)
    }
}

impl CounterFn for AtomicCounter {
    fn increment(&self, value: u64) {
        self.current.fetch_add(value, Relaxed);
        self.updates.fetch_add(1, Relaxed);
    }

    fn absolute(&self, value: u64) {
        self.current.fetch_max(value, AcqRel);
        self.updates.fetch_add(1, Relaxed);
    }
}

/// A gauge that reports its latest value.
pub(crate) struct AtomicGauge {
    inner: AtomicU64,
    updates: AtomicU64,
}

impl AtomicGauge {
    /// Creates a new `AtomicGauge`.
    fn new() -> Self {
        Self { inner: AtomicU64::new(0.0f64.to_bits()), updates: AtomicU64::new(0) }
    }

    /// Flushes the current gauge value and the number of updates since the last flush.
    pub fn flush(&self) -> (f64, u64) {
        let current = f64::from_bits(self.inner.load(Acquire));
        let updates = self.updates.swap(0, AcqRel);

        (current, updates)
    }

    fn update<F>(&self, f: F)
    where
        F: Fn(f64) -> f64,
    {
        let mut current = self.inner.load(Acquire);
        loop {
            let new = f(f64::from_bits(current)).to_bits();
            match self.inner.compare_exchange_weak(current, new, AcqRel, Acquire) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        self.updates.fetch_add(1, Relaxed);
    }
}

impl GaugeFn for AtomicGauge {
    fn increment(&self, value: f64) {
        self.update(|current| current + value);
    }

    fn decrement(&self, value: f64) {
        self.update(|current| current - value);
    }

    fn set(&self, value: f64) {
        self.inner.store(value.to_bits(), Release);
        self.updates.fetch_add(1, Relaxed);
    }
}

/// A histogram that collects the raw samples recorded during one reporting cycle.
pub(crate) struct AtomicHistogram {
    samples: AtomicBucket<f64>,
}

impl AtomicHistogram {
    /// Creates a new `AtomicHistogram`.
    fn new() -> Self {
        Self { samples: AtomicBucket::new() }
    }

    /// Drains the samples recorded since the last flush, handing them to `f`.
    ///
    /// The closure may be called more than once, with a distinct chunk of samples each time.
    pub fn flush<F>(&self, f: F)
    where
        F: FnMut(&[f64]),
    {
        self.samples.clear_with(f);
    }
}

impl HistogramFn for AtomicHistogram {
    fn record(&self, value: f64) {
        self.samples.push(value);
    }
}

/// Metric storage for the Graphite exporter.
///
/// - Counters report their cumulative value, as Graphite stores the running total and derives rates on read.
/// - Gauges keep "last write wins" semantics.
/// - Histograms keep their raw samples until the next flush, where they are summarised.
///
/// Counters and gauges also track how many updates they received since the last flush, so that idle metrics can be
/// skipped.
pub(crate) struct GraphiteStorage;

impl Storage<Key> for GraphiteStorage {
    type Counter = Arc<AtomicCounter>;
    type Gauge = Arc<AtomicGauge>;
    type Histogram = Arc<AtomicHistogram>;

    fn counter(&self, _: &Key) -> Self::Counter {
        Arc::new(AtomicCounter::new())
    }

    fn gauge(&self, _: &Key) -> Self::Gauge {
        Arc::new(AtomicGauge::new())
    }

    fn histogram(&self, _: &Key) -> Self::Histogram {
        Arc::new(AtomicHistogram::new())
    }
}
