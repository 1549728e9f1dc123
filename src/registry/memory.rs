use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use log::trace;

use super::types::{
    Counter, Gauge, GaugeFloat, Histogram, Meter, Metric, RateSnapshot, Registry, SampleSnapshot,
    Timer, TimerSnapshot,
};

/// Interval at which [`StdMeter::tick`] is expected to be called
pub const TICK_INTERVAL: Duration = Duration::from_secs(5);

/// Default number of samples a [`SampleHistogram`] retains
pub const DEFAULT_SAMPLE_CAPACITY: usize = 1028;

/// A minimal in-memory registry
#[derive(Default)]
pub struct MemoryRegistry {
    metrics: RwLock<BTreeMap<String, Metric>>,
}

impl MemoryRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a metric under `name`.
    ///
    /// Returns `false` and leaves the existing entry alone if the name is
    /// already taken.
    pub fn register(&self, name: impl Into<String>, metric: Metric) -> bool {
        let name = name.into();
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        if metrics.contains_key(&name) {
            return false;
        }
        trace!("Registered {} metric '{}'", metric.kind(), name);
        metrics.insert(name, metric);
        true
    }

    /// Remove a metric by name
    pub fn unregister(&self, name: &str) -> Option<Metric> {
        self.metrics
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    /// Look up a metric by name
    pub fn get(&self, name: &str) -> Option<Metric> {
        self.metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Get all registered names
    pub fn names(&self) -> Vec<String> {
        self.metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.metrics.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Registry for MemoryRegistry {
    fn each(&self, visitor: &mut dyn FnMut(&str, &Metric)) {
        let metrics = self.metrics.read().unwrap_or_else(PoisonError::into_inner);
        for (name, metric) in metrics.iter() {
            visitor(name, metric);
        }
    }
}

/// Atomic counter
#[derive(Debug, Default)]
pub struct StdCounter(AtomicI64);

impl StdCounter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inc(&self, n: i64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn dec(&self, n: i64) {
        self.0.fetch_sub(n, Ordering::Relaxed);
    }

    pub fn clear(&self) {
        self.0.store(0, Ordering::Relaxed);
    }
}

impl Counter for StdCounter {
    fn count(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Atomic integer gauge
#[derive(Debug, Default)]
pub struct StdGauge(AtomicI64);

impl StdGauge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn update(&self, value: i64) {
        self.0.store(value, Ordering::Relaxed);
    }
}

impl Gauge for StdGauge {
    fn value(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Atomic floating point gauge, stored as raw bits
#[derive(Debug, Default)]
pub struct StdGaugeFloat(AtomicU64);

impl StdGaugeFloat {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn update(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

impl GaugeFloat for StdGaugeFloat {
    fn value(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }
}

#[derive(Debug, Default)]
struct Window {
    count: i64,
    values: VecDeque<i64>,
}

/// Histogram over a sliding window of the most recent samples
#[derive(Debug)]
pub struct SampleHistogram {
    capacity: usize,
    window: Mutex<Window>,
}

impl SampleHistogram {
    /// Create a histogram retaining [`DEFAULT_SAMPLE_CAPACITY`] samples
    pub fn new() -> Arc<Self> {
        Arc::new(Self::with_capacity(DEFAULT_SAMPLE_CAPACITY))
    }

    /// Create a histogram retaining at most `capacity` samples
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            window: Mutex::new(Window::default()),
        }
    }

    pub fn update(&self, value: i64) {
        let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        window.count += 1;
        if window.values.len() == self.capacity {
            window.values.pop_front();
        }
        window.values.push_back(value);
    }

    pub fn clear(&self) {
        let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        *window = Window::default();
    }

    fn samples(&self) -> Samples {
        let window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        Samples::new(window.count, window.values.iter().copied().collect())
    }
}

impl Histogram for SampleHistogram {
    fn snapshot(&self) -> Box<dyn SampleSnapshot> {
        Box::new(self.samples())
    }
}

/// Frozen, sorted copy of a sample window
#[derive(Debug, Clone, PartialEq)]
pub struct Samples {
    count: i64,
    sorted: Vec<i64>,
}

impl Samples {
    /// `count` is the total number of updates, which may exceed the
    /// retained `values`
    pub fn new(count: i64, mut values: Vec<i64>) -> Self {
        values.sort_unstable();
        Self {
            count,
            sorted: values,
        }
    }
}

impl SampleSnapshot for Samples {
    fn count(&self) -> i64 {
        self.count
    }

    fn min(&self) -> i64 {
        self.sorted.first().copied().unwrap_or(0)
    }

    fn max(&self) -> i64 {
        self.sorted.last().copied().unwrap_or(0)
    }

    fn mean(&self) -> f64 {
        if self.sorted.is_empty() {
            return 0.0;
        }
        self.sorted.iter().map(|&v| v as f64).sum::<f64>() / self.sorted.len() as f64
    }

    fn std_dev(&self) -> f64 {
        if self.sorted.is_empty() {
            return 0.0;
        }
        let mean = self.mean();
        let variance = self
            .sorted
            .iter()
            .map(|&v| {
                let d = v as f64 - mean;
                d * d
            })
            .sum::<f64>()
            / self.sorted.len() as f64;
        variance.sqrt()
    }

    fn percentiles(&self, fractions: &[f64]) -> Vec<f64> {
        let len = self.sorted.len();
        if len == 0 {
            return vec![0.0; fractions.len()];
        }
        fractions
            .iter()
            .map(|&p| {
                // Position on a 1-based scale, interpolated between neighbours
                let pos = p * (len + 1) as f64;
                if pos < 1.0 {
                    self.sorted[0] as f64
                } else if pos >= len as f64 {
                    self.sorted[len - 1] as f64
                } else {
                    let lower = self.sorted[pos as usize - 1] as f64;
                    let upper = self.sorted[pos as usize] as f64;
                    lower + (pos - pos.floor()) * (upper - lower)
                }
            })
            .collect()
    }
}

/// Exponentially weighted moving average of a per-second rate
#[derive(Debug)]
struct Ewma {
    alpha: f64,
    rate: f64,
    uncounted: i64,
    primed: bool,
}

impl Ewma {
    fn over_minutes(minutes: f64) -> Self {
        let tick = TICK_INTERVAL.as_secs_f64();
        Self {
            alpha: 1.0 - (-tick / 60.0 / minutes).exp(),
            rate: 0.0,
            uncounted: 0,
            primed: false,
        }
    }

    fn update(&mut self, n: i64) {
        self.uncounted += n;
    }

    fn tick(&mut self) {
        let instant = self.uncounted as f64 / TICK_INTERVAL.as_secs_f64();
        self.uncounted = 0;
        if self.primed {
            self.rate += self.alpha * (instant - self.rate);
        } else {
            self.rate = instant;
            self.primed = true;
        }
    }
}

#[derive(Debug)]
struct MeterState {
    count: i64,
    m1: Ewma,
    m5: Ewma,
    m15: Ewma,
}

/// Meter with one, five and fifteen minute moving averages.
///
/// The moving averages only advance when [`StdMeter::tick`] is called, which
/// the host should do every [`TICK_INTERVAL`].
#[derive(Debug)]
pub struct StdMeter {
    started: Instant,
    state: Mutex<MeterState>,
}

impl StdMeter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record `n` events
    pub fn mark(&self, n: i64) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.count += n;
        state.m1.update(n);
        state.m5.update(n);
        state.m15.update(n);
    }

    /// Fold the events since the last tick into the moving averages
    pub fn tick(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.m1.tick();
        state.m5.tick();
        state.m15.tick();
    }
}

impl Default for StdMeter {
    fn default() -> Self {
        Self {
            started: Instant::now(),
            state: Mutex::new(MeterState {
                count: 0,
                m1: Ewma::over_minutes(1.0),
                m5: Ewma::over_minutes(5.0),
                m15: Ewma::over_minutes(15.0),
            }),
        }
    }
}

impl Meter for StdMeter {
    fn snapshot(&self) -> RateSnapshot {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let elapsed = self.started.elapsed().as_secs_f64();
        let rate_mean = if elapsed > 0.0 {
            state.count as f64 / elapsed
        } else {
            0.0
        };
        RateSnapshot {
            count: state.count,
            rate1: state.m1.rate,
            rate5: state.m5.rate,
            rate15: state.m15.rate,
            rate_mean,
        }
    }
}

/// Timer recording durations in nanoseconds alongside an event rate
#[derive(Debug)]
pub struct StdTimer {
    histogram: SampleHistogram,
    meter: StdMeter,
}

impl StdTimer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record one duration
    pub fn update(&self, elapsed: Duration) {
        let nanos = i64::try_from(elapsed.as_nanos()).unwrap_or(i64::MAX);
        self.histogram.update(nanos);
        self.meter.mark(1);
    }

    /// Run `f` and record how long it took
    pub fn time<T>(&self, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let result = f();
        self.update(start.elapsed());
        result
    }

    /// Advance the rate averages, see [`StdMeter::tick`]
    pub fn tick(&self) {
        self.meter.tick();
    }
}

impl Default for StdTimer {
    fn default() -> Self {
        Self {
            histogram: SampleHistogram::with_capacity(DEFAULT_SAMPLE_CAPACITY),
            meter: StdMeter::default(),
        }
    }
}

impl Timer for StdTimer {
    fn snapshot(&self) -> TimerSnapshot {
        TimerSnapshot {
            samples: Box::new(self.histogram.samples()),
            rates: self.meter.snapshot(),
        }
    }
}
