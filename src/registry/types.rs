//! Capability contracts for the metrics the exporter reads
use std::any::type_name;
use std::fmt;
use std::sync::Arc;

/// A monotonically adjusted integer count
pub trait Counter: Send + Sync {
    /// Current count
    fn count(&self) -> i64;
}

/// An instantaneous integer value
pub trait Gauge: Send + Sync {
    /// Current value
    fn value(&self) -> i64;
}

/// An instantaneous floating point value
pub trait GaugeFloat: Send + Sync {
    /// Current value
    fn value(&self) -> f64;
}

/// A distribution of integer samples
pub trait Histogram: Send + Sync {
    /// Take an immutable read of the current distribution
    fn snapshot(&self) -> Box<dyn SampleSnapshot>;
}

/// An event rate tracker
pub trait Meter: Send + Sync {
    /// Take an immutable read of the current rates
    fn snapshot(&self) -> RateSnapshot;
}

/// A duration distribution combined with an event rate.
///
/// Durations are recorded in nanoseconds.
pub trait Timer: Send + Sync {
    /// Take an immutable read of the durations and rates
    fn snapshot(&self) -> TimerSnapshot;
}

/// Statistical view over a set of samples
pub trait SampleSnapshot: Send {
    /// Number of samples ever recorded
    fn count(&self) -> i64;

    /// Smallest sample, or 0 when empty
    fn min(&self) -> i64;

    /// Largest sample, or 0 when empty
    fn max(&self) -> i64;

    /// Arithmetic mean, or 0 when empty
    fn mean(&self) -> f64;

    /// Standard deviation, or 0 when empty
    fn std_dev(&self) -> f64;

    /// Values at each requested fraction, in the order requested
    fn percentiles(&self, fractions: &[f64]) -> Vec<f64>;
}

/// Rates of a meter at one point in time, in events per second
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RateSnapshot {
    pub count: i64,
    pub rate1: f64,
    pub rate5: f64,
    pub rate15: f64,
    pub rate_mean: f64,
}

/// Durations and rates of a timer at one point in time
pub struct TimerSnapshot {
    pub samples: Box<dyn SampleSnapshot>,
    pub rates: RateSnapshot,
}

impl fmt::Debug for TimerSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerSnapshot")
            .field("count", &self.samples.count())
            .field("rates", &self.rates)
            .finish()
    }
}

/// A registered metric.
///
/// The set of kinds the exporter understands is closed; anything else is
/// registered as [`Metric::Other`] and skipped at export time.
#[derive(Clone)]
pub enum Metric {
    Counter(Arc<dyn Counter>),
    Gauge(Arc<dyn Gauge>),
    GaugeFloat(Arc<dyn GaugeFloat>),
    Histogram(Arc<dyn Histogram>),
    Meter(Arc<dyn Meter>),
    Timer(Arc<dyn Timer>),
    /// A metric of a kind the exporter has no formatting for
    Other(&'static str),
}

impl Metric {
    /// Placeholder for a metric of type `T` the exporter cannot read
    pub fn other<T: ?Sized>() -> Self {
        Metric::Other(type_name::<T>())
    }

    /// Short name of the metric kind
    pub fn kind(&self) -> &'static str {
        match self {
            Metric::Counter(_) => "counter",
            Metric::Gauge(_) => "gauge",
            Metric::GaugeFloat(_) => "gauge_float",
            Metric::Histogram(_) => "histogram",
            Metric::Meter(_) => "meter",
            Metric::Timer(_) => "timer",
            Metric::Other(type_name) => type_name,
        }
    }
}

impl fmt::Debug for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Metric({})", self.kind())
    }
}

/// A named collection of metrics, read by visiting every entry.
///
/// Implementations must tolerate metrics being updated while they are
/// visited. Iteration order is unspecified.
pub trait Registry: Send + Sync + 'static {
    /// Call `visitor` once for each registered metric
    fn each(&self, visitor: &mut dyn FnMut(&str, &Metric));
}
