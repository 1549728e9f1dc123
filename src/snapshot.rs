//! Extraction of exportable fields from each metric kind
use crate::config::{ExportConfig, FieldNames};
use crate::format::{percentile_key, Field};
use crate::registry::{Metric, RateSnapshot, SampleSnapshot};

/// Turns metrics into field lists for one export cycle.
///
/// Percentile keys are derived once and reused for every metric.
#[derive(Debug)]
pub struct Snapshotter<'a> {
    names: &'a FieldNames,
    percentiles: &'a [f64],
    percentile_keys: Vec<String>,
    duration_divisor: i64,
}

impl<'a> Snapshotter<'a> {
    pub fn new(config: &'a ExportConfig) -> Self {
        Self::with_options(
            &config.field_names,
            &config.percentiles,
            config.duration_divisor(),
        )
    }

    /// `duration_divisor` is the duration unit in nanoseconds
    pub fn with_options(names: &'a FieldNames, percentiles: &'a [f64], duration_divisor: i64) -> Self {
        Self {
            names,
            percentiles,
            percentile_keys: percentiles.iter().copied().map(percentile_key).collect(),
            duration_divisor: duration_divisor.max(1),
        }
    }

    /// Fields for one metric, or `None` if its kind cannot be exported
    pub fn fields(&self, metric: &Metric) -> Option<Vec<Field>> {
        let names = self.names;
        let fields = match metric {
            Metric::Counter(counter) => vec![Field::new(&names.count, counter.count())],
            Metric::Gauge(gauge) => vec![Field::new(&names.value, gauge.value())],
            Metric::GaugeFloat(gauge) => vec![Field::new(&names.value, gauge.value())],
            Metric::Histogram(histogram) => {
                let snapshot = histogram.snapshot();
                let mut fields = Vec::with_capacity(5 + self.percentiles.len());
                self.push_samples(&mut fields, snapshot.as_ref(), 1);
                fields
            }
            Metric::Meter(meter) => {
                let snapshot = meter.snapshot();
                let mut fields = Vec::with_capacity(5);
                fields.push(Field::new(&names.count, snapshot.count));
                self.push_rates(&mut fields, &snapshot);
                fields
            }
            Metric::Timer(timer) => {
                let snapshot = timer.snapshot();
                let mut fields = Vec::with_capacity(9 + self.percentiles.len());
                self.push_samples(&mut fields, snapshot.samples.as_ref(), self.duration_divisor);
                self.push_rates(&mut fields, &snapshot.rates);
                fields
            }
            Metric::Other(_) => return None,
        };
        Some(fields)
    }

    /// Count, extremes, moments and percentiles, scaled by `divisor`.
    ///
    /// Extremes use integer division, everything else floating point.
    fn push_samples(&self, fields: &mut Vec<Field>, snapshot: &dyn SampleSnapshot, divisor: i64) {
        let names = self.names;
        let fdiv = divisor as f64;
        fields.push(Field::new(&names.count, snapshot.count()));
        fields.push(Field::new(&names.min, snapshot.min() / divisor));
        fields.push(Field::new(&names.max, snapshot.max() / divisor));
        fields.push(Field::new(&names.mean, snapshot.mean() / fdiv));
        fields.push(Field::new(&names.std_dev, snapshot.std_dev() / fdiv));

        let values = snapshot.percentiles(self.percentiles);
        for (key, value) in self.percentile_keys.iter().zip(values) {
            fields.push(Field::new(key, value / fdiv));
        }
    }

    fn push_rates(&self, fields: &mut Vec<Field>, rates: &RateSnapshot) {
        let names = self.names;
        fields.push(Field::new(&names.rate1, rates.rate1));
        fields.push(Field::new(&names.rate5, rates.rate5));
        fields.push(Field::new(&names.rate15, rates.rate15));
        fields.push(Field::new(&names.rate_mean, rates.rate_mean));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::FieldValue;
    use crate::registry::{
        Histogram, Meter, Samples, StdCounter, StdGauge, StdGaugeFloat, Timer, TimerSnapshot,
    };
    use std::sync::Arc;

    /// Meter with fixed rates
    struct FixedMeter(RateSnapshot);

    impl Meter for FixedMeter {
        fn snapshot(&self) -> RateSnapshot {
            self.0
        }
    }

    /// Timer with fixed samples, in nanoseconds
    struct FixedTimer(Vec<i64>, RateSnapshot);

    impl Timer for FixedTimer {
        fn snapshot(&self) -> TimerSnapshot {
            TimerSnapshot {
                samples: Box::new(Samples::new(self.0.len() as i64, self.0.clone())),
                rates: self.1,
            }
        }
    }

    struct FixedHistogram(Vec<i64>);

    impl Histogram for FixedHistogram {
        fn snapshot(&self) -> Box<dyn SampleSnapshot> {
            Box::new(Samples::new(self.0.len() as i64, self.0.clone()))
        }
    }

    fn rates() -> RateSnapshot {
        RateSnapshot {
            count: 4,
            rate1: 1.5,
            rate5: 0.5,
            rate15: 0.25,
            rate_mean: 2.0,
        }
    }

    fn names_of(fields: &[Field]) -> Vec<&str> {
        fields.iter().map(|f| f.name.as_str()).collect()
    }

    fn value_of(fields: &[Field], name: &str) -> FieldValue {
        fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value)
            .unwrap_or_else(|| panic!("no field {}", name))
    }

    #[test]
    fn test_scalar_metrics() {
        let names = FieldNames::default();
        let snapshotter = Snapshotter::with_options(&names, &[], 1);

        let counter = StdCounter::new();
        counter.inc(42);
        let fields = snapshotter.fields(&Metric::Counter(counter)).unwrap();
        assert_eq!(fields, vec![Field::new("count", 42i64)]);

        let gauge = StdGauge::new();
        gauge.update(-7);
        let fields = snapshotter.fields(&Metric::Gauge(gauge)).unwrap();
        assert_eq!(fields, vec![Field::new("value", -7i64)]);

        let gauge = StdGaugeFloat::new();
        gauge.update(0.5);
        let fields = snapshotter.fields(&Metric::GaugeFloat(gauge)).unwrap();
        assert_eq!(fields, vec![Field::new("value", 0.5)]);
    }

    #[test]
    fn test_histogram_is_not_scaled() {
        let names = FieldNames::default();
        let percentiles = [0.5, 0.999];
        let snapshotter = Snapshotter::with_options(&names, &percentiles, 1_000_000);

        let metric = Metric::Histogram(Arc::new(FixedHistogram(vec![1, 2, 3, 4])));
        let fields = snapshotter.fields(&metric).unwrap();

        assert_eq!(
            names_of(&fields),
            vec!["count", "min", "max", "mean", "stddev", "50", "999"]
        );
        assert_eq!(value_of(&fields, "min"), FieldValue::Int(1));
        assert_eq!(value_of(&fields, "max"), FieldValue::Int(4));
        assert_eq!(value_of(&fields, "mean"), FieldValue::Float(2.5));
        assert_eq!(value_of(&fields, "50"), FieldValue::Float(2.5));
    }

    #[test]
    fn test_meter_fields() {
        let names = FieldNames::default();
        let snapshotter = Snapshotter::with_options(&names, &[0.5], 1);
        let fields = snapshotter
            .fields(&Metric::Meter(Arc::new(FixedMeter(rates()))))
            .unwrap();

        assert_eq!(
            fields,
            vec![
                Field::new("count", 4i64),
                Field::new("rate-1min", 1.5),
                Field::new("rate-5min", 0.5),
                Field::new("rate-15min", 0.25),
                Field::new("mean-rate", 2.0),
            ]
        );
    }

    #[test]
    fn test_timer_scales_durations_not_rates() {
        let names = FieldNames::default();
        let percentiles = [0.5];
        let snapshotter = Snapshotter::with_options(&names, &percentiles, 1_000_000);

        // min 1.5ms and max 3.5ms truncate; mean is exactly 2.5ms
        let timer = FixedTimer(vec![1_500_000, 2_500_000, 3_500_000], rates());
        let fields = snapshotter.fields(&Metric::Timer(Arc::new(timer))).unwrap();

        assert_eq!(
            names_of(&fields),
            vec![
                "count",
                "min",
                "max",
                "mean",
                "stddev",
                "50",
                "rate-1min",
                "rate-5min",
                "rate-15min",
                "mean-rate"
            ]
        );
        assert_eq!(value_of(&fields, "count"), FieldValue::Int(3));
        assert_eq!(value_of(&fields, "min"), FieldValue::Int(1));
        assert_eq!(value_of(&fields, "max"), FieldValue::Int(3));
        assert_eq!(value_of(&fields, "mean"), FieldValue::Float(2.5));
        assert_eq!(value_of(&fields, "50"), FieldValue::Float(2.5));
        assert_eq!(value_of(&fields, "rate-1min"), FieldValue::Float(1.5));
        assert_eq!(value_of(&fields, "mean-rate"), FieldValue::Float(2.0));

        let FieldValue::Float(std_dev) = value_of(&fields, "stddev") else {
            panic!("stddev should be a float");
        };
        let expected = (2.0f64 / 3.0).sqrt();
        assert!((std_dev - expected).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_kind_has_no_fields() {
        let names = FieldNames::default();
        let snapshotter = Snapshotter::with_options(&names, &[], 1);
        assert!(snapshotter.fields(&Metric::other::<u8>()).is_none());
    }

    #[test]
    fn test_custom_field_names() {
        let names = FieldNames {
            count: "total".to_string(),
            ..FieldNames::default()
        };
        let snapshotter = Snapshotter::with_options(&names, &[], 1);
        let fields = snapshotter
            .fields(&Metric::Counter(StdCounter::new()))
            .unwrap();
        assert_eq!(names_of(&fields), vec!["total"]);
    }
}
