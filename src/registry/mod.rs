mod types;
pub mod memory;

// Re-export public items
pub use types::{
    Counter, Gauge, GaugeFloat, Histogram, Meter, Metric, RateSnapshot, Registry, SampleSnapshot,
    Timer, TimerSnapshot,
};
pub use memory::{
    MemoryRegistry, SampleHistogram, Samples, StdCounter, StdGauge, StdGaugeFloat, StdMeter,
    StdTimer,
};
