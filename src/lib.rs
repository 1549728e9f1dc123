//! Push in-process metrics to a Graphite server over its plaintext protocol

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod exporter;
pub mod format;
pub mod registry;
pub mod scheduler;
pub mod snapshot;
pub mod util;

/// Re-export of commonly used types for convenience
pub mod prelude {
    pub use crate::config::{
        DurationUnit, ExportConfig, ExportConfigBuilder, ExporterSettings, FieldNames,
        SettingsBuilder, WritePolicy,
    };
    pub use crate::diagnostics::{Diagnostics, LogDiagnostics, RecordingDiagnostics};
    pub use crate::error::{ExportError, Result};
    pub use crate::exporter::{CycleReport, Dialer, TcpDialer};
    pub use crate::registry::{
        MemoryRegistry, Metric, Registry, SampleHistogram, StdCounter, StdGauge, StdGaugeFloat,
        StdMeter, StdTimer,
    };
    pub use crate::scheduler::{graphite, graphite_once, graphite_with_config, Exporter, ExporterHandle};
}

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
