//! Sink for non-fatal events raised while exporting
use log::{error, warn};
use std::io;
use std::sync::{Mutex, PoisonError};

use crate::error::ExportError;

/// Receives events that do not stop an export cycle
pub trait Diagnostics: Send + Sync + 'static {
    /// A metric of an unknown kind was skipped
    fn unsupported_metric(&self, name: &str, kind: &str);

    /// A write failed and was ignored under the best-effort write policy
    fn write_failed(&self, name: &str, err: &io::Error);

    /// A scheduled cycle failed; the scheduler keeps running
    fn cycle_failed(&self, err: &ExportError);
}

/// Forwards every event to the `log` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDiagnostics;

impl Diagnostics for LogDiagnostics {
    fn unsupported_metric(&self, name: &str, kind: &str) {
        warn!("Cannot export unknown metric type {} for '{}'", kind, name);
    }

    fn write_failed(&self, name: &str, err: &io::Error) {
        warn!("Failed to write metric '{}': {}", name, err);
    }

    fn cycle_failed(&self, err: &ExportError) {
        error!("Export cycle failed: {}", err);
    }
}

/// A diagnostic event captured by [`RecordingDiagnostics`]
#[derive(Debug, Clone, PartialEq)]
pub enum DiagnosticEvent {
    UnsupportedMetric { name: String, kind: String },
    WriteFailed { name: String, message: String },
    CycleFailed { message: String },
}

/// Keeps every event in memory, for hosts that want to inspect them
#[derive(Debug, Default)]
pub struct RecordingDiagnostics {
    events: Mutex<Vec<DiagnosticEvent>>,
}

impl RecordingDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the events recorded so far
    pub fn events(&self) -> Vec<DiagnosticEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Remove and return the events recorded so far
    pub fn take(&self) -> Vec<DiagnosticEvent> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn push(&self, event: DiagnosticEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

impl Diagnostics for RecordingDiagnostics {
    fn unsupported_metric(&self, name: &str, kind: &str) {
        self.push(DiagnosticEvent::UnsupportedMetric {
            name: name.to_string(),
            kind: kind.to_string(),
        });
    }

    fn write_failed(&self, name: &str, err: &io::Error) {
        self.push(DiagnosticEvent::WriteFailed {
            name: name.to_string(),
            message: err.to_string(),
        });
    }

    fn cycle_failed(&self, err: &ExportError) {
        self.push(DiagnosticEvent::CycleFailed {
            message: err.to_string(),
        });
    }
}
