use log::{debug, error, info};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::ExportConfig;
use crate::diagnostics::{Diagnostics, LogDiagnostics};
use crate::error::Result;
use crate::exporter::{run_once_with, CycleReport, Dialer, TcpDialer};
use crate::registry::Registry;

/// Pushes a registry to Graphite on a fixed interval.
///
/// Cycles run one after another on the exporter's task and never overlap.
/// A tick that comes due while a cycle is still running is skipped.
pub struct Exporter<D: Dialer = TcpDialer> {
    config: Arc<ExportConfig>,
    diagnostics: Arc<dyn Diagnostics>,
    dialer: Arc<D>,
}

impl Exporter<TcpDialer> {
    /// Exporter over TCP that reports to the `log` facade
    pub fn new(config: ExportConfig) -> Self {
        Self {
            config: Arc::new(config),
            diagnostics: Arc::new(LogDiagnostics),
            dialer: Arc::new(TcpDialer),
        }
    }
}

impl<D: Dialer> Exporter<D> {
    /// Replace the diagnostics sink
    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn Diagnostics>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Replace the transport
    pub fn with_dialer<T: Dialer>(self, dialer: T) -> Exporter<T> {
        Exporter {
            config: self.config,
            diagnostics: self.diagnostics,
            dialer: Arc::new(dialer),
        }
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    /// Run a single cycle, for callers with their own scheduling or retries
    pub async fn run_once(&self) -> Result<CycleReport> {
        run_once_with(self.dialer.as_ref(), &self.config, self.diagnostics.as_ref()).await
    }

    /// Export every flush interval, forever.
    ///
    /// Only returns early if the configuration is invalid.
    pub async fn run_forever(&self) -> Result<()> {
        self.run_until_cancelled(CancellationToken::new()).await
    }

    /// Export every flush interval until `token` is cancelled.
    ///
    /// A cycle in progress is allowed to finish before the loop stops.
    pub async fn run_until_cancelled(&self, token: CancellationToken) -> Result<()> {
        self.config.validate()?;

        let period = self.config.flush_interval;
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "Exporting metrics to {} every {:?}",
            self.config.addr, period
        );

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.run_once().await {
                Ok(report) => debug!(
                    "Cycle at {} wrote {} lines",
                    report.timestamp, report.lines
                ),
                Err(e) => self.diagnostics.cycle_failed(&e),
            }
        }

        info!("Stopped exporting metrics to {}", self.config.addr);
        Ok(())
    }

    /// Run the export loop on a new task
    pub fn spawn(self) -> ExporterHandle {
        let token = CancellationToken::new();
        let child = token.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = self.run_until_cancelled(child).await {
                error!("Exporter did not start: {}", e);
            }
        });
        ExporterHandle { token, task }
    }
}

impl<D: Dialer> Clone for Exporter<D> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            diagnostics: Arc::clone(&self.diagnostics),
            dialer: Arc::clone(&self.dialer),
        }
    }
}

/// Handle to a spawned export loop
#[derive(Debug)]
pub struct ExporterHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl ExporterHandle {
    /// Token that stops the loop when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the loop and wait for the current cycle to finish
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            error!("Exporter task failed: {}", e);
        }
    }
}

/// Export `registry` to `addr` every `flush_interval`, prefixing names with
/// `prefix`. Durations are exported in nanoseconds with the default
/// percentiles.
pub async fn graphite(
    registry: Arc<dyn Registry>,
    flush_interval: Duration,
    prefix: &str,
    addr: SocketAddr,
) -> Result<()> {
    graphite_with_config(ExportConfig::new(addr, registry, flush_interval, prefix)).await
}

/// Like [`graphite`], with full control over the configuration
pub async fn graphite_with_config(config: ExportConfig) -> Result<()> {
    Exporter::new(config).run_forever().await
}

/// One cycle with the default diagnostics, returning any connection error
pub async fn graphite_once(config: &ExportConfig) -> Result<CycleReport> {
    crate::exporter::run_once(config, &LogDiagnostics).await
}
