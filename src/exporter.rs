//! A single export cycle: connect, drain the registry, disconnect
use async_trait::async_trait;
use chrono::Utc;
use log::{debug, trace};
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;

use crate::config::{ExportConfig, WritePolicy};
use crate::diagnostics::Diagnostics;
use crate::error::{ExportError, Result};
use crate::format::write_fields;
use crate::registry::Metric;
use crate::snapshot::Snapshotter;

/// Opens the connection a cycle writes to
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    /// The connection type
    type Stream: AsyncWrite + Unpin + Send;

    /// Open a new connection to `addr`
    async fn dial(&self, addr: SocketAddr) -> io::Result<Self::Stream>;
}

/// Plain TCP, one fresh connection per cycle
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpDialer;

#[async_trait]
impl Dialer for TcpDialer {
    type Stream = TcpStream;

    async fn dial(&self, addr: SocketAddr) -> io::Result<TcpStream> {
        TcpStream::connect(addr).await
    }
}

/// Outcome of a completed cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CycleReport {
    /// Unix timestamp carried by every line of the cycle
    pub timestamp: i64,
    /// Metrics whose lines were written
    pub metrics: usize,
    /// Lines written
    pub lines: usize,
    /// Metrics of an unknown kind
    pub skipped: usize,
    /// Metrics lost to write errors under [`WritePolicy::BestEffort`]
    pub failed: usize,
}

/// Run one cycle over TCP.
///
/// The only way this fails under [`WritePolicy::BestEffort`] is a
/// connection error, in which case nothing was written.
pub async fn run_once(config: &ExportConfig, diagnostics: &dyn Diagnostics) -> Result<CycleReport> {
    run_once_with(&TcpDialer, config, diagnostics).await
}

/// Run one cycle over a connection opened by `dialer`
pub async fn run_once_with<D: Dialer>(
    dialer: &D,
    config: &ExportConfig,
    diagnostics: &dyn Diagnostics,
) -> Result<CycleReport> {
    let now = Utc::now().timestamp();

    let stream = dialer
        .dial(config.addr)
        .await
        .map_err(|e| ExportError::connect(config.addr, e))?;
    trace!("Connected to {}", config.addr);

    // Dropping the writer closes the connection on every return path
    let mut writer = BufWriter::new(stream);
    let report = write_registry(&mut writer, config, now, diagnostics).await?;

    if let Err(e) = writer.shutdown().await {
        match config.write_policy {
            WritePolicy::FailFast => return Err(ExportError::Write(e)),
            WritePolicy::BestEffort => debug!("Failed to close connection to {}: {}", config.addr, e),
        }
    }

    debug!(
        "Exported {} metrics ({} lines, {} skipped, {} failed) to {}",
        report.metrics, report.lines, report.skipped, report.failed, config.addr
    );
    Ok(report)
}

/// Write every metric of the registry to `writer`, stamped with `now`.
///
/// Output is flushed after each metric. Metrics of an unknown kind are
/// reported to `diagnostics` and skipped.
pub async fn write_registry<W>(
    writer: &mut W,
    config: &ExportConfig,
    now: i64,
    diagnostics: &dyn Diagnostics,
) -> Result<CycleReport>
where
    W: AsyncWrite + Unpin,
{
    let mut entries: Vec<(String, Metric)> = Vec::new();
    config
        .registry
        .each(&mut |name, metric| entries.push((name.to_string(), metric.clone())));

    let snapshotter = Snapshotter::new(config);
    let mut report = CycleReport {
        timestamp: now,
        ..CycleReport::default()
    };
    let mut buf = String::new();

    for (name, metric) in &entries {
        let Some(fields) = snapshotter.fields(metric) else {
            diagnostics.unsupported_metric(name, metric.kind());
            report.skipped += 1;
            continue;
        };

        buf.clear();
        write_fields(&mut buf, &config.prefix, name, &fields, now);
        trace!("Writing {} lines for '{}'", fields.len(), name);

        match write_flush(writer, buf.as_bytes()).await {
            Ok(()) => {
                report.metrics += 1;
                report.lines += fields.len();
            }
            Err(e) => match config.write_policy {
                WritePolicy::FailFast => return Err(ExportError::Write(e)),
                WritePolicy::BestEffort => {
                    diagnostics.write_failed(name, &e);
                    report.failed += 1;
                }
            },
        }
    }

    Ok(report)
}

async fn write_flush<W: AsyncWrite + Unpin>(writer: &mut W, bytes: &[u8]) -> io::Result<()> {
    writer.write_all(bytes).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{DiagnosticEvent, RecordingDiagnostics};
    use crate::registry::{MemoryRegistry, StdCounter, StdGaugeFloat};
    use std::pin::Pin;
    use std::sync::Arc;
    use std::task::{Context, Poll};
    use std::time::Duration;

    /// Accepts `budget` writes, then fails every write
    struct BrokenPipe {
        budget: usize,
        written: Vec<u8>,
    }

    impl AsyncWrite for BrokenPipe {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            if self.budget == 0 {
                return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed")));
            }
            self.budget -= 1;
            self.written.extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    fn config(registry: Arc<MemoryRegistry>, policy: WritePolicy) -> ExportConfig {
        ExportConfig::builder("127.0.0.1:2003".parse().unwrap(), registry)
            .flush_interval(Duration::from_secs(1))
            .prefix("app")
            .write_policy(policy)
            .build()
            .unwrap()
    }

    fn three_counters() -> Arc<MemoryRegistry> {
        let registry = Arc::new(MemoryRegistry::new());
        for (name, n) in [("a", 1), ("b", 2), ("c", 3)] {
            let counter = StdCounter::new();
            counter.inc(n);
            registry.register(name, Metric::Counter(counter));
        }
        registry
    }

    #[tokio::test]
    async fn test_counter_scenario() {
        let registry = Arc::new(MemoryRegistry::new());
        let counter = StdCounter::new();
        counter.inc(42);
        registry.register("requests", Metric::Counter(counter));

        let config = config(registry, WritePolicy::FailFast);
        let diagnostics = RecordingDiagnostics::new();
        let mut out = Vec::new();
        let report = write_registry(&mut out, &config, 1_700_000_000, &diagnostics)
            .await
            .unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "app.requests.count 42 1700000000\n"
        );
        assert_eq!(report.metrics, 1);
        assert_eq!(report.lines, 1);
        assert!(diagnostics.events().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_metric_is_skipped() {
        let registry = Arc::new(MemoryRegistry::new());
        let gauge = StdGaugeFloat::new();
        gauge.update(0.75);
        registry.register("load", Metric::GaugeFloat(gauge));
        registry.register("mystery", Metric::Other("custom::Sketch"));
        registry.register("zeta", Metric::Counter(StdCounter::new()));

        let config = config(registry, WritePolicy::FailFast);
        let diagnostics = RecordingDiagnostics::new();
        let mut out = Vec::new();
        let report = write_registry(&mut out, &config, 5, &diagnostics).await.unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "app.load.value 0.75 5\napp.zeta.count 0 5\n"
        );
        assert_eq!(report.skipped, 1);
        assert_eq!(report.metrics, 2);
        assert_eq!(
            diagnostics.events(),
            vec![DiagnosticEvent::UnsupportedMetric {
                name: "mystery".to_string(),
                kind: "custom::Sketch".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_fail_fast_stops_at_first_write_error() {
        let config = config(three_counters(), WritePolicy::FailFast);
        let diagnostics = RecordingDiagnostics::new();
        let mut pipe = BrokenPipe {
            budget: 1,
            written: Vec::new(),
        };

        let err = write_registry(&mut pipe, &config, 9, &diagnostics)
            .await
            .unwrap_err();

        assert!(matches!(err, ExportError::Write(_)));
        assert_eq!(String::from_utf8(pipe.written).unwrap(), "app.a.count 1 9\n");
        assert!(diagnostics.events().is_empty());
    }

    #[tokio::test]
    async fn test_best_effort_keeps_going() {
        let config = config(three_counters(), WritePolicy::BestEffort);
        let diagnostics = RecordingDiagnostics::new();
        let mut pipe = BrokenPipe {
            budget: 1,
            written: Vec::new(),
        };

        let report = write_registry(&mut pipe, &config, 9, &diagnostics)
            .await
            .unwrap();

        assert_eq!(report.metrics, 1);
        assert_eq!(report.failed, 2);
        let failed: Vec<_> = diagnostics
            .events()
            .into_iter()
            .filter_map(|e| match e {
                DiagnosticEvent::WriteFailed { name, .. } => Some(name),
                _ => None,
            })
            .collect();
        assert_eq!(failed, vec!["b".to_string(), "c".to_string()]);
    }

    #[tokio::test]
    async fn test_unreachable_address_fails_before_writing() {
        // Bind then drop to get a port nothing listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut config = config(three_counters(), WritePolicy::FailFast);
        config.addr = addr;
        let diagnostics = RecordingDiagnostics::new();

        let err = run_once(&config, &diagnostics).await.unwrap_err();
        assert!(err.is_connect());
        assert!(diagnostics.events().is_empty());
    }
}
