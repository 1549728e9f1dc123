// Pushes a handful of live metrics to a Graphite server until interrupted

use anyhow::Result;
use clap::Parser;
use graphite_push::config::LogLevel;
use graphite_push::prelude::*;
use graphite_push::registry::memory::TICK_INTERVAL;
use graphite_push::util::logging;
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Command line arguments for the push demo
#[derive(Parser, Debug)]
#[command(name = "push", about = "Push demo metrics to a Graphite server")]
struct Args {
    /// Path to a TOML settings file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Graphite server, overrides the settings file
    #[arg(short, long)]
    address: Option<String>,

    /// Export once and exit instead of running on an interval
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut sources = SettingsBuilder::new().use_defaults();
    if let Some(path) = &args.config {
        sources = sources.add_file(path);
    }
    sources = sources.add_env("GRAPHITE");
    if let Some(address) = &args.address {
        sources = sources.add_toml(format!("address = {:?}", address));
    }

    let settings = match sources.build() {
        Ok(settings) => {
            logging::init(&settings.log_level);
            settings
        }
        Err(e) => {
            logging::init(&LogLevel::Error);
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    let registry = Arc::new(MemoryRegistry::new());
    let requests = StdCounter::new();
    let queue_depth = StdGauge::new();
    let load = StdGaugeFloat::new();
    let payload = SampleHistogram::new();
    let logins = StdMeter::new();
    let latency = StdTimer::new();

    registry.register("requests", Metric::Counter(requests.clone()));
    registry.register("queue_depth", Metric::Gauge(queue_depth.clone()));
    registry.register("load", Metric::GaugeFloat(load.clone()));
    registry.register("payload", Metric::Histogram(payload.clone()));
    registry.register("logins", Metric::Meter(logins.clone()));
    registry.register("latency", Metric::Timer(latency.clone()));

    // Simulated workload
    tokio::spawn(async move {
        let mut step: i64 = 0;
        let mut ticker = tokio::time::interval(Duration::from_millis(100));
        loop {
            ticker.tick().await;
            step += 1;
            requests.inc(1);
            queue_depth.update(step % 17);
            load.update((step % 100) as f64 / 100.0);
            payload.update(512 + (step * 37) % 4096);
            if step % 3 == 0 {
                logins.mark(1);
            }
            latency.update(Duration::from_micros(200 + ((step * 131) % 5000) as u64));
            if step % (TICK_INTERVAL.as_millis() as i64 / 100) == 0 {
                logins.tick();
                latency.tick();
            }
        }
    });

    let config = ExportConfig::from_settings(&settings, registry).await?;
    let exporter = Exporter::new(config);

    if args.once {
        let report = exporter.run_once().await?;
        info!("Wrote {} lines for {} metrics", report.lines, report.metrics);
        return Ok(());
    }

    let handle = exporter.spawn();
    tokio::signal::ctrl_c().await?;
    info!("Received interrupt signal, shutting down...");
    handle.stop().await;

    Ok(())
}
