use log::{debug, warn};
use serde::Deserialize;
use std::fmt::{self, Debug};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ExportError, Result};
use crate::registry::Registry;

/// Percentiles exported when none are configured
pub const DEFAULT_PERCENTILES: [f64; 5] = [0.5, 0.75, 0.95, 0.99, 0.999];

/// Flush interval used when none is configured
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(60);

/// Field suffixes written after the metric name
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct FieldNames {
    pub count: String,
    pub value: String,
    pub min: String,
    pub max: String,
    pub mean: String,
    pub std_dev: String,
    pub rate1: String,
    pub rate5: String,
    pub rate15: String,
    pub rate_mean: String,
}

impl Default for FieldNames {
    fn default() -> Self {
        Self {
            count: "count".to_string(),
            value: "value".to_string(),
            min: "min".to_string(),
            max: "max".to_string(),
            mean: "mean".to_string(),
            std_dev: "stddev".to_string(),
            rate1: "rate-1min".to_string(),
            rate5: "rate-5min".to_string(),
            rate15: "rate-15min".to_string(),
            rate_mean: "mean-rate".to_string(),
        }
    }
}

/// Unit timer durations are converted to before export
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DurationUnit {
    #[default]
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
}

impl DurationUnit {
    pub fn as_duration(self) -> Duration {
        match self {
            DurationUnit::Nanoseconds => Duration::from_nanos(1),
            DurationUnit::Microseconds => Duration::from_micros(1),
            DurationUnit::Milliseconds => Duration::from_millis(1),
            DurationUnit::Seconds => Duration::from_secs(1),
        }
    }
}

/// What a cycle does when writing to the connection fails
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Default)]
#[serde(rename_all = "snake_case")]
pub enum WritePolicy {
    /// Abort the cycle on the first write or flush error and return it
    #[default]
    FailFast,
    /// Report write errors as diagnostics and keep writing
    BestEffort,
}

/// Logging level
#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Error level
    Error,
    /// Warning level
    Warn,
    /// Info level
    #[default]
    Info,
    /// Debug level
    Debug,
    /// Trace level
    Trace,
}

/// Runtime configuration of an exporter.
///
/// Shared by every cycle of a scheduler run and never modified by it.
#[derive(Clone)]
pub struct ExportConfig {
    /// Graphite server to connect to
    pub addr: SocketAddr,
    /// Registry to export
    pub registry: Arc<dyn Registry>,
    /// Time between cycles
    pub flush_interval: Duration,
    /// Divisor applied to timer durations
    pub duration_unit: Duration,
    /// Prepended to every metric name
    pub prefix: String,
    /// Percentiles exported from histograms and timers
    pub percentiles: Vec<f64>,
    /// Field suffixes
    pub field_names: FieldNames,
    /// Behaviour on write errors
    pub write_policy: WritePolicy,
}

impl ExportConfig {
    /// Configuration with nanosecond durations and the default percentiles
    pub fn new(
        addr: SocketAddr,
        registry: Arc<dyn Registry>,
        flush_interval: Duration,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            addr,
            registry,
            flush_interval,
            duration_unit: DurationUnit::Nanoseconds.as_duration(),
            prefix: prefix.into(),
            percentiles: DEFAULT_PERCENTILES.to_vec(),
            field_names: FieldNames::default(),
            write_policy: WritePolicy::default(),
        }
    }

    /// Start building a configuration
    pub fn builder(addr: SocketAddr, registry: Arc<dyn Registry>) -> ExportConfigBuilder {
        ExportConfigBuilder::new(addr, registry)
    }

    /// Resolve loaded settings into a runtime configuration
    pub async fn from_settings(
        settings: &ExporterSettings,
        registry: Arc<dyn Registry>,
    ) -> Result<Self> {
        let addr = tokio::net::lookup_host(settings.address.as_str())
            .await
            .map_err(|e| ExportError::Resolve(format!("{}: {}", settings.address, e)))?
            .next()
            .ok_or_else(|| ExportError::Resolve(format!("{}: no addresses", settings.address)))?;
        debug!("Resolved {} to {}", settings.address, addr);

        ExportConfigBuilder::new(addr, registry)
            .flush_interval(Duration::from_secs(settings.flush_interval))
            .duration_unit(settings.duration_unit.as_duration())
            .prefix(settings.prefix.clone())
            .percentiles(settings.percentiles.clone())
            .field_names(settings.field_names.clone())
            .write_policy(settings.write_policy)
            .build()
    }

    /// Integer divisor for timer durations, in nanoseconds
    pub fn duration_divisor(&self) -> i64 {
        i64::try_from(self.duration_unit.as_nanos()).unwrap_or(i64::MAX)
    }

    /// Check the values a cycle relies on
    pub fn validate(&self) -> Result<()> {
        if self.flush_interval.is_zero() {
            return Err(ExportError::Config("flush interval must be non-zero".to_string()));
        }
        if self.duration_unit.is_zero() {
            return Err(ExportError::Config("duration unit must be non-zero".to_string()));
        }
        if let Some(p) = self
            .percentiles
            .iter()
            .find(|p| !(0.0..=1.0).contains(*p))
        {
            return Err(ExportError::Config(format!(
                "percentile {} is outside [0, 1]",
                p
            )));
        }
        Ok(())
    }
}

impl Debug for ExportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportConfig")
            .field("addr", &self.addr)
            .field("flush_interval", &self.flush_interval)
            .field("duration_unit", &self.duration_unit)
            .field("prefix", &self.prefix)
            .field("percentiles", &self.percentiles)
            .field("write_policy", &self.write_policy)
            .finish_non_exhaustive()
    }
}

/// Builder for export configuration
pub struct ExportConfigBuilder {
    config: ExportConfig,
}

impl ExportConfigBuilder {
    pub fn new(addr: SocketAddr, registry: Arc<dyn Registry>) -> Self {
        Self {
            config: ExportConfig::new(addr, registry, DEFAULT_FLUSH_INTERVAL, ""),
        }
    }

    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.config.flush_interval = interval;
        self
    }

    pub fn duration_unit(mut self, unit: Duration) -> Self {
        self.config.duration_unit = unit;
        self
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.prefix = prefix.into();
        self
    }

    pub fn percentiles(mut self, percentiles: impl Into<Vec<f64>>) -> Self {
        self.config.percentiles = percentiles.into();
        self
    }

    pub fn field_names(mut self, names: FieldNames) -> Self {
        self.config.field_names = names;
        self
    }

    pub fn write_policy(mut self, policy: WritePolicy) -> Self {
        self.config.write_policy = policy;
        self
    }

    /// Validate and build the configuration
    pub fn build(self) -> Result<ExportConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Exporter settings as read from files or the environment
#[derive(Debug, Deserialize, Clone)]
pub struct ExporterSettings {
    /// Graphite server as `host:port`
    pub address: String,
    /// Flush interval in seconds
    #[serde(default = "default_flush_interval")]
    pub flush_interval: u64,
    #[serde(default)]
    pub duration_unit: DurationUnit,
    #[serde(default)]
    pub prefix: String,
    #[serde(default = "default_percentiles")]
    pub percentiles: Vec<f64>,
    #[serde(default)]
    pub field_names: FieldNames,
    #[serde(default)]
    pub write_policy: WritePolicy,
    #[serde(default)]
    pub log_level: LogLevel,
}

fn default_flush_interval() -> u64 {
    DEFAULT_FLUSH_INTERVAL.as_secs()
}

fn default_percentiles() -> Vec<f64> {
    DEFAULT_PERCENTILES.to_vec()
}

/// Source of settings
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// File path (TOML format)
    File(PathBuf),
    /// Environment variables with a prefix
    Environment(String),
    /// TOML string
    Toml(String),
    /// Default configuration
    Defaults,
}

/// Load settings from the given sources, later sources overriding earlier ones
pub fn load_settings(sources: Vec<ConfigSource>) -> Result<ExporterSettings> {
    let mut builder = config::Config::builder();

    for source in sources {
        match source {
            ConfigSource::File(path) => {
                if !path.exists() {
                    warn!("Configuration file not found: {}", path.display());
                    continue;
                }

                debug!("Loading TOML configuration from file: {}", path.display());
                builder = builder.add_source(
                    config::File::from(path.as_path()).format(config::FileFormat::Toml),
                );
            }
            ConfigSource::Environment(prefix) => {
                debug!("Loading configuration from environment with prefix: {}", prefix);
                builder = builder.add_source(
                    config::Environment::with_prefix(&prefix)
                        .prefix_separator("_")
                        .separator("__")
                        .try_parsing(true),
                );
            }
            ConfigSource::Toml(toml_str) => {
                debug!("Loading configuration from TOML string");
                builder = builder
                    .add_source(config::File::from_str(&toml_str, config::FileFormat::Toml));
            }
            ConfigSource::Defaults => {
                debug!("Using default configuration values");
            }
        }
    }

    let config = builder
        .build()
        .map_err(|e| ExportError::Config(format!("Failed to build configuration: {}", e)))?;

    let settings: ExporterSettings = config
        .try_deserialize()
        .map_err(|e| ExportError::Config(format!("Failed to deserialize configuration: {}", e)))?;

    debug!("Configuration loaded successfully: {:?}", settings);

    Ok(settings)
}

/// Settings builder
#[derive(Default)]
pub struct SettingsBuilder {
    sources: Vec<ConfigSource>,
}

impl SettingsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a TOML file source
    pub fn add_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.sources.push(ConfigSource::File(path.as_ref().to_path_buf()));
        self
    }

    /// Add environment variables
    pub fn add_env(mut self, prefix: impl Into<String>) -> Self {
        self.sources.push(ConfigSource::Environment(prefix.into()));
        self
    }

    /// Add TOML string
    pub fn add_toml(mut self, toml: impl Into<String>) -> Self {
        self.sources.push(ConfigSource::Toml(toml.into()));
        self
    }

    /// Use default values
    pub fn use_defaults(mut self) -> Self {
        self.sources.push(ConfigSource::Defaults);
        self
    }

    pub fn build(self) -> Result<ExporterSettings> {
        load_settings(self.sources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MemoryRegistry;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn registry() -> Arc<dyn Registry> {
        Arc::new(MemoryRegistry::new())
    }

    fn local() -> SocketAddr {
        "127.0.0.1:2003".parse().unwrap()
    }

    #[test]
    fn test_new_uses_defaults() {
        let config = ExportConfig::new(local(), registry(), Duration::from_secs(10), "app");
        assert_eq!(config.duration_unit, Duration::from_nanos(1));
        assert_eq!(config.percentiles, vec![0.5, 0.75, 0.95, 0.99, 0.999]);
        assert_eq!(config.write_policy, WritePolicy::FailFast);
        assert_eq!(config.duration_divisor(), 1);
    }

    #[test]
    fn test_builder_rejects_bad_values() {
        let err = ExportConfig::builder(local(), registry())
            .percentiles(vec![0.5, 1.5])
            .build()
            .unwrap_err();
        assert!(matches!(err, ExportError::Config(_)));

        assert!(ExportConfig::builder(local(), registry())
            .duration_unit(Duration::ZERO)
            .build()
            .is_err());

        assert!(ExportConfig::builder(local(), registry())
            .flush_interval(Duration::ZERO)
            .build()
            .is_err());

        assert!(ExportConfig::builder(local(), registry())
            .percentiles(vec![f64::NAN])
            .build()
            .is_err());
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            address = "127.0.0.1:2003"
            flush_interval = 5
            duration_unit = "milliseconds"
            prefix = "web"
            percentiles = [0.5, 0.99]
            write_policy = "best_effort"
            log_level = "debug"
        "#
        )
        .unwrap();

        let settings = SettingsBuilder::new().add_file(file.path()).build().unwrap();
        assert_eq!(settings.address, "127.0.0.1:2003");
        assert_eq!(settings.flush_interval, 5);
        assert_eq!(settings.duration_unit, DurationUnit::Milliseconds);
        assert_eq!(settings.prefix, "web");
        assert_eq!(settings.percentiles, vec![0.5, 0.99]);
        assert_eq!(settings.write_policy, WritePolicy::BestEffort);
        assert_eq!(settings.log_level, LogLevel::Debug);
    }

    #[test]
    fn test_defaults_and_overrides() {
        let settings = SettingsBuilder::new()
            .use_defaults()
            .add_toml(r#"address = "localhost:2003""#)
            .add_toml(
                r#"
                prefix = "second"
                [field_names]
                std_dev = "std-dev"
                "#,
            )
            .build()
            .unwrap();

        assert_eq!(settings.address, "localhost:2003");
        assert_eq!(settings.prefix, "second");
        assert_eq!(settings.flush_interval, 60);
        assert_eq!(settings.duration_unit, DurationUnit::Nanoseconds);
        assert_eq!(settings.percentiles, DEFAULT_PERCENTILES.to_vec());
        assert_eq!(settings.field_names.std_dev, "std-dev");
        assert_eq!(settings.field_names.count, "count");
    }

    #[test]
    fn test_missing_address_is_config_error() {
        let err = SettingsBuilder::new().add_toml("prefix = \"x\"").build().unwrap_err();
        assert!(matches!(err, ExportError::Config(_)));
    }

    #[tokio::test]
    async fn test_from_settings_resolves_address() {
        let settings = SettingsBuilder::new()
            .add_toml(
                r#"
                address = "127.0.0.1:2003"
                duration_unit = "milliseconds"
                prefix = "svc"
                "#,
            )
            .build()
            .unwrap();

        let config = ExportConfig::from_settings(&settings, registry()).await.unwrap();
        assert_eq!(config.addr, local());
        assert_eq!(config.duration_divisor(), 1_000_000);
        assert_eq!(config.prefix, "svc");
    }
}
