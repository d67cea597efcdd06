//! Configuration file loading and validation.
//!
//! Configuration is a TOML file. Every key is optional; a missing file yields
//! the defaults (Prometheus on port 8000 and a local SQLite database).
//!
//! ```toml
//! queue_size = 3
//! queue_empty_sleep = "10ms"
//! temp_range = { min = 32, max = 212 }
//!
//! [calibration.yellow]
//! temp_offset = -1
//! original_gravity = 1.050
//! name = "Pale Ale"
//!
//! [brewfather]
//! url = "https://log.brewfather.net/stream?id=abc"
//! temp_unit = "C"
//! period = "15m"
//! ```

use crate::queue::DEFAULT_QUEUE_SIZE;
use crate::rate_limit::{RateLimitError, RateLimiter, deserialize_duration};
use crate::reading::{CalibrationProfile, ValidRange, ValidityGate};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default polling interval of the dispatch loop while the queue is empty.
pub const DEFAULT_QUEUE_EMPTY_SLEEP: Duration = Duration::from_millis(10);

/// Default throttle for hosted brewing services: once per 15 minutes.
pub const DEFAULT_STREAM_PERIOD: Duration = Duration::from_secs(15 * 60);

/// Default throttle for the SQLite sink: once per minute per color.
pub const DEFAULT_SQLITE_PERIOD: Duration = Duration::from_secs(60);

/// Errors returned while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("invalid rate limit for [{section}]: {source}")]
    RateLimit {
        section: &'static str,
        #[source]
        source: RateLimitError,
    },
}

/// Temperature unit expected by a hosted service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum TempUnit {
    #[default]
    #[serde(rename = "F", alias = "f")]
    Fahrenheit,
    #[serde(rename = "C", alias = "c")]
    Celsius,
}

impl TempUnit {
    pub fn symbol(self) -> &'static str {
        match self {
            TempUnit::Fahrenheit => "F",
            TempUnit::Celsius => "C",
        }
    }
}

/// Top level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Capacity of the backpressure queue
    pub queue_size: usize,
    /// How long the dispatch loop waits on an empty queue before re-checking
    /// the shutdown signal and run timeout
    #[serde(deserialize_with = "deserialize_duration")]
    pub queue_empty_sleep: Duration,
    /// Valid temperature range in degrees Fahrenheit, both ends excluded
    pub temp_range: ValidRange,
    /// Valid specific gravity range, both ends excluded
    pub gravity_range: ValidRange,
    /// Calibration profiles keyed by color
    pub calibration: BTreeMap<String, CalibrationProfile>,
    pub prometheus: PrometheusConfig,
    pub influxdb: InfluxDbConfig,
    pub influxdb2: InfluxDb2Config,
    pub file: FileConfig,
    pub brewfather: StreamConfig,
    pub brewersfriend: BrewersFriendConfig,
    pub grainfather: GrainfatherConfig,
    pub taplistio: StreamConfig,
    pub sqlite: SqliteConfig,
    pub webhook: Vec<WebhookConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            queue_size: DEFAULT_QUEUE_SIZE,
            queue_empty_sleep: DEFAULT_QUEUE_EMPTY_SLEEP,
            temp_range: ValidityGate::DEFAULT_TEMP_RANGE,
            gravity_range: ValidityGate::DEFAULT_GRAVITY_RANGE,
            calibration: BTreeMap::new(),
            prometheus: PrometheusConfig::default(),
            influxdb: InfluxDbConfig::default(),
            influxdb2: InfluxDb2Config::default(),
            file: FileConfig::default(),
            brewfather: StreamConfig::default(),
            brewersfriend: BrewersFriendConfig::default(),
            grainfather: GrainfatherConfig::default(),
            taplistio: StreamConfig::default(),
            sqlite: SqliteConfig::default(),
            webhook: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PrometheusConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8000,
        }
    }
}

/// InfluxDB 1.x, enabled when `url` is set.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InfluxDbConfig {
    pub url: Option<String>,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub batch_size: usize,
    #[serde(deserialize_with = "deserialize_duration")]
    pub timeout: Duration,
}

impl Default for InfluxDbConfig {
    fn default() -> Self {
        Self {
            url: None,
            database: "tilt".to_string(),
            username: None,
            password: None,
            batch_size: 10,
            timeout: Duration::from_secs(5),
        }
    }
}

/// InfluxDB 2.x, enabled when `url` is set.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InfluxDb2Config {
    pub url: Option<String>,
    pub org: String,
    pub bucket: String,
    pub token: Option<String>,
    pub batch_size: usize,
    #[serde(deserialize_with = "deserialize_duration")]
    pub timeout: Duration,
}

impl Default for InfluxDb2Config {
    fn default() -> Self {
        Self {
            url: None,
            org: String::new(),
            bucket: "tilt".to_string(),
            token: None,
            batch_size: 10,
            timeout: Duration::from_secs(5),
        }
    }
}

/// JSON lines log file, enabled when `path` is set.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub path: Option<PathBuf>,
    pub max_mb: u64,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_mb: 10,
        }
    }
}

/// A hosted service reached through a single URL (Brewfather, Taplist.io).
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StreamConfig {
    pub url: Option<String>,
    pub temp_unit: TempUnit,
    pub rate: f64,
    #[serde(deserialize_with = "deserialize_duration")]
    pub period: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: None,
            temp_unit: TempUnit::default(),
            rate: 1.0,
            period: DEFAULT_STREAM_PERIOD,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BrewersFriendConfig {
    pub api_key: Option<String>,
    pub temp_unit: TempUnit,
    pub rate: f64,
    #[serde(deserialize_with = "deserialize_duration")]
    pub period: Duration,
}

impl Default for BrewersFriendConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            temp_unit: TempUnit::default(),
            rate: 1.0,
            period: DEFAULT_STREAM_PERIOD,
        }
    }
}

/// Grainfather assigns one URL per fermenter, keyed here by color.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GrainfatherConfig {
    pub urls: BTreeMap<String, String>,
    pub temp_unit: TempUnit,
    pub rate: f64,
    #[serde(deserialize_with = "deserialize_duration")]
    pub period: Duration,
}

impl Default for GrainfatherConfig {
    fn default() -> Self {
        Self {
            urls: BTreeMap::new(),
            temp_unit: TempUnit::default(),
            rate: 1.0,
            period: DEFAULT_STREAM_PERIOD,
        }
    }
}

/// Local SQLite database, on unless `enabled = false`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SqliteConfig {
    pub enabled: bool,
    pub path: PathBuf,
    pub rate: f64,
    #[serde(deserialize_with = "deserialize_duration")]
    pub period: Duration,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from("tilt-relay.db"),
            rate: 1.0,
            period: DEFAULT_SQLITE_PERIOD,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WebhookConfig {
    pub url: String,
}

impl Config {
    /// Load configuration from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(text) => text.parse(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No configuration file, using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_size == 0 {
            return Err(ConfigError::Invalid("queue_size must be at least 1".into()));
        }
        check_range("temp_range", &self.temp_range)?;
        check_range("gravity_range", &self.gravity_range)?;
        if self.influxdb.batch_size == 0 || self.influxdb2.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be at least 1".into()));
        }
        check_rate("brewfather", self.brewfather.rate, self.brewfather.period)?;
        check_rate(
            "brewersfriend",
            self.brewersfriend.rate,
            self.brewersfriend.period,
        )?;
        check_rate("grainfather", self.grainfather.rate, self.grainfather.period)?;
        check_rate("taplistio", self.taplistio.rate, self.taplistio.period)?;
        check_rate("sqlite", self.sqlite.rate, self.sqlite.period)?;
        Ok(())
    }

    /// Normalize user input: calibration and Grainfather colors are matched
    /// in lowercase.
    fn normalized(mut self) -> Self {
        self.calibration = std::mem::take(&mut self.calibration)
            .into_iter()
            .map(|(color, profile)| (color.to_lowercase(), profile))
            .collect();
        self.grainfather.urls = std::mem::take(&mut self.grainfather.urls)
            .into_iter()
            .map(|(color, url)| (color.to_lowercase(), url))
            .collect();
        self
    }

    /// The validity gate built from the configured ranges.
    pub fn validity_gate(&self) -> ValidityGate {
        ValidityGate::new(self.temp_range, self.gravity_range)
    }
}

impl std::str::FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: Config = toml::from_str(s)?;
        let config = config.normalized();
        config.validate()?;
        Ok(config)
    }
}

fn check_range(name: &str, range: &ValidRange) -> Result<(), ConfigError> {
    if range.min < range.max {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "{name}: min ({}) must be below max ({})",
            range.min, range.max
        )))
    }
}

fn check_rate(section: &'static str, rate: f64, period: Duration) -> Result<(), ConfigError> {
    RateLimiter::new(rate, period)
        .map(|_| ())
        .map_err(|source| ConfigError::RateLimit { section, source })
}
