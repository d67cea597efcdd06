//! Core application runner for `tilt-relay`.
//!
//! This module is decoupled from process setup (logging, signals, exit codes)
//! so the whole pipeline can be driven in tests with an injected scanner and
//! injected sinks.

use crate::config::{Config, ConfigError};
use crate::dispatch::{DispatchStats, Dispatcher, StopReason};
use crate::logging::LogFormat;
use crate::pipeline::Pipeline;
use crate::queue;
use crate::rate_limit::parse_duration;
use crate::registry::{DeviceAlias, DeviceRegistry, parse_device};
use crate::scanner::{Backend, ScanError};
use crate::sink::{self, CalibrationSink, Sink, SinkError};
use clap::Parser;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long calibration mode listens when no `--timeout` is given.
pub const CALIBRATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Command line options.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "tilt-relay.toml")]
    pub config: PathBuf,

    /// Generate readings from a simulated device instead of scanning
    #[arg(long)]
    pub simulate_beacons: bool,

    /// Bluetooth scanner backend to use
    #[arg(long, default_value_t, value_enum)]
    pub backend: Backend,

    /// Stop after the given time and flush queued readings.
    /// Accepts duration with suffix: 30s, 5m, 500ms, 2h.
    #[arg(long, value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Print calibration offsets for the device of this color instead of
    /// running the configured sinks
    #[arg(long, value_name = "COLOR")]
    pub calibrate: Option<String>,

    /// Reference temperature in Fahrenheit for --calibrate
    #[arg(long, default_value_t = 0.0)]
    pub actual_temp: f64,

    /// Reference specific gravity for --calibrate
    #[arg(long, default_value_t = 0.0)]
    pub actual_gravity: f64,

    /// Recognize an additional beacon.
    /// Format: --device a495bb99-c5b1-4b44-b512-1370f02d74de=spare
    #[arg(long = "device", value_parser = parse_device, value_name = "DEVICE")]
    pub devices: Vec<DeviceAlias>,

    /// Verbose output, log every reading and skipped frame
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Format of log output
    #[arg(long, default_value_t, value_enum)]
    pub log_format: LogFormat,
}

impl Options {
    /// The scan backend, honoring `--simulate-beacons`.
    pub fn scan_backend(&self) -> Backend {
        if self.simulate_beacons {
            Backend::Simulate
        } else {
            self.backend
        }
    }

    /// How long to run; calibration mode always stops on its own.
    pub fn run_timeout(&self) -> Option<Duration> {
        self.timeout
            .or_else(|| self.calibrate.as_ref().map(|_| CALIBRATION_TIMEOUT))
    }
}

/// Errors returned by the core run loop.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// What a finished run did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub reason: StopReason,
    /// Readings delivered while draining
    pub flushed: usize,
    pub stats: DispatchStats,
}

/// Scanner abstraction to enable deterministic unit tests without Bluetooth hardware.
pub trait Scanner: Send + Sync {
    fn start_scan(
        &self,
        backend: Backend,
        pipeline: Arc<Pipeline>,
        stop: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<JoinHandle<()>, ScanError>> + Send + '_>>;
}

/// Real scanner implementation that delegates to the compiled-in backends.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealScanner;

impl Scanner for RealScanner {
    fn start_scan(
        &self,
        backend: Backend,
        pipeline: Arc<Pipeline>,
        stop: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<JoinHandle<()>, ScanError>> + Send + '_>> {
        Box::pin(crate::scanner::start_scan(backend, pipeline, stop))
    }
}

/// The sinks for this run: only the calibration sink in calibration mode,
/// otherwise every provider built from the configuration.
pub fn sinks_for(options: &Options, config: &Config) -> Result<Vec<Box<dyn Sink>>, RunError> {
    match &options.calibrate {
        Some(color) => {
            let calibration: Box<dyn Sink> = Box::new(CalibrationSink::new(
                color,
                options.actual_temp,
                options.actual_gravity,
            )?);
            Ok(vec![calibration])
        }
        None => Ok(sink::build_sinks(config)?),
    }
}

/// Load the configuration named in `options` and run until `shutdown` is
/// cancelled or the run time elapses.
pub async fn run(options: Options, shutdown: CancellationToken) -> Result<RunSummary, RunError> {
    let config = Config::load(&options.config)?;
    let sinks = sinks_for(&options, &config)?;
    run_with(&options, &config, sinks, &RealScanner, &shutdown).await
}

/// Run the pipeline with the given sinks and scanner.
///
/// Sinks are started, then the scanner. When the dispatch loop stops, the
/// scanner is stopped first and the readings still queued are flushed.
pub async fn run_with(
    options: &Options,
    config: &Config,
    sinks: Vec<Box<dyn Sink>>,
    scanner: &dyn Scanner,
    shutdown: &CancellationToken,
) -> Result<RunSummary, RunError> {
    let registry = DeviceRegistry::tilt().with_devices(&options.devices);
    let (tx, rx) = queue::bounded(config.queue_size);
    let pipeline = Arc::new(Pipeline::new(
        registry,
        config.calibration.clone(),
        config.validity_gate(),
        tx,
    ));

    let mut dispatcher = Dispatcher::new(sinks, rx, config.queue_empty_sleep)
        .with_timeout(options.run_timeout())
        .with_console_log(options.calibrate.is_none());
    dispatcher.start().await;

    let backend = options.scan_backend();
    let stop_scan = shutdown.child_token();
    let scan = scanner.start_scan(backend, pipeline, stop_scan.clone()).await?;
    info!(%backend, queue_size = config.queue_size, "Scanning started");

    let reason = dispatcher.run(shutdown).await;
    info!(?reason, "Stopping");

    stop_scan.cancel();
    if let Err(e) = scan.await {
        warn!(error = %e, "Scan task ended abnormally");
    }
    let flushed = dispatcher.drain().await;

    Ok(RunSummary {
        reason,
        flushed,
        stats: dispatcher.stats(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beacon::BeaconId;
    use crate::config::FileConfig;
    use crate::sink::FileSink;
    use crate::test_utils::{Behavior, Deliveries, TestSink, YELLOW_ID, ibeacon_frame};
    use std::sync::Mutex;

    /// Pushes fixed frames into the pipeline, then goes away.
    #[derive(Debug)]
    struct FakeScanner {
        frames: Vec<Vec<u8>>,
    }

    impl FakeScanner {
        fn new(frames: Vec<Vec<u8>>) -> Self {
            Self { frames }
        }
    }

    impl Scanner for FakeScanner {
        fn start_scan(
            &self,
            _backend: Backend,
            pipeline: Arc<Pipeline>,
            _stop: CancellationToken,
        ) -> Pin<Box<dyn Future<Output = Result<JoinHandle<()>, ScanError>> + Send + '_>>
        {
            let frames = self.frames.clone();
            Box::pin(async move {
                Ok(tokio::spawn(async move {
                    for frame in frames {
                        pipeline.on_frame(&frame);
                    }
                    // dropping the pipeline closes the queue
                }))
            })
        }
    }

    /// Never produces anything and runs until stopped.
    struct IdleScanner;

    impl Scanner for IdleScanner {
        fn start_scan(
            &self,
            _backend: Backend,
            pipeline: Arc<Pipeline>,
            stop: CancellationToken,
        ) -> Pin<Box<dyn Future<Output = Result<JoinHandle<()>, ScanError>> + Send + '_>>
        {
            Box::pin(async move {
                Ok(tokio::spawn(async move {
                    stop.cancelled().await;
                    drop(pipeline);
                }))
            })
        }
    }

    fn options(args: &[&str]) -> Options {
        let mut argv = vec!["tilt-relay"];
        argv.extend_from_slice(args);
        Options::try_parse_from(argv).unwrap()
    }

    fn config(text: &str) -> Config {
        text.parse().unwrap()
    }

    #[test]
    fn test_options_parse() {
        let options = options(&[
            "--simulate-beacons",
            "--timeout",
            "30s",
            "--device",
            "a495bb99-c5b1-4b44-b512-1370f02d74de=Spare",
            "-v",
        ]);
        assert_eq!(options.config, PathBuf::from("tilt-relay.toml"));
        assert_eq!(options.scan_backend(), Backend::Simulate);
        assert_eq!(options.run_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(options.devices.len(), 1);
        assert_eq!(options.devices[0].name, "spare");
        assert!(options.verbose);
        assert_eq!(options.log_format, LogFormat::Compact);
    }

    #[test]
    fn test_calibration_mode_defaults_to_short_run() {
        let options = options(&["--calibrate", "red", "--actual-temp", "68"]);
        assert_eq!(options.run_timeout(), Some(CALIBRATION_TIMEOUT));

        let sinks = sinks_for(&options, &Config::default()).unwrap();
        let names: Vec<&str> = sinks.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["Calibration (red)"]);
    }

    #[test]
    fn test_calibration_requires_actual_values() {
        let options = options(&["--calibrate", "red"]);
        assert!(matches!(
            sinks_for(&options, &Config::default()),
            Err(RunError::Sink(SinkError::Setup(_)))
        ));
    }

    #[tokio::test]
    async fn test_end_to_end_frame_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tilt.json");
        let config = config(
            r#"
            [calibration.yellow]
            original_gravity = 1.050
            name = "Pale Ale"
        "#,
        );
        let sinks: Vec<Box<dyn Sink>> = vec![Box::new(FileSink::new(&FileConfig {
            path: Some(path.clone()),
            max_mb: 1,
        }))];
        let scanner = FakeScanner::new(vec![ibeacon_frame(YELLOW_ID, 70, 1035)]);

        let summary = run_with(
            &options(&[]),
            &config,
            sinks,
            &scanner,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(summary.reason, StopReason::SourceClosed);
        assert_eq!(summary.stats.delivered, 1);

        let line = std::fs::read_to_string(&path).unwrap();
        let reading: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(reading["color"], "yellow");
        assert_eq!(reading["name"], "Pale Ale");
        assert_eq!(reading["temp_fahrenheit"], 70.0);
        assert_eq!(reading["temp_celsius"], 21);
        assert_eq!(reading["gravity"], 1.035);
        assert_eq!(reading["alcohol_by_volume"], 1.97);
        assert_eq!(reading["temp_valid"], true);
        assert_eq!(reading["gravity_valid"], true);
    }

    #[tokio::test]
    async fn test_unknown_and_out_of_range_frames_are_not_dispatched() {
        let log: Deliveries = Arc::new(Mutex::new(Vec::new()));
        let sinks = vec![TestSink::new("A", Behavior::Record, &log).boxed()];
        let stranger: BeaconId = "a495bb99-c5b1-4b44-b512-1370f02d74de".parse().unwrap();
        let scanner = FakeScanner::new(vec![
            ibeacon_frame(stranger, 70, 1035),
            ibeacon_frame(YELLOW_ID, 250, 1035),
            vec![0x00; 4],
            ibeacon_frame(YELLOW_ID, 68, 1010),
        ]);

        let summary = run_with(
            &options(&[]),
            &config("queue_size = 10"),
            sinks,
            &scanner,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(summary.stats.received, 1);
        assert_eq!(
            log.lock().unwrap().clone(),
            vec![("A".to_string(), "yellow".to_string())]
        );
    }

    #[tokio::test]
    async fn test_device_option_extends_registry() {
        let log: Deliveries = Arc::new(Mutex::new(Vec::new()));
        let sinks = vec![TestSink::new("A", Behavior::Record, &log).boxed()];
        let spare: BeaconId = "a495bb99-c5b1-4b44-b512-1370f02d74de".parse().unwrap();
        let scanner = FakeScanner::new(vec![ibeacon_frame(spare, 70, 1035)]);

        run_with(
            &options(&["--device", "a495bb99-c5b1-4b44-b512-1370f02d74de=spare"]),
            &Config::default(),
            sinks,
            &scanner,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(
            log.lock().unwrap().clone(),
            vec![("A".to_string(), "spare".to_string())]
        );
    }

    #[tokio::test]
    async fn test_shutdown_stops_scanner_and_drains() {
        let log: Deliveries = Arc::new(Mutex::new(Vec::new()));
        let sinks = vec![TestSink::new("A", Behavior::Record, &log).boxed()];
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let summary = run_with(
            &options(&[]),
            &Config::default(),
            sinks,
            &IdleScanner,
            &shutdown,
        )
        .await
        .unwrap();

        assert_eq!(summary.reason, StopReason::Shutdown);
        assert_eq!(summary.flushed, 0);
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_run_until_timeout() {
        let log: Deliveries = Arc::new(Mutex::new(Vec::new()));
        let sinks = vec![TestSink::new("A", Behavior::Record, &log).boxed()];

        let summary = run_with(
            &options(&["--simulate-beacons", "--timeout", "2s"]),
            &Config::default(),
            sinks,
            &RealScanner,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(summary.reason, StopReason::Timeout);
        assert!(summary.stats.received >= 4);
        assert!(
            log.lock()
                .unwrap()
                .iter()
                .all(|(_, color)| color == "simulated")
        );
    }
}
