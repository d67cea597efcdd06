//! Destinations for dispatched readings.
//!
//! Every provider implements [`Sink`]. The set of providers is fixed: each one
//! is built explicitly from its configuration section by [`build_sinks`] and
//! reports through [`Sink::enabled`] whether that section is filled in.

pub mod calibration;
pub mod file;
pub mod influxdb;
pub mod prometheus;
pub mod sqlite;
pub mod stream;
pub mod webhook;

use crate::config::Config;
use crate::rate_limit::RateLimiter;
use crate::reading::Reading;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

pub use calibration::CalibrationSink;
pub use file::FileSink;
pub use influxdb::{InfluxDbSink, LineProtocolFormatter};
pub use prometheus::PrometheusSink;
pub use sqlite::SqliteSink;
pub use stream::{StreamService, StreamSink};
pub use webhook::WebhookSink;

/// Errors raised by sinks. The dispatch loop logs them and moves on.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("{0}")]
    Setup(String),
}

/// Boxed future returned by sink operations.
pub type SinkFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, SinkError>> + Send + 'a>>;

/// A destination for readings.
pub trait Sink: Send {
    /// Human readable identity used in logs, e.g. "Webhook (http://...)".
    fn name(&self) -> &str;

    /// Whether this sink participates at all.
    fn enabled(&self) -> bool {
        true
    }

    /// One-time setup before the dispatch loop begins. Only called for enabled
    /// sinks; may return a short status text for the startup log.
    fn start(&mut self) -> SinkFuture<'_, Option<String>> {
        Box::pin(async { Ok(None) })
    }

    /// Deliver one reading. Failures are returned, never swallowed.
    fn write<'a>(&'a mut self, reading: &'a Reading) -> SinkFuture<'a, ()>;

    /// The limiter the dispatch loop consults before each write, if any.
    fn limiter(&mut self) -> Option<&mut RateLimiter> {
        None
    }
}

/// Shared HTTP client builder for all network sinks.
pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, SinkError> {
    Ok(reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("tilt-relay/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Timeout applied to requests of sinks without their own setting.
pub(crate) const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Build every provider, in dispatch order, from the configuration.
///
/// Sinks whose section is empty are still returned; they report
/// `enabled() == false` and are skipped when the pipeline starts.
pub fn build_sinks(config: &Config) -> Result<Vec<Box<dyn Sink>>, SinkError> {
    let mut sinks: Vec<Box<dyn Sink>> = vec![
        Box::new(PrometheusSink::new(&config.prometheus)),
        Box::new(InfluxDbSink::v1(&config.influxdb)?),
        Box::new(InfluxDbSink::v2(&config.influxdb2)?),
        Box::new(FileSink::new(&config.file)),
        Box::new(SqliteSink::new(&config.sqlite)?),
        Box::new(StreamSink::brewfather(&config.brewfather)?),
        Box::new(StreamSink::brewersfriend(&config.brewersfriend)?),
        Box::new(StreamSink::grainfather(&config.grainfather)?),
        Box::new(StreamSink::taplistio(&config.taplistio)?),
    ];

    for webhook in &config.webhook {
        sinks.push(Box::new(WebhookSink::new(&webhook.url)?));
    }

    Ok(sinks)
}
