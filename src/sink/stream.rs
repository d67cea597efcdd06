//! Custom stream sinks for hosted brewing services.
//!
//! Brewfather, Brewer's Friend, Grainfather and Taplist.io all accept a small
//! JSON document per device over HTTP POST. They differ only in payload shape
//! and in how the target URL is derived, so one [`StreamSink`] parameterized by
//! [`StreamService`] covers them. Every service throttles per device with its
//! own [`RateLimiter`].

use super::{DEFAULT_HTTP_TIMEOUT, Sink, SinkError, SinkFuture, http_client};
use crate::config::{BrewersFriendConfig, GrainfatherConfig, StreamConfig, TempUnit};
use crate::rate_limit::RateLimiter;
use crate::reading::Reading;
use reqwest::Url;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{Instrument, debug, debug_span};

const BREWERSFRIEND_STREAM_URL: &str = "https://log.brewersfriend.com/stream";

/// Hosted service a [`StreamSink`] reports to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamService {
    Brewfather,
    BrewersFriend,
    Grainfather,
    TaplistIo,
}

impl StreamService {
    /// Build the JSON document the service expects for a reading.
    pub fn payload(self, reading: &Reading, temp_unit: TempUnit) -> Value {
        let temp = match temp_unit {
            TempUnit::Fahrenheit => json!(reading.temp_fahrenheit),
            TempUnit::Celsius => json!(reading.temp_celsius),
        };
        match self {
            StreamService::Brewfather => json!({
                "name": format!("PitchTilt{}", reading.color),
                "beer": reading.name,
                "temp": temp,
                "temp_unit": temp_unit.symbol(),
                "gravity": reading.gravity,
                "gravity_unit": "G",
            }),
            StreamService::BrewersFriend => json!({
                "name": format!("Pitch-Tilt-{}", reading.color),
                "device_source": "tilt",
                "gravity": reading.gravity,
                "og": reading.original_gravity,
                "beer": reading.name,
                "temp_unit": temp_unit.symbol(),
                "temp": temp,
                "gravity_unit": "G",
            }),
            StreamService::Grainfather => json!({
                "specific_gravity": reading.gravity,
                "temperature": temp,
                "unit": match temp_unit {
                    TempUnit::Fahrenheit => "fahrenheit",
                    TempUnit::Celsius => "celsius",
                },
            }),
            // Taplist.io only takes Fahrenheit
            StreamService::TaplistIo => json!({
                "Color": reading.color,
                "Temp": reading.temp_fahrenheit,
                "SG": reading.gravity,
                "temperature_unit": "F",
                "gravity_unit": "G",
            }),
        }
    }
}

#[derive(Debug)]
enum Target {
    Unconfigured,
    Single(Url),
    PerColor(BTreeMap<String, Url>),
}

impl Target {
    fn url_for(&self, color: &str) -> Option<&Url> {
        match self {
            Target::Unconfigured => None,
            Target::Single(url) => Some(url),
            Target::PerColor(urls) => urls.get(color),
        }
    }
}

fn parse_url(service: &str, url: &str) -> Result<Url, SinkError> {
    Url::parse(url).map_err(|e| SinkError::Setup(format!("invalid {service} url '{url}': {e}")))
}

/// Rate limited HTTP sink for one hosted service.
pub struct StreamSink {
    service: StreamService,
    name: String,
    target: Target,
    temp_unit: TempUnit,
    client: reqwest::Client,
    limiter: RateLimiter,
}

impl StreamSink {
    fn build(
        service: StreamService,
        name: String,
        target: Target,
        temp_unit: TempUnit,
        rate: f64,
        period: Duration,
    ) -> Result<Self, SinkError> {
        let limiter =
            RateLimiter::new(rate, period).map_err(|e| SinkError::Setup(format!("{name}: {e}")))?;
        Ok(Self {
            service,
            name,
            target,
            temp_unit,
            client: http_client(DEFAULT_HTTP_TIMEOUT)?,
            limiter,
        })
    }

    fn single(service: &str, url: Option<&str>) -> Result<Target, SinkError> {
        Ok(match url {
            Some(url) => Target::Single(parse_url(service, url)?),
            None => Target::Unconfigured,
        })
    }

    pub fn brewfather(config: &StreamConfig) -> Result<Self, SinkError> {
        Self::build(
            StreamService::Brewfather,
            format!("Brewfather ({})", config.url.as_deref().unwrap_or_default()),
            Self::single("Brewfather", config.url.as_deref())?,
            config.temp_unit,
            config.rate,
            config.period,
        )
    }

    /// Brewer's Friend derives the stream URL from the API key.
    pub fn brewersfriend(config: &BrewersFriendConfig) -> Result<Self, SinkError> {
        let url = config
            .api_key
            .as_deref()
            .map(|key| format!("{BREWERSFRIEND_STREAM_URL}/{key}"));
        Self::build(
            StreamService::BrewersFriend,
            format!("Brewer's Friend ({})", url.as_deref().unwrap_or_default()),
            Self::single("Brewer's Friend", url.as_deref())?,
            config.temp_unit,
            config.rate,
            config.period,
        )
    }

    /// Grainfather has one URL per fermenter; colors without one are skipped.
    pub fn grainfather(config: &GrainfatherConfig) -> Result<Self, SinkError> {
        let target = if config.urls.is_empty() {
            Target::Unconfigured
        } else {
            let urls = config
                .urls
                .iter()
                .map(|(color, url)| Ok((color.to_lowercase(), parse_url("Grainfather", url)?)))
                .collect::<Result<_, SinkError>>()?;
            Target::PerColor(urls)
        };
        Self::build(
            StreamService::Grainfather,
            "Grainfather Custom URL".to_string(),
            target,
            config.temp_unit,
            config.rate,
            config.period,
        )
    }

    pub fn taplistio(config: &StreamConfig) -> Result<Self, SinkError> {
        Self::build(
            StreamService::TaplistIo,
            format!("Taplist.io ({})", config.url.as_deref().unwrap_or_default()),
            Self::single("Taplist.io", config.url.as_deref())?,
            TempUnit::Fahrenheit,
            config.rate,
            config.period,
        )
    }

    pub fn service(&self) -> StreamService {
        self.service
    }
}

impl Sink for StreamSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn enabled(&self) -> bool {
        !matches!(self.target, Target::Unconfigured)
    }

    fn write<'a>(&'a mut self, reading: &'a Reading) -> SinkFuture<'a, ()> {
        let span = debug_span!("stream_write", sink = %self.name, color = %reading.color);
        Box::pin(
            async move {
                let Some(url) = self.target.url_for(&reading.color) else {
                    debug!("No URL for device, skipping");
                    return Ok(());
                };
                let payload = self.service.payload(reading, self.temp_unit);
                self.client
                    .post(url.clone())
                    .header("Accept", "text/plain")
                    .json(&payload)
                    .send()
                    .await?
                    .error_for_status()?;
                Ok(())
            }
            .instrument(span),
        )
    }

    fn limiter(&mut self) -> Option<&mut RateLimiter> {
        Some(&mut self.limiter)
    }
}
