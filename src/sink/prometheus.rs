//! Prometheus metrics sink.
//!
//! Readings update per-device gauges that a Prometheus server scrapes from the
//! exporter started in [`Sink::start`].

use super::{Sink, SinkError, SinkFuture};
use crate::config::PrometheusConfig;
use crate::reading::Reading;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

pub struct PrometheusSink {
    enabled: bool,
    port: u16,
}

impl PrometheusSink {
    pub fn new(config: &PrometheusConfig) -> Self {
        Self {
            enabled: config.enabled,
            port: config.port,
        }
    }

    fn describe() {
        describe_counter!("tilt_beacons_received", "Number of beacons received");
        describe_gauge!("tilt_temperature_fahrenheit", "Temperature in fahrenheit");
        describe_gauge!("tilt_temperature_celsius", "Temperature in celsius");
        describe_gauge!("tilt_gravity", "Gravity of the beer");
        describe_gauge!("tilt_alcohol_by_volume", "ABV of the beer");
        describe_gauge!(
            "tilt_apparent_attenuation",
            "Apparent attenuation of the beer"
        );
    }

    /// Update every metric for the reading's device.
    fn record(reading: &Reading) {
        let labels = [
            ("color", reading.color.clone()),
            ("name", reading.name.clone()),
        ];
        counter!("tilt_beacons_received", &labels).increment(1);
        gauge!("tilt_temperature_fahrenheit", &labels).set(reading.temp_fahrenheit);
        gauge!("tilt_temperature_celsius", &labels).set(f64::from(reading.temp_celsius));
        gauge!("tilt_gravity", &labels).set(reading.gravity);
        gauge!("tilt_alcohol_by_volume", &labels).set(reading.alcohol_by_volume);
        gauge!("tilt_apparent_attenuation", &labels).set(reading.apparent_attenuation);
    }
}

impl Sink for PrometheusSink {
    fn name(&self) -> &str {
        "Prometheus"
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn start(&mut self) -> SinkFuture<'_, Option<String>> {
        Box::pin(async move {
            PrometheusBuilder::new()
                .with_http_listener(([0, 0, 0, 0], self.port))
                .install()
                .map_err(|e| SinkError::Setup(format!("failed to start exporter: {e}")))?;
            Self::describe();
            Ok(Some(format!("(http://127.0.0.1:{}/metrics)", self.port)))
        })
    }

    fn write<'a>(&'a mut self, reading: &'a Reading) -> SinkFuture<'a, ()> {
        Self::record(reading);
        Box::pin(async { Ok(()) })
    }
}
