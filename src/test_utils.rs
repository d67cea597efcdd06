use crate::beacon::{BeaconId, IBEACON_PREFIX};
use crate::rate_limit::RateLimiter;
use crate::reading::Reading;
use crate::sink::{Sink, SinkError, SinkFuture};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

/// UUID broadcast by a yellow Tilt.
pub const YELLOW_ID: BeaconId = BeaconId([
    0xA4, 0x95, 0xBB, 0x70, 0xC5, 0xB1, 0x4B, 0x44, 0xB5, 0x12, 0x13, 0x70, 0xF0, 0x2D, 0x74, 0xDE,
]);

/// A stable capture time for unit tests.
pub fn test_time() -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000_000)
}

/// Build a valid `Reading` with no baseline gravity.
///
/// Tests can override just the fields they care about.
pub fn reading(color: &str, temp_fahrenheit: f64, gravity: f64) -> Reading {
    Reading {
        color: color.to_string(),
        name: color.to_string(),
        timestamp: test_time(),
        temp_fahrenheit,
        temp_celsius: crate::reading::celsius(temp_fahrenheit),
        gravity,
        original_gravity: None,
        alcohol_by_volume: 0.0,
        apparent_attenuation: 0.0,
        temp_valid: true,
        gravity_valid: true,
    }
}

/// Raw iBeacon manufacturer data for the given fields.
pub fn ibeacon_frame(id: BeaconId, major: u16, minor: u16) -> Vec<u8> {
    let mut data = IBEACON_PREFIX.to_vec();
    data.extend_from_slice(&id.0);
    data.extend_from_slice(&major.to_be_bytes());
    data.extend_from_slice(&minor.to_be_bytes());
    data.push(0xC5);
    data
}

/// How a [`TestSink`] responds to writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Record,
    Fail,
    Panic,
}

/// Deliveries shared between a test and the sinks it hands to a dispatcher,
/// as `(sink name, color)` pairs in delivery order.
pub type Deliveries = Arc<Mutex<Vec<(String, String)>>>;

/// In-memory sink for dispatch tests.
pub struct TestSink {
    pub name: String,
    pub behavior: Behavior,
    pub enabled: bool,
    pub fail_start: bool,
    pub limiter: Option<RateLimiter>,
    pub deliveries: Deliveries,
}

impl TestSink {
    pub fn new(name: &str, behavior: Behavior, deliveries: &Deliveries) -> Self {
        Self {
            name: name.to_string(),
            behavior,
            enabled: true,
            fail_start: false,
            limiter: None,
            deliveries: Arc::clone(deliveries),
        }
    }

    pub fn boxed(self) -> Box<dyn Sink> {
        Box::new(self)
    }
}

impl Sink for TestSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn start(&mut self) -> SinkFuture<'_, Option<String>> {
        let fail = self.fail_start;
        Box::pin(async move {
            if fail {
                Err(SinkError::Setup("unavailable".to_string()))
            } else {
                Ok(None)
            }
        })
    }

    fn write<'a>(&'a mut self, reading: &'a Reading) -> SinkFuture<'a, ()> {
        Box::pin(async move {
            match self.behavior {
                Behavior::Record => {
                    self.deliveries
                        .lock()
                        .unwrap()
                        .push((self.name.clone(), reading.color.clone()));
                    Ok(())
                }
                Behavior::Fail => Err(SinkError::Setup("write failed".to_string())),
                Behavior::Panic => panic!("sink exploded"),
            }
        })
    }

    fn limiter(&mut self) -> Option<&mut RateLimiter> {
        self.limiter.as_mut()
    }
}
