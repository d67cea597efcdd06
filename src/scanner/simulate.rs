//! Simulated beacon source for running without Bluetooth hardware.

use crate::beacon::RawAdvertisement;
use crate::pipeline::Pipeline;
use crate::registry::SIMULATED_ID;
use rand::Rng;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Interval between simulated advertisements.
pub const SIMULATION_INTERVAL: Duration = Duration::from_millis(250);

const MAJOR_RANGE: Range<u16> = 65..75;
const MINOR_RANGE: Range<u16> = 1035..1040;

/// A random advertisement from the reserved simulation beacon.
pub fn advertisement() -> RawAdvertisement {
    let mut rng = rand::thread_rng();
    RawAdvertisement {
        id: SIMULATED_ID,
        major: rng.gen_range(MAJOR_RANGE),
        minor: rng.gen_range(MINOR_RANGE),
    }
}

/// Feed a simulated advertisement into `pipeline` every
/// [`SIMULATION_INTERVAL`] until `stop` is cancelled.
pub fn start_scan(pipeline: Arc<Pipeline>, stop: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticks = tokio::time::interval(SIMULATION_INTERVAL);
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = ticks.tick() => {
                    let outcome = pipeline.on_advertisement(advertisement());
                    debug!(?outcome, "Simulated beacon");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue;
    use crate::reading::ValidityGate;
    use crate::registry::DeviceRegistry;
    use std::collections::BTreeMap;

    #[test]
    fn test_advertisement_ranges() {
        for _ in 0..100 {
            let adv = advertisement();
            assert_eq!(adv.id, SIMULATED_ID);
            assert!(MAJOR_RANGE.contains(&adv.major));
            assert!(MINOR_RANGE.contains(&adv.minor));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulator_feeds_pipeline_until_stopped() {
        let (tx, mut rx) = queue::bounded(10);
        let pipeline = Arc::new(Pipeline::new(
            DeviceRegistry::tilt(),
            BTreeMap::new(),
            ValidityGate::default(),
            tx,
        ));
        let stop = CancellationToken::new();
        let handle = start_scan(pipeline, stop.clone());

        let shutdown = CancellationToken::new();
        let first = rx.dequeue(&shutdown).await.unwrap();
        let second = rx.dequeue(&shutdown).await.unwrap();
        assert_eq!(first.color, "simulated");
        assert_eq!(second.color, "simulated");

        stop.cancel();
        handle.await.unwrap();
        // The pipeline (and its sender) went away with the task
        while rx.try_dequeue().is_some() {}
        assert!(rx.dequeue(&shutdown).await.is_none());
    }
}
