//! Bounded backpressure queue between the scan callback and the dispatch loop.
//!
//! The producer side never waits: when the queue is full the reading is
//! dropped and `enqueue` returns `false`. Beacons broadcast far more often than
//! network sinks can be serviced, so fresh data is preferred over complete
//! data. The consumer side awaits the next reading but gives up as soon as the
//! shutdown token is cancelled.

use crate::reading::Reading;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Default number of readings held between producer and consumer.
pub const DEFAULT_QUEUE_SIZE: usize = 3;

/// Create a queue holding at most `capacity` readings (at least one).
pub fn bounded(capacity: usize) -> (QueueSender, QueueReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (QueueSender { tx }, QueueReceiver { rx })
}

/// Producer half. Cheap to clone and safe to use from any thread.
#[derive(Debug, Clone)]
pub struct QueueSender {
    tx: mpsc::Sender<Reading>,
}

impl QueueSender {
    /// Try to queue a reading without waiting.
    ///
    /// Returns `false` when the queue is full or the consumer has shut down;
    /// the reading is dropped in both cases.
    pub fn enqueue(&self, reading: Reading) -> bool {
        self.tx.try_send(reading).is_ok()
    }

    /// Number of readings currently queued.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.tx.capacity() == 0
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

/// Consumer half, owned by the dispatch loop.
#[derive(Debug)]
pub struct QueueReceiver {
    rx: mpsc::Receiver<Reading>,
}

impl QueueReceiver {
    /// Wait for the next reading.
    ///
    /// Returns `None` once `shutdown` is cancelled or every producer is gone.
    pub async fn dequeue(&mut self, shutdown: &CancellationToken) -> Option<Reading> {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => None,
            reading = self.rx.recv() => reading,
        }
    }

    /// Take the next reading if one is ready.
    pub fn try_dequeue(&mut self) -> Option<Reading> {
        self.rx.try_recv().ok()
    }

    /// Stop accepting new readings. Already queued readings can still be
    /// taken with [`QueueReceiver::try_dequeue`].
    pub fn close(&mut self) {
        self.rx.close();
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
