//! Consumer side of the pipeline.
//!
//! The [`Dispatcher`] owns the queue receiver and every sink. It takes one
//! reading at a time and offers it to each enabled sink in order, consulting
//! the sink's rate limiter first. A failing or panicking sink is logged and
//! skipped; it never stops delivery to the sinks after it or the loop itself.

use crate::queue::QueueReceiver;
use crate::reading::Reading;
use crate::sink::Sink;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Lower bound for the idle wait so a zero interval cannot spin.
const MIN_IDLE: Duration = Duration::from_millis(1);

/// Lifecycle of the dispatch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Starting,
    Running,
    Draining,
    Stopped,
}

/// Why [`Dispatcher::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The shutdown token was cancelled
    Shutdown,
    /// The configured run time elapsed
    Timeout,
    /// Every producer went away
    SourceClosed,
}

/// Outcome of offering one reading to every sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
    pub rate_limited: usize,
}

/// Running totals since the dispatcher was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub received: u64,
    pub delivered: u64,
    pub failed: u64,
    pub rate_limited: u64,
}

impl DispatchStats {
    fn add(&mut self, report: DispatchReport) {
        self.received += 1;
        self.delivered += report.delivered as u64;
        self.failed += report.failed as u64;
        self.rate_limited += report.rate_limited as u64;
    }
}

pub struct Dispatcher {
    sinks: Vec<Box<dyn Sink>>,
    queue: QueueReceiver,
    idle: Duration,
    run_for: Option<Duration>,
    console_log: bool,
    state: PipelineState,
    stats: DispatchStats,
}

impl Dispatcher {
    /// `idle` bounds how long one iteration waits for a reading before
    /// re-checking shutdown and the deadline.
    pub fn new(sinks: Vec<Box<dyn Sink>>, queue: QueueReceiver, idle: Duration) -> Self {
        Self {
            sinks,
            queue,
            idle,
            run_for: None,
            console_log: false,
            state: PipelineState::Starting,
            stats: DispatchStats::default(),
        }
    }

    /// Stop [`Dispatcher::run`] after `timeout`, measured from when it starts.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.run_for = timeout;
        self
    }

    /// Log every dispatched reading as JSON at debug level.
    pub fn with_console_log(mut self, enabled: bool) -> Self {
        self.console_log = enabled;
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Names of the sinks that will receive readings.
    pub fn sink_names(&self) -> Vec<&str> {
        self.sinks.iter().map(|s| s.name()).collect()
    }

    /// Start every enabled sink in order. Disabled sinks and sinks that fail
    /// to start are removed and never written to.
    pub async fn start(&mut self) {
        let mut started: Vec<Box<dyn Sink>> = Vec::with_capacity(self.sinks.len());
        for mut sink in self.sinks.drain(..) {
            if !sink.enabled() {
                debug!(sink = sink.name(), "Sink disabled");
                continue;
            }
            match sink.start().await {
                Ok(status) => {
                    info!(
                        "Provider started: {} {}",
                        sink.name(),
                        status.as_deref().unwrap_or_default()
                    );
                    started.push(sink);
                }
                Err(e) => error!(sink = sink.name(), error = %e, "Provider failed to start"),
            }
        }
        self.sinks = started;
        self.state = PipelineState::Running;
    }

    /// Offer one reading to every sink in order.
    pub async fn dispatch(&mut self, reading: &Reading) -> DispatchReport {
        let mut report = DispatchReport::default();

        if self.console_log {
            debug!(reading = %reading.to_json(), "Reading");
        }

        for sink in self.sinks.iter_mut() {
            let admitted = sink
                .limiter()
                .is_none_or(|limiter| limiter.admit(&reading.color).is_admitted());
            if !admitted {
                debug!(sink = sink.name(), color = %reading.color, "Rate limited, skipping");
                report.rate_limited += 1;
                continue;
            }

            let outcome = AssertUnwindSafe(async { sink.write(reading).await })
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    error!(sink = sink.name(), color = %reading.color, error = %e, "Failed to update provider");
                    report.failed += 1;
                }
                Err(panic) => {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_default();
                    error!(sink = sink.name(), color = %reading.color, panic = %message, "Provider panicked");
                    report.failed += 1;
                }
            }
        }

        self.stats.add(report);
        report
    }

    /// Dispatch readings until shutdown, the deadline, or the producers are
    /// gone. Queued readings are left for [`Dispatcher::drain`].
    pub async fn run(&mut self, shutdown: &CancellationToken) -> StopReason {
        self.state = PipelineState::Running;
        // A run time too large to represent means no deadline at all
        let deadline = self.run_for.and_then(|d| Instant::now().checked_add(d));

        loop {
            if shutdown.is_cancelled() {
                return StopReason::Shutdown;
            }

            let mut wait = self.idle.max(MIN_IDLE);
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    info!("Run time elapsed");
                    return StopReason::Timeout;
                }
                wait = wait.min(deadline - now);
            }

            match tokio::time::timeout(wait, self.queue.dequeue(shutdown)).await {
                Ok(Some(reading)) => {
                    self.dispatch(&reading).await;
                }
                Ok(None) if shutdown.is_cancelled() => return StopReason::Shutdown,
                Ok(None) => return StopReason::SourceClosed,
                Err(_) => {}
            }
        }
    }

    /// Stop accepting readings and flush the ones already queued.
    ///
    /// Returns the number of readings flushed.
    pub async fn drain(&mut self) -> usize {
        self.state = PipelineState::Draining;
        self.queue.close();

        let mut flushed = 0;
        while let Some(reading) = self.queue.try_dequeue() {
            self.dispatch(&reading).await;
            flushed += 1;
        }

        self.state = PipelineState::Stopped;
        info!(flushed, "Pipeline stopped");
        flushed
    }
}
