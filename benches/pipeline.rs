//! Integration benchmark for the beacon processing pipeline.
//!
//! Drives the full application loop the same way the tests in app.rs do: a
//! fake scanner pushes raw iBeacon frames through `run_with` into a sink that
//! discards everything.

use clap::Parser;
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tilt_relay::app::{Options, Scanner, run_with};
use tilt_relay::queue;
use tilt_relay::sink::SinkFuture;
use tilt_relay::{
    Backend, BeaconId, Config, DeviceRegistry, Pipeline, Reading, ScanError, Sink, ValidityGate,
};
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const YELLOW: &str = "a495bb70-c5b1-4b44-b512-1370f02d74de";

fn frame(id: BeaconId, major: u16, minor: u16) -> Vec<u8> {
    let mut data = vec![0x02, 0x15];
    data.extend_from_slice(&id.0);
    data.extend_from_slice(&major.to_be_bytes());
    data.extend_from_slice(&minor.to_be_bytes());
    data.push(0xC5);
    data
}

/// A fake scanner that pushes raw frames, similar to the one in app.rs tests.
struct FakeScanner {
    frames: Vec<Vec<u8>>,
}

impl Scanner for FakeScanner {
    fn start_scan(
        &self,
        _backend: Backend,
        pipeline: Arc<Pipeline>,
        _stop: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<JoinHandle<()>, ScanError>> + Send + '_>> {
        let frames = self.frames.clone();
        Box::pin(async move {
            Ok(tokio::spawn(async move {
                for frame in frames {
                    pipeline.on_frame(&frame);
                }
            }))
        })
    }
}

struct NullSink;

impl Sink for NullSink {
    fn name(&self) -> &str {
        "Null"
    }

    fn write<'a>(&'a mut self, reading: &'a Reading) -> SinkFuture<'a, ()> {
        black_box(reading);
        Box::pin(async { Ok(()) })
    }
}

fn options() -> Options {
    Options::parse_from(["tilt-relay"])
}

/// Benchmark the producer path alone: decode -> resolve -> normalize -> gate -> enqueue
fn bench_ingest(c: &mut Criterion) {
    let mut group = c.benchmark_group("ingest");
    let id: BeaconId = YELLOW.parse().unwrap();
    let valid = frame(id, 70, 1035);
    let out_of_range = frame(id, 250, 1035);
    let unknown = frame("a495bb99-c5b1-4b44-b512-1370f02d74de".parse().unwrap(), 70, 1035);

    let (tx, mut rx) = queue::bounded(1);
    let pipeline = Pipeline::new(
        DeviceRegistry::tilt(),
        BTreeMap::new(),
        ValidityGate::default(),
        tx,
    );

    group.throughput(Throughput::Elements(1));
    group.bench_function("enqueued", |b| {
        b.iter(|| {
            let outcome = pipeline.on_frame(black_box(&valid));
            black_box(rx.try_dequeue());
            outcome
        })
    });
    group.bench_function("out_of_range", |b| {
        b.iter(|| pipeline.on_frame(black_box(&out_of_range)))
    });
    group.bench_function("unknown_device", |b| {
        b.iter(|| pipeline.on_frame(black_box(&unknown)))
    });

    group.finish();
}

/// Benchmark batches through the full pipeline including dispatch
fn bench_batch_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_pipeline");
    let rt = Runtime::new().unwrap();
    let id: BeaconId = YELLOW.parse().unwrap();
    let config: Config = "queue_size = 128".parse().unwrap();

    for batch_size in [1usize, 10, 100] {
        group.throughput(Throughput::Elements(batch_size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            &batch_size,
            |b, &size| {
                let frames: Vec<Vec<u8>> = (0..size).map(|i| frame(id, 60 + (i % 10) as u16, 1035)).collect();

                b.iter(|| {
                    let scanner = FakeScanner {
                        frames: frames.clone(),
                    };
                    let sinks: Vec<Box<dyn Sink>> = vec![Box::new(NullSink)];
                    let summary = rt.block_on(async {
                        run_with(&options(), &config, sinks, &scanner, &CancellationToken::new())
                            .await
                            .unwrap()
                    });
                    black_box(summary)
                })
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_ingest, bench_batch_pipeline);
criterion_main!(benches);
