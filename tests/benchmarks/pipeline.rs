// SPDX-License-Identifier: Apache-2.0 OR MIT
//! **Performance Benchmarks: Logging Pipeline**
//!
//! ## Benchmarks Included:
//!
//! 1. **Ring Buffer**: push/take cost on the lock-free buffer
//! 2. **Buffered Admission**: producer-side cost of `BufferedAdapter::handle`
//! 3. **Dispatcher Fan-out**: processing plus delivery to several adapters
//!
//! ## Running Benchmarks:
//!
//! ```bash
//! cargo bench --bench pipeline
//! ```

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use logpipe::config::{AdapterConfig, Policy};
use logpipe::logging::{
    Adapter, Attr, BufferedAdapter, DefaultProcessor, Discard, Dispatcher, Handler, Output,
    Record, RingBuffer, Severity, WriterHandler,
};
use std::sync::Arc;
use std::time::Duration;

fn benchmark_ring_buffer(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_buffer");
    group.throughput(Throughput::Elements(1024));

    let ring = RingBuffer::new(1024);
    let mut batch = Vec::with_capacity(1024);
    group.bench_function("push_take_1024", |b| {
        b.iter(|| {
            for i in 0..1024u64 {
                let _ = ring.try_push(black_box(i));
            }
            batch.clear();
            ring.take_into(&mut batch, 1024);
            black_box(batch.len())
        });
    });

    group.finish();
}

/// Producer-side cost only: the worker drains on its own ticker
fn benchmark_buffered_admission(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffered_admission");
    group.throughput(Throughput::Elements(1));

    let config = AdapterConfig::default()
        .with_policy(Policy::Drop)
        .with_flush_interval(Duration::from_micros(100))
        .seal();
    let adapter = BufferedAdapter::new("bench", Arc::new(Discard), config);

    group.bench_function("handle", |b| {
        b.iter_batched(
            || Record::new(Severity::Info, "request handled").with_attr("status", 200u16),
            |record| {
                let _ = adapter.handle(black_box(record));
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
    let _ = adapter.dispose();
}

fn benchmark_dispatcher_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatcher_fan_out");
    group.measurement_time(Duration::from_secs(5));

    for count in [1usize, 4] {
        let adapters = (0..count)
            .map(|i| {
                let name = format!("sink{}", i);
                let handler = WriterHandler::text(&name, Output::writer(Box::new(std::io::sink())));
                Adapter::direct(name, Arc::new(handler))
            })
            .collect();
        let dispatcher = Dispatcher::new(
            adapters,
            Arc::new(DefaultProcessor::new(["password"], Vec::<String>::new())),
            Severity::Info,
            Duration::ZERO,
        );
        let request = dispatcher.with_attrs(&[Attr::new("request_id", "r-1")]);

        group.throughput(Throughput::Elements(count as u64));
        group.bench_function(format!("adapters_{}", count), |b| {
            b.iter(|| {
                let record = Record::new(Severity::Info, "login")
                    .with_attr("user", "alice")
                    .with_attr("password", "hunter2");
                black_box(Handler::handle(&request, record))
            });
        });
        let _ = dispatcher.dispose();
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_ring_buffer,
    benchmark_buffered_admission,
    benchmark_dispatcher_fan_out
);
criterion_main!(benches);
