//! Benchmarks for the sample buffers on the data path
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sensorhub_rs::pipeline::nodes::Downsample;
use sensorhub_rs::pipeline::{BufferReader, ReaderKey, RingBuffer, TimedXyz, TransformFilter};

fn samples(n: usize) -> Vec<TimedXyz> {
    (0..n)
        .map(|i| TimedXyz::new(i as u64, i as i32, -(i as i32), 1000))
        .collect()
}

fn bench_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_buffer_write");

    for readers in [0usize, 1, 4, 16].iter() {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("single", readers), readers, |b, &readers| {
            let buffer = RingBuffer::<TimedXyz>::new(256);
            for _ in 0..readers {
                buffer.join(ReaderKey::next(), None);
            }
            let mut i = 0u64;
            b.iter(|| {
                buffer.write(&[TimedXyz::new(i, 1, 2, 3)]);
                i = i.wrapping_add(1);
            });
        });
    }

    for batch in [8usize, 64, 256].iter() {
        let values = samples(*batch);
        group.throughput(Throughput::Elements(*batch as u64));
        group.bench_with_input(BenchmarkId::new("batch", batch), &values, |b, values| {
            let buffer = RingBuffer::<TimedXyz>::new(256);
            buffer.join(ReaderKey::next(), None);
            b.iter(|| buffer.write(black_box(values)));
        });
    }

    group.bench_function("next_slot", |b| {
        let buffer = RingBuffer::<TimedXyz>::new(256);
        buffer.join(ReaderKey::next(), None);
        let mut i = 0u64;
        b.iter(|| {
            let mut slot = buffer.next_slot();
            *slot = TimedXyz::new(i, 1, 2, 3);
            slot.commit();
            i = i.wrapping_add(1);
        });
    });

    group.finish();
}

fn bench_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_buffer_read");

    for capacity in [64usize, 1024, 16_384].iter() {
        let values = samples(*capacity);
        group.throughput(Throughput::Elements(*capacity as u64));
        group.bench_with_input(
            BenchmarkId::new("drain_full", capacity),
            capacity,
            |b, &capacity| {
                let buffer = RingBuffer::<TimedXyz>::new(capacity);
                let key = ReaderKey::next();
                buffer.join(key, None);
                let mut out = Vec::with_capacity(capacity);
                b.iter(|| {
                    buffer.write(&values);
                    out.clear();
                    black_box(buffer.read(key, usize::MAX, &mut out));
                });
            },
        );
    }

    group.finish();
}

fn bench_inline_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("inline_chain");

    // Buffer -> reader -> averaging filter -> buffer, drained on the writer's thread.
    for chunk in [1usize, 16, 64].iter() {
        group.throughput(Throughput::Elements(64));
        group.bench_with_input(BenchmarkId::new("downsample", chunk), chunk, |b, &chunk| {
            let input = RingBuffer::<TimedXyz>::new(128);
            let output = RingBuffer::<TimedXyz>::new(128);
            let reader = BufferReader::<TimedXyz>::new(chunk);
            let average = TransformFilter::new(Downsample::new(4, None));
            reader.join_buffer(&input);
            reader.source().join(average.sink_handle());
            average.source_port().join(output.sink_handle());
            let key = ReaderKey::next();
            output.join(key, None);

            let values = samples(64);
            let mut out = Vec::with_capacity(128);
            b.iter(|| {
                input.write(&values);
                out.clear();
                black_box(output.read(key, usize::MAX, &mut out));
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_write, bench_read, bench_inline_chain);
criterion_main!(benches);
