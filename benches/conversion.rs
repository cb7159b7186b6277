//! Throughput benchmarks for the sample converters and the staging
//! fill/drain path — these run on the rendezvous hot path, so regressions
//! here are regressions in the audio thread itself.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use jackasio_bridge::channel::StagingBuffer;
use jackasio_bridge::convert::{decode, encode, f32_to_i16, f32_to_i32, i16_to_f32, i32_to_f32, SampleFormat};

const FRAMES: usize = 1024;

fn bench_scalar_converters(c: &mut Criterion) {
    let mut group = c.benchmark_group("scalar_converters");
    group.throughput(Throughput::Elements(1));
    group.bench_function("f32_to_i32", |b| b.iter(|| f32_to_i32(black_box(0.42))));
    group.bench_function("i32_to_f32", |b| b.iter(|| i32_to_f32(black_box(i32::MAX / 3))));
    group.bench_function("f32_to_i16", |b| b.iter(|| f32_to_i16(black_box(-0.9))));
    group.bench_function("i16_to_f32", |b| b.iter(|| i16_to_f32(black_box(i16::MIN / 2))));
    group.finish();
}

fn bench_encode_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_decode");
    group.throughput(Throughput::Elements(FRAMES as u64));

    let src: Vec<f32> = (0..FRAMES).map(|i| (i as f32 / FRAMES as f32) * 2.0 - 1.0).collect();

    for fmt in [SampleFormat::Float32LE, SampleFormat::Int32LE, SampleFormat::Int16LE] {
        let mut bytes = vec![0u8; FRAMES * fmt.sample_bytes()];
        group.bench_with_input(BenchmarkId::new("encode", format!("{fmt:?}")), &fmt, |b, &fmt| {
            b.iter(|| encode(fmt, black_box(&src), black_box(&mut bytes)))
        });

        encode(fmt, &src, &mut bytes);
        let mut out = vec![0f32; FRAMES];
        group.bench_with_input(BenchmarkId::new("decode", format!("{fmt:?}")), &fmt, |b, &fmt| {
            b.iter(|| decode(fmt, black_box(&bytes), black_box(&mut out)))
        });
    }
    group.finish();
}

fn bench_staging_fill_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("staging_fill_drain");
    group.throughput(Throughput::Elements(FRAMES as u64));

    let src: Vec<f32> = (0..FRAMES).map(|i| (i as f32 / FRAMES as f32) * 2.0 - 1.0).collect();
    let mut dst = vec![0f32; FRAMES];

    for fmt in [SampleFormat::Float32LE, SampleFormat::Int32LE, SampleFormat::Int16LE] {
        let mut staging = StagingBuffer::zeroed(fmt, FRAMES);
        group.bench_with_input(BenchmarkId::new("fill_from_backend", format!("{fmt:?}")), &fmt, |b, _| {
            b.iter(|| staging.fill_from_backend(black_box(&src)))
        });
        staging.fill_from_backend(&src);
        group.bench_with_input(BenchmarkId::new("drain_to_backend", format!("{fmt:?}")), &fmt, |b, _| {
            b.iter(|| staging.drain_to_backend(black_box(&mut dst)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_scalar_converters, bench_encode_decode, bench_staging_fill_drain);
criterion_main!(benches);
