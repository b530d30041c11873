//! Benchmarks for buffer operations
//!
//! Measures copy, fill, grow-resize and host mapping on the CPU device.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use lumen_core::prelude::*;

fn cpu_device() -> (Context, Device) {
    let context = Context::new(ContextOptions::default()).unwrap();
    let device = context.query_device(0).unwrap();
    (context, device)
}

fn benchmark_copy(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffer_copy");
    let (_context, device) = cpu_device();

    for size in [1024usize, 65536, 1 << 20].iter() {
        group.throughput(Throughput::Bytes((*size * 4) as u64));

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let src = device
                .create_buffer::<u32>(BufferUsage::PreferHost, BufferFlag::RandomAccessible)
                .unwrap();
            let dst = device
                .create_buffer::<u32>(BufferUsage::PreferDevice, BufferFlag::RandomAccessible)
                .unwrap();
            src.set_size(size).unwrap();
            dst.set_size(size).unwrap();
            let options = BufferLaunchOptions::new();

            b.iter(|| {
                copy(&src, &dst, &options).unwrap().wait().unwrap();
            });
        });
    }

    group.finish();
}

fn benchmark_fill(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffer_fill");
    let (_context, device) = cpu_device();

    for size in [1024usize, 65536, 1 << 20].iter() {
        group.throughput(Throughput::Bytes((*size * 4) as u64));

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let buffer = device
                .create_buffer::<f32>(BufferUsage::PreferDevice, BufferFlag::RandomAccessible)
                .unwrap();
            buffer.set_size(size).unwrap();
            let options = BufferLaunchOptions::new();

            b.iter(|| {
                buffer.fill(1.5, &options).unwrap().wait().unwrap();
            });
        });
    }

    group.finish();
}

fn benchmark_grow(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffer_grow");
    let (_context, device) = cpu_device();

    for size in [4096usize, 1 << 18].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                let buffer = device
                    .create_buffer::<u64>(BufferUsage::PreferDevice, BufferFlag::RandomAccessible)
                    .unwrap();
                buffer.set_size(size / 2).unwrap();
                buffer.set_size(size).unwrap();
            });
        });
    }

    group.finish();
}

fn benchmark_map_roundtrip(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffer_map_roundtrip");
    let (_context, device) = cpu_device();

    for size in [1024usize, 65536].iter() {
        group.throughput(Throughput::Elements(*size as u64));

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let buffer = device
                .create_buffer::<u32>(BufferUsage::PreferHost, BufferFlag::RandomAccessible)
                .unwrap();
            let data: Vec<u32> = (0..size as u32).collect();

            b.iter(|| {
                buffer.write_slice(&data).unwrap();
                buffer.read_to_vec().unwrap()
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_copy,
    benchmark_fill,
    benchmark_grow,
    benchmark_map_roundtrip
);
criterion_main!(benches);
