//! Benchmarks for kernel dispatch on the CPU device
//!
//! Covers per-dispatch overhead and throughput for 1D and 2D launches.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use lumen_core::kernel_params;
use lumen_core::prelude::*;

fn kernels() -> KernelSet {
    let scale = KernelDefinition::builder("scale")
        .buffer::<f32>()
        .pod::<f32>()
        .cpu(|item, args| {
            let data = args.buffer::<f32>(0)?;
            let factor = args.pod::<f32>(1)?;
            let i = item.global_id(0) as usize;
            data.set(i, data.get(i)? * factor)
        })
        .build()
        .unwrap();

    let transpose = KernelDefinition::builder("transpose")
        .dimension(2)
        .buffer::<f32>()
        .buffer::<f32>()
        .cpu(|item, args| {
            let src = args.buffer::<f32>(0)?;
            let dst = args.buffer::<f32>(1)?;
            let (x, y) = (item.global_id(0) as usize, item.global_id(1) as usize);
            let (w, h) = (item.global_size(0) as usize, item.global_size(1) as usize);
            dst.set(x * h + y, src.get(y * w + x)?)
        })
        .build()
        .unwrap();

    KernelSet::new("bench").with_kernel(scale).with_kernel(transpose)
}

fn benchmark_scale(c: &mut Criterion) {
    let mut group = c.benchmark_group("kernel_scale");
    let context = Context::new(ContextOptions::default()).unwrap();
    let device = context.query_device(0).unwrap();
    let kernel = device.create_kernel(&kernel_params!(kernels(), scale, 1).unwrap()).unwrap();

    for size in [128usize, 4096, 262144].iter() {
        group.throughput(Throughput::Elements(*size as u64));

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let data = device
                .create_buffer::<f32>(BufferUsage::PreferDevice, BufferFlag::RandomAccessible)
                .unwrap();
            data.set_size(size).unwrap();
            let options = kernel.create_options().with_work_size([size as u32]).with_fence(true);

            b.iter(|| {
                kernel
                    .run(&[KernelArg::buffer(&data), KernelArg::pod(1.0001f32)], &options)
                    .unwrap()
                    .wait()
                    .unwrap();
            });
        });
    }

    group.finish();
}

fn benchmark_transpose(c: &mut Criterion) {
    let mut group = c.benchmark_group("kernel_transpose");
    let context = Context::new(ContextOptions::default()).unwrap();
    let device = context.query_device(0).unwrap();
    let kernel = device
        .create_kernel(&kernel_params!(kernels(), transpose, 2).unwrap())
        .unwrap();

    for side in [64u32, 512].iter() {
        group.throughput(Throughput::Elements((*side * *side) as u64));

        group.bench_with_input(BenchmarkId::from_parameter(side), side, |b, &side| {
            let src = device
                .create_buffer::<f32>(BufferUsage::PreferDevice, BufferFlag::RandomAccessible)
                .unwrap();
            let dst = device
                .create_buffer::<f32>(BufferUsage::PreferDevice, BufferFlag::RandomAccessible)
                .unwrap();
            src.set_size((side * side) as usize).unwrap();
            dst.set_size((side * side) as usize).unwrap();
            let options = kernel.create_options().with_work_size([side, side]).with_fence(true);

            b.iter(|| {
                kernel
                    .run(&[KernelArg::buffer(&src), KernelArg::buffer(&dst)], &options)
                    .unwrap()
                    .wait()
                    .unwrap();
            });
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_scale, benchmark_transpose);
criterion_main!(benches);
