//! lumen-info: list compute devices and run a smoke test on one of them

use std::process::ExitCode;

use clap::Parser;
use lumen_core::prelude::*;
use lumen_core::{kernel_assert, kernel_params, BackendType, DeviceSelector, Error};
use lumen_tracing::TracingConfig;

/// Inspect the devices visible to the lumen runtime.
#[derive(Parser, Debug)]
#[command(name = "lumen-info")]
#[command(about = "List lumen compute devices and exercise one of them", long_about = None)]
#[command(version)]
struct Cli {
    /// Device to use: `cpu` or `vulkanN`
    #[arg(short, long, default_value = "cpu", value_parser = parse_selector)]
    device: DeviceSelector,

    /// Enable debug mode (per-dispatch logging and performance spans)
    #[arg(long)]
    debug: bool,

    /// List every device of the context
    #[arg(short, long)]
    list: bool,

    /// Run a buffer and kernel round trip on the selected device
    #[arg(long)]
    smoke: bool,
}

fn parse_selector(text: &str) -> Result<DeviceSelector, String> {
    text.parse().map_err(|err: Error| err.to_string())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut tracing_config = TracingConfig::from_env();
    if cli.debug {
        tracing_config.enable_performance_tracing = true;
    }
    if let Err(err) = lumen_tracing::init_global_tracing(&tracing_config) {
        eprintln!("warning: tracing disabled: {err}");
    }

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            match err {
                Error::DeviceIndexOutOfRange { .. } | Error::BackendUnavailable { .. } => ExitCode::from(1),
                _ => ExitCode::from(2),
            }
        }
    }
}

fn run(cli: &Cli) -> lumen_core::Result<()> {
    let options = ContextOptions::from_env()
        .with_context_name("lumen-info")
        .with_debug_mode(cli.debug)
        .with_backend(BackendType::Vulkan, cli.device.backend_type() == BackendType::Vulkan);
    let context = Context::new(options)?;

    if cli.list || !cli.smoke {
        for (index, info) in context.device_info_list().enumerate() {
            println!("[{index}] {} ({})", info.name(), info.backend_type());
            println!(
                "    work-group size {}, max allocation {} bytes, {} heap(s)",
                info.work_group_size(),
                info.max_allocation_size(),
                info.heaps().len()
            );
            for (heap, heap_info) in info.heaps().iter().enumerate() {
                println!(
                    "    heap {heap}: {} bytes{}",
                    heap_info.total_size(),
                    if heap_info.is_device_local() { ", device local" } else { "" }
                );
            }
        }
    }

    let index = cli.device.resolve(&context)?;
    let device = context.query_device(index)?;
    println!("selected {} -> device {index}: {}", cli.device, device.info().name());

    if cli.smoke {
        smoke(&device)?;
        println!("smoke test passed");
    }
    Ok(())
}

const SMOKE_ITEMS: u32 = 1000;

const IOTA_WGSL: &str = r#"
@group(0) @binding(0) var<storage, read_write> out: array<u32>;
struct Launch { offset: vec4<u32>, size: vec4<u32>, base: vec4<u32> };
@group(0) @binding(1) var<uniform> launch: Launch;

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    if (id.x >= launch.size.x) { return; }
    let i = id.x + launch.offset.x;
    out[i] = launch.base.x + i;
}
"#;

fn smoke(device: &Device) -> lumen_core::Result<()> {
    let set = KernelSet::new("smoke").with_kernel(
        KernelDefinition::builder("iota")
            .buffer::<u32>()
            .pod::<u32>()
            .cpu(|item, args| {
                let out = args.buffer::<u32>(0)?;
                let base = args.pod::<u32>(1)?;
                let i = item.global_id(0);
                kernel_assert!((i as usize) < out.len(), "work item past the end", i);
                out.set(i as usize, base + i)
            })
            .wgsl(IOTA_WGSL, "main")
            .build()?,
    );
    let kernel = device.create_kernel(&kernel_params!(set, iota, 1)?)?;

    let buffer = device.create_buffer::<u32>(BufferUsage::PreferDevice, BufferFlag::RandomAccessible)?;
    buffer.set_size(SMOKE_ITEMS as usize)?;
    let options = kernel.create_options().with_work_size([SMOKE_ITEMS]).with_fence(true);
    kernel
        .run(&[KernelArg::buffer(&buffer), KernelArg::pod(100u32)], &options)?
        .wait()?;

    let values = buffer.read_to_vec()?;
    if let Some((i, v)) = values.iter().enumerate().find(|(i, v)| **v != 100 + *i as u32) {
        return Err(Error::InvalidUsage(format!("smoke kernel wrote {v} at {i}")));
    }
    device.wait_for_completion()
}
