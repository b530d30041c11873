//! Context and device lifecycle

mod common;

use std::thread;

use common::TestEnv;
use lumen_core::prelude::*;
use lumen_core::{BackendType, DeviceSelector, Error, Fence, Result};

#[test]
fn test_device_info_list_is_stable() -> Result<()> {
    let env = TestEnv::shared()?;
    let context = env.context();

    let first: Vec<String> = context.device_info_list().map(|info| info.name().to_string()).collect();
    let second: Vec<String> = context.device_info_list().map(|info| info.name().to_string()).collect();
    assert_eq!(first, second);
    assert_eq!(context.device_info_list().len(), context.device_count());

    let info = context.device_info_list().next().expect("one device");
    assert_eq!(info.backend_type(), BackendType::Cpu);
    assert!(info.work_group_size().is_power_of_two());
    assert!(!info.heaps().is_empty());
    Ok(())
}

#[test]
fn test_query_device_shares_live_instances_across_threads() -> Result<()> {
    let env = TestEnv::isolated()?;
    let context = env.context();
    let held = context.query_device(0)?;

    let same = thread::scope(|scope| {
        let handles: Vec<_> = (0..4).map(|_| scope.spawn(|| context.query_device(0))).collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("query thread panicked"))
            .collect::<Result<Vec<Device>>>()
    })?;
    assert!(same.iter().all(|device| device.same_device(&held)));
    assert!(same.iter().all(|device| *device == held));
    Ok(())
}

#[test]
fn test_query_device_bounds() -> Result<()> {
    let env = TestEnv::shared()?;
    let context = env.context();
    let count = context.device_count();

    assert!(matches!(
        context.query_device(count),
        Err(Error::DeviceIndexOutOfRange { .. })
    ));
    assert!(matches!(
        context.query_device(usize::MAX),
        Err(Error::DeviceIndexOutOfRange { index: usize::MAX, .. })
    ));
    Ok(())
}

#[test]
fn test_global_context_is_shared_only_when_enabled() -> Result<()> {
    let a = TestEnv::shared()?;
    let b = TestEnv::shared()?;
    assert!(std::ptr::eq(a.context(), b.context()));

    let c = TestEnv::isolated()?;
    assert!(!std::ptr::eq(a.context(), c.context()));
    Ok(())
}

#[test]
fn test_device_outlives_context_through_buffers() -> Result<()> {
    let buffer = {
        let env = TestEnv::isolated()?;
        let device = env.device()?;
        device.create_buffer::<u32>(BufferUsage::PreferDevice, BufferFlag::RandomAccessible)?
    };
    buffer.write_slice(&[1, 2, 3])?;
    assert_eq!(buffer.read_to_vec()?, vec![1, 2, 3]);
    assert_eq!(buffer.device().backend_type(), BackendType::Cpu);
    Ok(())
}

#[test]
fn test_wait_for_completion_forms() -> Result<()> {
    let env = TestEnv::isolated()?;
    let device = env.device()?;
    assert!(device.num_of_queues() >= 1);

    device.wait_for_completion()?;
    device.wait_for_completion_fence(&Fence::invalid())?;

    let buffer = device.create_buffer::<u8>(BufferUsage::PreferHost, BufferFlag::RandomAccessible)?;
    buffer.set_size(64)?;
    let result = buffer.fill(3, &BufferLaunchOptions::new().with_fence(true))?;
    if let Some(fence) = result.fence() {
        device.wait_for_completion_fence(fence)?;
    }
    assert!(buffer.read_to_vec()?.iter().all(|&b| b == 3));
    Ok(())
}

#[test]
fn test_context_options_from_json() -> Result<()> {
    let options: ContextOptions = serde_json::from_str(
        r#"{ "context_name": "from-json", "enable_debug_mode": true, "cpu_num_of_threads": 2 }"#,
    )
    .expect("valid options");
    assert_eq!(options.context_name, "from-json");
    assert!(options.is_backend_enabled(BackendType::Cpu));

    let env = TestEnv::isolated_with(options)?;
    assert_eq!(env.context().options().context_name, "from-json");
    assert!(env.context().has_backend(BackendType::Cpu));
    Ok(())
}

#[test]
fn test_selector_resolves_cpu() -> Result<()> {
    let env = TestEnv::shared()?;
    let index = DeviceSelector::parse("cpu")?.resolve(env.context())?;
    let device = env.context().query_device(index)?;
    assert_eq!(device.backend_type(), BackendType::Cpu);
    Ok(())
}
