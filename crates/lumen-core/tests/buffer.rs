//! Buffer lifecycle, resize, fill, copy and mapping tests

mod common;

use common::{TestEnv, ALL_COMBINATIONS};
use lumen_core::prelude::*;
use lumen_core::{BackendError, ContextOptions, Error, ErrorKind, Result};

// ============================================================================
// Creation and sizing
// ============================================================================

#[test]
fn test_new_buffer_is_empty_with_requested_placement() -> Result<()> {
    let env = TestEnv::shared()?;
    let device = env.device()?;

    for (usage, flag) in ALL_COMBINATIONS {
        let buffer = device.create_buffer::<i32>(usage, flag)?;
        assert_eq!(buffer.size(), 0);
        assert_eq!(buffer.capacity(), 0);
        assert_eq!(buffer.usage(), usage);
        assert_eq!(buffer.flag(), flag);
        assert_eq!(buffer.element_size(), 4);
        assert!(buffer.device().same_device(&device));
    }
    Ok(())
}

#[test]
fn test_set_size_and_clear() -> Result<()> {
    let env = TestEnv::shared()?;
    let device = env.device()?;

    for (usage, flag) in ALL_COMBINATIONS {
        let buffer = device.create_buffer::<f64>(usage, flag)?;
        buffer.set_size(100)?;
        assert_eq!(buffer.size(), 100);
        assert_eq!(buffer.size_in_bytes(), 800);
        assert!(buffer.capacity() >= 100);

        buffer.clear();
        assert_eq!(buffer.size(), 0);
        assert!(buffer.capacity() >= 100);
        assert_eq!(buffer.usage(), usage);
        assert_eq!(buffer.flag(), flag);
    }
    Ok(())
}

#[test]
fn test_resize_sequence_keeps_last_size() -> Result<()> {
    let env = TestEnv::shared()?;
    let device = env.device()?;
    let buffer = device.create_buffer::<u16>(BufferUsage::PreferHost, BufferFlag::RandomAccessible)?;
    let heap_index = buffer.heap_index();
    let properties = buffer.memory_properties();

    for n in [1, 3, 10, 16, 100, 1000, 2048, 1] {
        buffer.set_size(n)?;
        assert_eq!(buffer.size(), n);
        assert_eq!(buffer.heap_index(), heap_index);
        assert_eq!(buffer.memory_properties(), properties);
        assert_eq!(buffer.usage(), BufferUsage::PreferHost);
        assert_eq!(buffer.flag(), BufferFlag::RandomAccessible);
    }
    Ok(())
}

#[test]
fn test_growing_keeps_existing_contents() -> Result<()> {
    let env = TestEnv::shared()?;
    let device = env.device()?;
    let buffer = device.create_buffer::<u32>(BufferUsage::PreferDevice, BufferFlag::RandomAccessible)?;

    buffer.write_slice(&[5, 6, 7])?;
    buffer.set_size(1000)?;
    let values = buffer.read_to_vec()?;
    assert_eq!(&values[..3], &[5, 6, 7]);
    assert!(values[3..].iter().all(|&v| v == 0));
    Ok(())
}

#[test]
fn test_zero_sized_element_is_rejected() -> Result<()> {
    let env = TestEnv::shared()?;
    let device = env.device()?;
    let result = device.create_buffer::<()>(BufferUsage::PreferDevice, BufferFlag::None);
    assert!(matches!(result, Err(Error::InvalidUsage(_))));
    Ok(())
}

// ============================================================================
// Transactional resize
// ============================================================================

#[test]
fn test_sequential_values_then_failed_resize() -> Result<()> {
    let env = TestEnv::shared()?;
    let device = env.device()?;
    let buffer = device.create_buffer::<i32>(BufferUsage::PreferDevice, BufferFlag::RandomAccessible)?;

    buffer.set_size(2048)?;
    {
        let mut mapped = buffer.map_memory()?;
        for i in 0..2048 {
            mapped.set(i, i as i32)?;
        }
    }
    {
        let mapped = buffer.map_memory_read()?;
        assert_eq!(mapped.len(), 2048);
        for i in 0..2048 {
            assert_eq!(mapped[i], i as i32);
        }
    }

    let err = buffer.set_size(usize::MAX).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Allocation);
    assert!(matches!(err, Error::Backend(BackendError::SizeOverflow { .. })));
    assert_eq!(buffer.size(), 2048);
    Ok(())
}

#[test]
fn test_failed_resize_leaves_contents_unchanged() -> Result<()> {
    let env = TestEnv::shared()?;
    let device = env.device()?;
    let buffer = device.create_buffer::<u32>(BufferUsage::PreferDevice, BufferFlag::RandomAccessible)?;
    let snapshot = device.create_buffer::<u32>(BufferUsage::PreferHost, BufferFlag::RandomAccessible)?;

    let data: Vec<u32> = (0..512).map(|i| i * 3 + 1).collect();
    buffer.write_slice(&data)?;
    let capacity = buffer.capacity();

    snapshot.set_size(buffer.size())?;
    copy(&buffer, &snapshot, &BufferLaunchOptions::new())?.wait()?;

    // Larger than the heap budget but representable in bytes.
    let err = buffer.set_size(usize::MAX / 8).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Allocation);
    assert_eq!(buffer.size(), 512);
    assert_eq!(buffer.capacity(), capacity);

    let after = device.create_buffer::<u32>(BufferUsage::PreferHost, BufferFlag::RandomAccessible)?;
    after.set_size(buffer.size())?;
    copy(&buffer, &after, &BufferLaunchOptions::new())?.wait()?;
    assert_eq!(after.read_to_vec()?, snapshot.read_to_vec()?);
    assert_eq!(after.read_to_vec()?, data);
    Ok(())
}

#[test]
fn test_heap_budget_failure_is_reported_and_tracked() -> Result<()> {
    let env = TestEnv::isolated_with(ContextOptions::default().with_cpu_threads(1).with_cpu_heap_size(4096))?;
    let device = env.device()?;
    let buffer = device.create_buffer::<u8>(BufferUsage::PreferDevice, BufferFlag::RandomAccessible)?;

    buffer.set_size(1024)?;
    let err = buffer.set_size(8192).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Allocation);
    assert_eq!(buffer.size(), 1024);

    let heap = device.memory_heap_info(buffer.heap_index()).expect("heap exists");
    assert_eq!(heap.total_size(), 4096);
    assert_eq!(heap.used_size_for_buffer().current, 1024);
    assert!(heap.used_size_for_buffer().peak >= 1024);

    drop(buffer);
    let heap = device.memory_heap_info(0).expect("heap exists");
    assert_eq!(heap.used_size_for_buffer().current, 0);
    assert!(heap.used_size_for_buffer().peak >= 1024);
    Ok(())
}

#[test]
fn test_heap_usage_agrees_across_queries() -> Result<()> {
    let env = TestEnv::isolated()?;
    let device = env.device()?;
    let buffer = device.create_buffer::<u32>(BufferUsage::PreferDevice, BufferFlag::RandomAccessible)?;
    buffer.set_size(1024)?;

    let live = device.memory_heap_info(0).expect("heap exists").used_size_for_buffer();
    let from_device = device.info().heaps()[0].used_size_for_buffer();
    let from_context = env.context().device_info_list().next().expect("one device").heaps()[0].used_size_for_buffer();
    assert_eq!(live.current, 4096);
    assert_eq!(live.peak, 4096);
    assert_eq!(from_device, live);
    assert_eq!(from_context, live);

    drop(buffer);
    let after = device.info().heaps()[0].used_size_for_buffer();
    assert_eq!(after.current, 0);
    assert_eq!(after.peak, 4096);
    Ok(())
}

// ============================================================================
// Fill and copy
// ============================================================================

#[test]
fn test_fill_region_leaves_rest_untouched() -> Result<()> {
    let env = TestEnv::shared()?;
    let device = env.device()?;
    let buffer = device.create_buffer::<u32>(BufferUsage::PreferDevice, BufferFlag::RandomAccessible)?;
    buffer.set_size(100)?;

    buffer.fill(1, &BufferLaunchOptions::new())?.wait()?;
    let result = buffer.fill(9, &BufferLaunchOptions::new().with_dest_offset(10).with_size(20))?;
    result.wait()?;

    let values = buffer.read_to_vec()?;
    assert!(values[..10].iter().all(|&v| v == 1));
    assert!(values[10..30].iter().all(|&v| v == 9));
    assert!(values[30..].iter().all(|&v| v == 1));
    Ok(())
}

#[test]
fn test_fill_out_of_range_fails() -> Result<()> {
    let env = TestEnv::shared()?;
    let device = env.device()?;
    let buffer = device.create_buffer::<u32>(BufferUsage::PreferDevice, BufferFlag::RandomAccessible)?;
    buffer.set_size(10)?;

    let result = buffer.fill(1, &BufferLaunchOptions::new().with_dest_offset(5).with_size(6));
    assert!(matches!(result, Err(Error::RangeOutOfBounds { offset: 5, size: 6, buffer_size: 10 })));
    Ok(())
}

#[test]
fn test_copy_with_offsets() -> Result<()> {
    let env = TestEnv::shared()?;
    let device = env.device()?;
    let src = device.create_buffer::<u32>(BufferUsage::PreferHost, BufferFlag::RandomAccessible)?;
    let dst = device.create_buffer::<u32>(BufferUsage::PreferDevice, BufferFlag::RandomAccessible)?;

    src.write_slice(&(0..16).collect::<Vec<u32>>())?;
    dst.set_size(16)?;

    let options = BufferLaunchOptions::new()
        .with_source_offset(4)
        .with_dest_offset(8)
        .with_size(6)
        .with_fence(true);
    copy(&src, &dst, &options)?.wait()?;

    let values = dst.read_to_vec()?;
    assert!(values[..8].iter().all(|&v| v == 0));
    assert_eq!(&values[8..14], &[4, 5, 6, 7, 8, 9]);
    assert!(values[14..].iter().all(|&v| v == 0));
    Ok(())
}

#[test]
fn test_copy_defaults_to_rest_of_source() -> Result<()> {
    let env = TestEnv::shared()?;
    let device = env.device()?;
    let src = device.create_buffer::<u8>(BufferUsage::PreferHost, BufferFlag::RandomAccessible)?;
    let dst = device.create_buffer::<u8>(BufferUsage::PreferHost, BufferFlag::RandomAccessible)?;
    src.write_slice(&[1, 2, 3, 4])?;
    dst.set_size(3)?;

    copy(&src, &dst, &BufferLaunchOptions::new().with_source_offset(1))?.wait()?;
    assert_eq!(dst.read_to_vec()?, vec![2, 3, 4]);

    let too_long = copy(&src, &dst, &BufferLaunchOptions::new());
    assert!(matches!(too_long, Err(Error::RangeOutOfBounds { .. })));
    Ok(())
}

#[test]
fn test_copy_between_devices_goes_through_host() -> Result<()> {
    let first = TestEnv::isolated()?;
    let second = TestEnv::isolated()?;
    let a = first.device()?;
    let b = second.device()?;
    assert!(!a.same_device(&b));

    let src = a.create_buffer::<i64>(BufferUsage::PreferDevice, BufferFlag::RandomAccessible)?;
    let dst = b.create_buffer::<i64>(BufferUsage::PreferDevice, BufferFlag::RandomAccessible)?;
    src.write_slice(&[-1, -2, -3])?;
    dst.set_size(3)?;

    let result = copy(&src, &dst, &BufferLaunchOptions::new())?;
    assert!(!result.is_async());
    assert_eq!(dst.read_to_vec()?, vec![-1, -2, -3]);
    Ok(())
}

#[test]
fn test_invalid_queue_is_a_configuration_error() -> Result<()> {
    let env = TestEnv::shared()?;
    let device = env.device()?;
    let buffer = device.create_buffer::<u32>(BufferUsage::PreferDevice, BufferFlag::RandomAccessible)?;
    buffer.set_size(4)?;

    let err = buffer
        .fill(0, &BufferLaunchOptions::new().with_queue(device.num_of_queues()))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    Ok(())
}

// ============================================================================
// Mapping
// ============================================================================

#[test]
fn test_default_mapping_is_empty() {
    let mapped = MappedMemory::<f32>::default();
    assert!(!mapped.is_valid());
    assert!(mapped.is_empty());
    assert_eq!(mapped.len(), 0);
}

#[test]
fn test_mapping_empty_buffer_is_invalid() -> Result<()> {
    let env = TestEnv::shared()?;
    let device = env.device()?;
    let buffer = device.create_buffer::<f32>(BufferUsage::PreferHost, BufferFlag::RandomAccessible)?;
    let mapped = buffer.map_memory()?;
    assert!(!mapped.is_valid());
    assert_eq!(mapped.len(), 0);
    Ok(())
}

#[test]
fn test_mapping_rules_follow_the_flag() -> Result<()> {
    let env = TestEnv::shared()?;
    let device = env.device()?;

    let hidden = device.create_buffer::<u32>(BufferUsage::PreferDevice, BufferFlag::None)?;
    hidden.set_size(4)?;
    assert!(matches!(hidden.map_memory(), Err(Error::NotHostVisible(_))));

    let upload = device.create_buffer::<u32>(BufferUsage::PreferHost, BufferFlag::SequentialWritable)?;
    upload.set_size(4)?;
    assert!(matches!(upload.map_memory_read(), Err(Error::InvalidUsage(_))));
    {
        let mut mapped = upload.map_memory()?;
        mapped.as_mut_slice().copy_from_slice(&[1, 2, 3, 4]);
    }
    Ok(())
}

#[test]
fn test_read_only_mapping_reads_without_committing() -> Result<()> {
    let env = TestEnv::shared()?;
    let device = env.device()?;
    let buffer = device.create_buffer::<u32>(BufferUsage::PreferHost, BufferFlag::RandomAccessible)?;
    buffer.write_slice(&[10, 20])?;

    let mapped: MappedMemoryRead<'_, u32> = buffer.map_memory_read()?;
    assert!(mapped.is_valid());
    assert_eq!(mapped[1], 20);
    assert_eq!(&mapped[..], &[10, 20]);
    assert_eq!(mapped.iter().copied().collect::<Vec<_>>(), vec![10, 20]);
    drop(mapped);

    let mut writable = buffer.map_memory()?;
    writable[0] = 11;
    writable.iter_mut().skip(1).for_each(|value| *value += 1);
    drop(writable);
    assert_eq!(buffer.read_to_vec()?, vec![11, 21]);

    assert!(!MappedMemoryRead::<u32>::default().is_valid());
    Ok(())
}

#[test]
fn test_mapping_set_is_bounds_checked() -> Result<()> {
    let env = TestEnv::shared()?;
    let device = env.device()?;
    let buffer = device.create_buffer::<u32>(BufferUsage::PreferHost, BufferFlag::RandomAccessible)?;
    buffer.set_size(4)?;

    let mut mapped = buffer.map_memory()?;
    assert!(matches!(
        mapped.set(4, 1),
        Err(Error::RangeOutOfBounds { offset: 4, size: 1, buffer_size: 4 })
    ));
    mapped[3] = 7;
    assert_eq!(mapped[3], 7);
    Ok(())
}

#[test]
fn test_live_mapping_blocks_resize_and_writers() -> Result<()> {
    let env = TestEnv::shared()?;
    let device = env.device()?;
    let buffer = device.create_buffer::<u32>(BufferUsage::PreferHost, BufferFlag::RandomAccessible)?;
    buffer.write_slice(&[1, 2, 3])?;

    {
        let first = buffer.map_memory_read()?;
        let second = buffer.map_memory_read()?;
        assert_eq!(first[0], second[0]);
        assert!(matches!(buffer.map_memory(), Err(Error::BufferMapped(_))));
        assert!(matches!(buffer.set_size(10), Err(Error::BufferMapped(_))));
        assert!(matches!(
            buffer.fill(0, &BufferLaunchOptions::new()),
            Err(Error::BufferMapped(_))
        ));
        assert_eq!(buffer.size(), 3);
    }

    buffer.set_size(10)?;
    assert_eq!(&buffer.read_to_vec()?[..3], &[1, 2, 3]);
    Ok(())
}
