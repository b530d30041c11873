//! Reinterpreted views: size scaling, chains, and views as operands

mod common;

use common::TestEnv;
use lumen_core::prelude::*;
use lumen_core::{Error, Result};

#[test]
fn test_view_sizes_scale_with_element_size() -> Result<()> {
    let env = TestEnv::shared()?;
    let device = env.device()?;
    let buffer = device.create_buffer::<u32>(BufferUsage::PreferDevice, BufferFlag::RandomAccessible)?;
    buffer.set_size(6)?;

    let bytes = buffer.reinterp::<u8>();
    assert_eq!(bytes.size(), 24);
    assert_eq!(bytes.size_in_bytes(), buffer.size_in_bytes());
    assert_eq!(bytes.capacity_in_bytes(), buffer.capacity_in_bytes());

    let wide = buffer.reinterp::<u64>();
    assert_eq!(wide.size(), 3);
    assert_eq!(wide.size_in_bytes(), 24);
    Ok(())
}

#[test]
fn test_view_resize_sets_root_bytes() -> Result<()> {
    let env = TestEnv::shared()?;
    let device = env.device()?;
    let buffer = device.create_buffer::<u32>(BufferUsage::PreferDevice, BufferFlag::RandomAccessible)?;

    let wide = buffer.reinterp::<u64>();
    wide.set_size(5)?;
    assert_eq!(buffer.size(), 10);
    assert_eq!(wide.size_in_bytes(), 40);

    let bytes = buffer.reinterp::<u8>();
    bytes.set_size(12)?;
    assert_eq!(buffer.size(), 3);

    let err = bytes.set_size(10).unwrap_err();
    assert!(matches!(
        err,
        Error::NonIntegralReinterp {
            count: 10,
            view_size: 1,
            root_size: 4
        }
    ));
    assert_eq!(buffer.size(), 3);

    bytes.clear();
    assert_eq!(buffer.size(), 0);
    Ok(())
}

#[test]
fn test_view_chain_resolves_to_root() -> Result<()> {
    let env = TestEnv::shared()?;
    let device = env.device()?;
    let buffer = device.create_buffer::<f64>(BufferUsage::PreferHost, BufferFlag::SequentialWritable)?;
    buffer.set_size(4)?;

    let bytes = buffer.reinterp::<u8>();
    let halves = bytes.reinterp::<u16>();
    let words = halves.reinterp::<u32>();

    assert!(words.has_parent());
    assert_eq!(words.parent().element_size(), 2);
    assert_eq!(words.own().element_size(), 8);
    assert_eq!(words.own().size(), 4);
    assert_eq!(words.size(), 8);

    assert_eq!(words.heap_index(), buffer.heap_index());
    assert_eq!(words.usage(), BufferUsage::PreferHost);
    assert_eq!(words.flag(), BufferFlag::SequentialWritable);
    assert_eq!(words.memory_properties(), buffer.memory_properties());
    assert_eq!(words.is_device_local(), buffer.is_device_local());
    assert_eq!(words.is_host_visible(), buffer.is_host_visible());
    assert_eq!(words.is_host_coherent(), buffer.is_host_coherent());
    assert_eq!(words.is_host_cached(), buffer.is_host_cached());
    assert_eq!(words.backend_type(), buffer.backend_type());

    halves.set_size(4)?;
    assert_eq!(buffer.size(), 1);
    assert_eq!(words.size(), 2);
    Ok(())
}

#[test]
fn test_mapping_through_view_sees_root_bytes() -> Result<()> {
    let env = TestEnv::shared()?;
    let device = env.device()?;
    let buffer = device.create_buffer::<u32>(BufferUsage::PreferHost, BufferFlag::RandomAccessible)?;
    buffer.write_slice(&[0x0102_0304, 0x0a0b_0c0d])?;

    let bytes = buffer.reinterp::<u8>();
    {
        let mapped = bytes.map_memory_read()?;
        assert_eq!(&mapped[..4], &0x0102_0304u32.to_ne_bytes());
        assert_eq!(&mapped[4..], &0x0a0b_0c0du32.to_ne_bytes());
    }
    {
        let mut mapped = bytes.map_memory()?;
        mapped.as_mut_slice()[4..].copy_from_slice(&7u32.to_ne_bytes());
    }
    assert_eq!(buffer.read_to_vec()?, vec![0x0102_0304, 7]);
    Ok(())
}

#[test]
fn test_fill_through_view_scales_offsets() -> Result<()> {
    let env = TestEnv::shared()?;
    let device = env.device()?;
    let buffer = device.create_buffer::<u32>(BufferUsage::PreferDevice, BufferFlag::RandomAccessible)?;
    buffer.set_size(4)?;

    let bytes = buffer.reinterp::<u8>();
    bytes
        .fill(0xff, &BufferLaunchOptions::new().with_dest_offset(4).with_size(4))?
        .wait()?;
    assert_eq!(buffer.read_to_vec()?, vec![0, u32::MAX, 0, 0]);

    let halves = buffer.reinterp::<u16>();
    halves.fill(0xabcd, &BufferLaunchOptions::new().with_dest_offset(4))?.wait()?;
    assert_eq!(buffer.read_to_vec()?, vec![0, u32::MAX, 0xabcd_abcd, 0xabcd_abcd]);

    let misaligned = bytes.fill(1, &BufferLaunchOptions::new().with_dest_offset(1).with_size(4));
    assert!(matches!(misaligned, Err(Error::NonIntegralReinterp { .. })));
    let partial = bytes.fill(1, &BufferLaunchOptions::new().with_size(3));
    assert!(matches!(partial, Err(Error::NonIntegralReinterp { .. })));
    Ok(())
}

#[test]
fn test_copy_between_views() -> Result<()> {
    let env = TestEnv::shared()?;
    let device = env.device()?;
    let src = device.create_buffer::<u32>(BufferUsage::PreferHost, BufferFlag::RandomAccessible)?;
    let dst = device.create_buffer::<u64>(BufferUsage::PreferDevice, BufferFlag::RandomAccessible)?;
    src.write_slice(&[1, 2, 3, 4, 5, 6])?;
    dst.set_size(2)?;

    // Source elements 2..6 land on the destination as two u64 values.
    let dst_words = dst.reinterp::<u32>();
    copy(&src, &dst_words, &BufferLaunchOptions::new().with_source_offset(2))?.wait()?;
    assert_eq!(&dst_words.map_memory_read()?[..], &[3, 4, 5, 6]);

    let src_bytes = src.reinterp::<u8>();
    let odd = copy(&src_bytes, &dst, &BufferLaunchOptions::new().with_size(4));
    assert!(matches!(odd, Err(Error::NonIntegralReinterp { .. })));
    let unaligned = copy(&src_bytes, &dst_words, &BufferLaunchOptions::new().with_source_offset(2).with_size(4));
    assert!(matches!(unaligned, Err(Error::NonIntegralReinterp { .. })));
    Ok(())
}
