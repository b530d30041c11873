use lumen_backends::{CopyRequest, FillRequest};

use super::{byte_range, BufferCommon, LockedSet, MappedMemory, MappedMemoryRead};
use crate::error::{Error, Result};
use crate::launch::{BufferLaunchOptions, LaunchResult};

/// Copy `size` source elements from `source[source_offset..]` to
/// `destination[dest_offset..]`.
///
/// Either side may be a buffer or a view; each offset is counted in that
/// side's elements and must land on a whole element of the owning buffer.
/// Buffers on different devices are copied through host mappings, which
/// requires a readable source and a writable destination.
#[tracing::instrument(
    skip_all,
    fields(
        source_offset = options.source_offset,
        dest_offset = options.dest_offset,
        queue = options.queue_index,
        label = options.label.as_deref().unwrap_or("")
    )
)]
pub fn copy<S, D>(source: &S, destination: &D, options: &BufferLaunchOptions) -> Result<LaunchResult>
where
    S: BufferCommon + ?Sized,
    D: BufferCommon + ?Sized,
{
    let (src_offset, len) = byte_range(source, options.source_offset, options.size)?;
    let dst_element = destination.element_size();
    if len % dst_element != 0 {
        return Err(Error::NonIntegralReinterp {
            count: len / source.element_size(),
            view_size: source.element_size(),
            root_size: dst_element,
        });
    }
    let (dst_offset, _) = byte_range(destination, options.dest_offset, Some(len / dst_element))?;
    if len == 0 {
        return Ok(LaunchResult::Immediate);
    }

    let src_raw = source.raw_buffer();
    let dst_raw = destination.raw_buffer();
    if !src_raw.same_device(dst_raw) {
        let staged = MappedMemoryRead::<u8>::new(src_raw)?;
        let mut target = MappedMemory::<u8>::new(dst_raw)?;
        target.as_mut_slice()[dst_offset..dst_offset + len].copy_from_slice(&staged.as_slice()[src_offset..src_offset + len]);
        tracing::debug!(bytes = len, "copied across devices through the host");
        return Ok(LaunchResult::Immediate);
    }

    let locked = LockedSet::lock(&[src_raw, dst_raw]);
    locked.ensure_unmapped("copy")?;
    let request = CopyRequest {
        src: locked.handle(src_raw)?,
        src_offset,
        dst: locked.handle(dst_raw)?,
        dst_offset,
        len,
        queue: options.queue_index,
        want_fence: options.request_fence,
    };
    let submission = src_raw.device.backend.copy(request)?;
    lumen_tracing::perf_event!("copy", bytes = len, queue = options.queue_index);
    Ok(LaunchResult::from_submission(submission, options.request_fence))
}

/// Fill an element range of `view` with `pattern`, one element's bytes.
#[tracing::instrument(
    skip_all,
    fields(dest_offset = options.dest_offset, queue = options.queue_index, label = options.label.as_deref().unwrap_or(""))
)]
pub(crate) fn fill<B>(view: &B, pattern: &[u8], options: &BufferLaunchOptions) -> Result<LaunchResult>
where
    B: BufferCommon + ?Sized,
{
    let (offset, len) = byte_range(view, options.dest_offset, options.size)?;
    if len == 0 {
        return Ok(LaunchResult::Immediate);
    }

    let raw = view.raw_buffer();
    let locked = LockedSet::lock(&[raw]);
    locked.ensure_unmapped("fill")?;
    let request = FillRequest {
        dst: locked.handle(raw)?,
        offset,
        len,
        pattern: pattern.to_vec(),
        queue: options.queue_index,
        want_fence: options.request_fence,
    };
    let submission = raw.device.backend.fill(request)?;
    lumen_tracing::perf_event!("fill", bytes = len, pattern_bytes = pattern.len(), queue = options.queue_index);
    Ok(LaunchResult::from_submission(submission, options.request_fence))
}
