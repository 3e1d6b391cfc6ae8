//! Buffer management for vertex data and uniforms
//!
//! A [`Buffer`] owns one `vk::Buffer` and its memory. Its size is described by
//! a [`BufferLayout`]: `instance_count` elements of `instance_size` bytes, each
//! padded up to the device's minimum offset alignment so that any element can
//! be bound on its own. Host-visible memory that is not coherent also needs
//! each element slot to start on a `nonCoherentAtomSize` boundary before it can
//! be flushed on its own, see [`BufferLayout::mapped_slot_alignment`].

use ash::{vk, Device};
use bytemuck::Pod;
use std::ptr::NonNull;

use crate::render::vulkan::{VulkanContext, VulkanError, VulkanResult};

/// Size bookkeeping for a buffer holding an array of equally sized elements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferLayout {
    /// Unpadded size of one element
    pub instance_size: vk::DeviceSize,
    /// Number of elements
    pub instance_count: u32,
    /// Element stride, `instance_size` rounded up to the offset alignment
    pub alignment_size: vk::DeviceSize,
    /// Total size in bytes
    pub buffer_size: vk::DeviceSize,
}

impl BufferLayout {
    /// Compute the layout; an alignment of 0 leaves elements unpadded
    pub const fn new(
        instance_size: vk::DeviceSize,
        instance_count: u32,
        min_offset_alignment: vk::DeviceSize,
    ) -> Self {
        let alignment_size = Self::alignment(instance_size, min_offset_alignment);
        Self {
            instance_size,
            instance_count,
            alignment_size,
            buffer_size: alignment_size * instance_count as vk::DeviceSize,
        }
    }

    /// Smallest multiple of `min_offset_alignment` that holds `instance_size` bytes
    pub const fn alignment(
        instance_size: vk::DeviceSize,
        min_offset_alignment: vk::DeviceSize,
    ) -> vk::DeviceSize {
        if min_offset_alignment > 0 {
            instance_size.div_ceil(min_offset_alignment) * min_offset_alignment
        } else {
            instance_size
        }
    }

    /// Stride alignment for elements that are bound and flushed one at a time
    ///
    /// Both limits are powers of two, so the larger one is a multiple of the
    /// smaller and every slot offset satisfies both.
    pub const fn mapped_slot_alignment(
        min_offset_alignment: vk::DeviceSize,
        non_coherent_atom_size: vk::DeviceSize,
    ) -> vk::DeviceSize {
        if min_offset_alignment > non_coherent_atom_size {
            min_offset_alignment
        } else {
            non_coherent_atom_size
        }
    }

    /// Byte offset of element `index`
    pub fn offset_of(&self, index: u32) -> VulkanResult<vk::DeviceSize> {
        if index >= self.instance_count {
            return Err(VulkanError::OutOfBounds {
                offset: vk::DeviceSize::from(index) * self.alignment_size,
                size: self.instance_size,
                capacity: self.buffer_size,
            });
        }
        Ok(vk::DeviceSize::from(index) * self.alignment_size)
    }

    /// `(offset, size)` of the unpadded bytes of element `index`
    pub fn element_range(&self, index: u32) -> VulkanResult<(vk::DeviceSize, vk::DeviceSize)> {
        Ok((self.offset_of(index)?, self.instance_size))
    }

    /// `(offset, size)` of the whole padded slot of element `index`
    pub fn slot_range(&self, index: u32) -> VulkanResult<(vk::DeviceSize, vk::DeviceSize)> {
        Ok((self.offset_of(index)?, self.alignment_size))
    }
}

/// Copy `data` into a host-mapped region
///
/// `size == vk::WHOLE_SIZE` copies `buffer_size` bytes from the start of the
/// region, ignoring `offset`. Ranges outside `mapped` are rejected.
pub fn copy_to_mapped(
    mapped: &mut [u8],
    data: &[u8],
    size: vk::DeviceSize,
    offset: vk::DeviceSize,
    buffer_size: vk::DeviceSize,
) -> VulkanResult<()> {
    let (offset, size) = if size == vk::WHOLE_SIZE {
        (0, buffer_size)
    } else {
        (offset, size)
    };

    let capacity = mapped.len() as vk::DeviceSize;
    let out_of_bounds = VulkanError::OutOfBounds { offset, size, capacity };
    let end = offset
        .checked_add(size)
        .filter(|&end| end <= capacity)
        .ok_or(out_of_bounds)?;

    if (data.len() as vk::DeviceSize) < size {
        return Err(VulkanError::InvalidOperation {
            reason: format!("Source holds {} bytes, {size} requested", data.len()),
        });
    }

    let (start, end, len) = (to_usize(offset)?, to_usize(end)?, to_usize(size)?);
    mapped[start..end].copy_from_slice(&data[..len]);
    Ok(())
}

/// [`copy_to_mapped`] for a region that may not be mapped yet
pub fn write_mapped(
    mapped: Option<&mut [u8]>,
    data: &[u8],
    size: vk::DeviceSize,
    offset: vk::DeviceSize,
    buffer_size: vk::DeviceSize,
) -> VulkanResult<()> {
    let mapped = mapped.ok_or(VulkanError::BufferNotMapped)?;
    copy_to_mapped(mapped, data, size, offset, buffer_size)
}

fn to_usize(value: vk::DeviceSize) -> VulkanResult<usize> {
    usize::try_from(value).map_err(|_| VulkanError::InvalidOperation {
        reason: format!("{value} bytes do not fit in host memory"),
    })
}

struct MappedRegion {
    ptr: NonNull<u8>,
    len: usize,
}

/// Buffer wrapper with memory management
pub struct Buffer {
    device: Device,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    layout: BufferLayout,
    usage_flags: vk::BufferUsageFlags,
    memory_property_flags: vk::MemoryPropertyFlags,
    mapped: Option<MappedRegion>,
}

impl Buffer {
    /// Create a buffer for `instance_count` elements of `instance_size` bytes
    pub fn new(
        context: &VulkanContext,
        instance_size: vk::DeviceSize,
        instance_count: u32,
        usage_flags: vk::BufferUsageFlags,
        memory_property_flags: vk::MemoryPropertyFlags,
        min_offset_alignment: vk::DeviceSize,
    ) -> VulkanResult<Self> {
        let layout = BufferLayout::new(instance_size, instance_count, min_offset_alignment);
        if layout.buffer_size == 0 {
            return Err(VulkanError::InvalidOperation {
                reason: "Cannot create an empty buffer".to_string(),
            });
        }

        let (buffer, memory) =
            context.create_buffer(layout.buffer_size, usage_flags, memory_property_flags)?;

        Ok(Self {
            device: context.device().clone(),
            buffer,
            memory,
            layout,
            usage_flags,
            memory_property_flags,
            mapped: None,
        })
    }

    /// Map `size` bytes starting at `offset`; `vk::WHOLE_SIZE` maps to the end
    pub fn map(&mut self, size: vk::DeviceSize, offset: vk::DeviceSize) -> VulkanResult<()> {
        if !self
            .memory_property_flags
            .contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
        {
            return Err(VulkanError::InvalidOperation {
                reason: "Cannot map memory that is not host visible".to_string(),
            });
        }
        self.unmap();

        let len = if size == vk::WHOLE_SIZE {
            self.layout.buffer_size.saturating_sub(offset)
        } else {
            size
        };
        if offset.saturating_add(len) > self.layout.buffer_size {
            return Err(VulkanError::OutOfBounds {
                offset,
                size: len,
                capacity: self.layout.buffer_size,
            });
        }

        let len = to_usize(len)?;

        let ptr = unsafe {
            self.device
                .map_memory(self.memory, offset, size, vk::MemoryMapFlags::empty())
                .map_err(VulkanError::Api)?
        };
        let Some(ptr) = NonNull::new(ptr.cast::<u8>()) else {
            unsafe { self.device.unmap_memory(self.memory) };
            return Err(VulkanError::BufferNotMapped);
        };
        self.mapped = Some(MappedRegion { ptr, len });
        Ok(())
    }

    /// Map the whole buffer
    pub fn map_all(&mut self) -> VulkanResult<()> {
        self.map(vk::WHOLE_SIZE, 0)
    }

    /// Release the mapping; does nothing when unmapped
    pub fn unmap(&mut self) {
        if self.mapped.take().is_some() {
            unsafe {
                self.device.unmap_memory(self.memory);
            }
        }
    }

    /// Whether host memory is currently mapped
    pub const fn is_mapped(&self) -> bool {
        self.mapped.is_some()
    }

    fn mapped_bytes(&mut self) -> Option<&mut [u8]> {
        let region = self.mapped.as_ref()?;
        // The region stays valid until unmap, which needs `&mut self`.
        Some(unsafe { std::slice::from_raw_parts_mut(region.ptr.as_ptr(), region.len) })
    }

    /// Copy raw bytes into the mapped region
    ///
    /// `size == vk::WHOLE_SIZE` copies the whole buffer from the start of the
    /// mapping regardless of `offset`.
    pub fn write_to_buffer(
        &mut self,
        data: &[u8],
        size: vk::DeviceSize,
        offset: vk::DeviceSize,
    ) -> VulkanResult<()> {
        let buffer_size = self.layout.buffer_size;
        write_mapped(self.mapped_bytes(), data, size, offset, buffer_size)
    }

    /// Copy a plain value into the mapped region at `offset`
    pub fn write_value<T: Pod>(&mut self, value: &T, offset: vk::DeviceSize) -> VulkanResult<()> {
        let bytes = bytemuck::bytes_of(value);
        self.write_to_buffer(bytes, bytes.len() as vk::DeviceSize, offset)
    }

    /// Copy one element's worth of bytes to element `index`
    pub fn write_to_index(&mut self, data: &[u8], index: u32) -> VulkanResult<()> {
        let (offset, size) = self.layout.element_range(index)?;
        self.write_to_buffer(data, size, offset)
    }

    /// Make host writes in a range visible to the device (non-coherent memory)
    pub fn flush(&self, size: vk::DeviceSize, offset: vk::DeviceSize) -> VulkanResult<()> {
        let range = self.memory_range(size, offset);
        unsafe {
            self.device
                .flush_mapped_memory_ranges(&[range])
                .map_err(VulkanError::Api)
        }
    }

    /// Make device writes in a range visible to the host (non-coherent memory)
    pub fn invalidate(&self, size: vk::DeviceSize, offset: vk::DeviceSize) -> VulkanResult<()> {
        let range = self.memory_range(size, offset);
        unsafe {
            self.device
                .invalidate_mapped_memory_ranges(&[range])
                .map_err(VulkanError::Api)
        }
    }

    /// Flush the aligned slot of element `index`
    ///
    /// On non-coherent memory the layout must come from
    /// [`BufferLayout::mapped_slot_alignment`] for the range to be valid.
    pub fn flush_index(&self, index: u32) -> VulkanResult<()> {
        let (offset, size) = self.layout.slot_range(index)?;
        self.flush(size, offset)
    }

    /// Invalidate the aligned slot of element `index`
    pub fn invalidate_index(&self, index: u32) -> VulkanResult<()> {
        let (offset, size) = self.layout.slot_range(index)?;
        self.invalidate(size, offset)
    }

    fn memory_range(&self, size: vk::DeviceSize, offset: vk::DeviceSize) -> vk::MappedMemoryRange {
        vk::MappedMemoryRange::builder()
            .memory(self.memory)
            .offset(offset)
            .size(size)
            .build()
    }

    /// Descriptor referencing `size` bytes at `offset`
    pub const fn descriptor_info(
        &self,
        size: vk::DeviceSize,
        offset: vk::DeviceSize,
    ) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo {
            buffer: self.buffer,
            offset,
            range: size,
        }
    }

    /// Descriptor referencing exactly one aligned element
    pub fn descriptor_info_for_index(&self, index: u32) -> VulkanResult<vk::DescriptorBufferInfo> {
        let (offset, size) = self.layout.slot_range(index)?;
        Ok(self.descriptor_info(size, offset))
    }

    /// Get buffer handle
    pub const fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Size bookkeeping
    pub const fn layout(&self) -> BufferLayout {
        self.layout
    }

    /// Total size in bytes
    pub const fn buffer_size(&self) -> vk::DeviceSize {
        self.layout.buffer_size
    }

    /// Unpadded size of one element
    pub const fn instance_size(&self) -> vk::DeviceSize {
        self.layout.instance_size
    }

    /// Number of elements
    pub const fn instance_count(&self) -> u32 {
        self.layout.instance_count
    }

    /// Padded element stride
    pub const fn alignment_size(&self) -> vk::DeviceSize {
        self.layout.alignment_size
    }

    /// Usage the buffer was created with
    pub const fn usage_flags(&self) -> vk::BufferUsageFlags {
        self.usage_flags
    }

    /// Memory properties the buffer was created with
    pub const fn memory_property_flags(&self) -> vk::MemoryPropertyFlags {
        self.memory_property_flags
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.unmap();
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment_rounds_up_to_multiple() {
        assert_eq!(BufferLayout::alignment(76, 256), 256);
        assert_eq!(BufferLayout::alignment(300, 256), 512);
        assert_eq!(BufferLayout::alignment(256, 256), 256);
        assert_eq!(BufferLayout::alignment(1, 64), 64);
    }

    #[test]
    fn test_zero_alignment_keeps_instance_size() {
        assert_eq!(BufferLayout::alignment(76, 0), 76);
        assert_eq!(BufferLayout::new(76, 3, 0).buffer_size, 228);
    }

    #[test]
    fn test_alignment_is_smallest_covering_multiple() {
        for alignment in [1_u64, 4, 16, 64, 100, 256] {
            for size in 1_u64..600 {
                let aligned = BufferLayout::alignment(size, alignment);
                assert_eq!(aligned % alignment, 0);
                assert!(aligned >= size);
                assert!(aligned - size < alignment);
            }
        }
    }

    #[test]
    fn test_buffer_size_is_stride_times_count() {
        let layout = BufferLayout::new(300, 3, 256);
        assert_eq!(layout.alignment_size, 512);
        assert_eq!(layout.buffer_size, layout.alignment_size * 3);
    }

    #[test]
    fn test_offset_of_rejects_out_of_range_index() {
        let layout = BufferLayout::new(76, 2, 256);
        assert_eq!(layout.offset_of(1).unwrap(), 256);
        assert!(matches!(layout.offset_of(2), Err(VulkanError::OutOfBounds { .. })));
    }

    #[test]
    fn test_uniform_slots_start_on_atom_boundaries() {
        // 16-byte offset alignment with 128-byte atoms
        let alignment = BufferLayout::mapped_slot_alignment(16, 128);
        let layout = BufferLayout::new(480, 2, alignment);

        assert_eq!(layout.alignment_size, 512);
        for index in 0..2 {
            let (offset, size) = layout.slot_range(index).unwrap();
            assert_eq!(offset % 128, 0);
            assert_eq!(size % 128, 0);
            assert!(offset + size <= layout.buffer_size);
        }
    }

    #[test]
    fn test_mapped_slot_alignment_satisfies_both_limits() {
        let limits = [1_u64, 4, 16, 64, 256];
        for &min_offset in &limits {
            for &atom in &limits {
                let alignment = BufferLayout::mapped_slot_alignment(min_offset, atom);
                assert_eq!(alignment % min_offset, 0);
                assert_eq!(alignment % atom, 0);
                let layout = BufferLayout::new(76, 3, alignment);
                for index in 0..3 {
                    let (offset, _) = layout.slot_range(index).unwrap();
                    assert_eq!(offset % min_offset, 0);
                    assert_eq!(offset % atom, 0);
                }
            }
        }
    }

    #[test]
    fn test_element_and_slot_ranges() {
        let layout = BufferLayout::new(76, 2, 256);
        assert_eq!(layout.element_range(1).unwrap(), (256, 76));
        assert_eq!(layout.slot_range(1).unwrap(), (256, 256));
        assert!(matches!(layout.element_range(2), Err(VulkanError::OutOfBounds { .. })));
        assert!(matches!(layout.slot_range(2), Err(VulkanError::OutOfBounds { .. })));
    }

    #[test]
    fn test_write_to_unmapped_region_is_rejected() {
        let result = write_mapped(None, &[1_u8; 8], 8, 0, 16);
        assert!(matches!(result, Err(VulkanError::BufferNotMapped)));
    }

    #[test]
    fn test_indexed_writes_do_not_overlap() {
        let layout = BufferLayout::new(76, 2, 256);
        let mut memory = vec![0_u8; layout.buffer_size as usize];
        let first = [0xAA_u8; 76];
        let second = [0x55_u8; 76];

        for (index, data) in [(0, &first), (1, &second)] {
            let (offset, size) = layout.element_range(index).unwrap();
            write_mapped(Some(memory.as_mut_slice()), data, size, offset, layout.buffer_size).unwrap();
        }

        assert!(memory[..76].iter().all(|&b| b == 0xAA));
        assert!(memory[76..256].iter().all(|&b| b == 0));
        assert!(memory[256..332].iter().all(|&b| b == 0x55));
        assert!(memory[332..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_whole_size_write_ignores_offset() {
        let mut memory = vec![0_u8; 8];
        let data = [7_u8; 8];
        copy_to_mapped(&mut memory, &data, vk::WHOLE_SIZE, 4, 8).unwrap();
        assert_eq!(memory, data);
    }

    #[test]
    fn test_write_past_mapped_range_is_rejected() {
        let mut memory = vec![0_u8; 16];
        let result = copy_to_mapped(&mut memory, &[1_u8; 8], 8, 12, 16);
        assert!(matches!(
            result,
            Err(VulkanError::OutOfBounds { offset: 12, size: 8, capacity: 16 })
        ));
        assert!(memory.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_short_source_is_rejected() {
        let mut memory = vec![0_u8; 16];
        let result = copy_to_mapped(&mut memory, &[1_u8; 4], 8, 0, 16);
        assert!(matches!(result, Err(VulkanError::InvalidOperation { .. })));
    }
}
