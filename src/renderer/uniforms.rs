//! The uniform ring: one buffer split into [`MAX_FRAMES_IN_FLIGHT`] slots of
//! [`Uniforms`], written round-robin by the CPU and read by the GPU, plus the
//! descriptors binding a slot to the vertex shader.
//!
//! The ring does no synchronization of its own. A slot may only be written
//! while holding the [`FrameTicket`](crate::pacing::FrameTicket) for it.

use std::mem::size_of;
use std::ptr;

use ash::{vk, Device, Instance};
use color_eyre::{eyre::eyre, Result};
use tracing::debug;

use crate::{app::AppData, transforms::Uniforms, MAX_FRAMES_IN_FLIGHT};

use super::buffers::{create_buffer, HOST_MEMORY};

/// Round the size of one slot up to the device's dynamic offset alignment.
pub(crate) fn slot_stride(size: vk::DeviceSize, min_alignment: vk::DeviceSize) -> vk::DeviceSize {
    let alignment = min_alignment.max(1);
    (size + alignment - 1) / alignment * alignment
}

/// A persistently mapped, host-coherent buffer with one [`Uniforms`] per slot.
#[derive(Clone, Debug)]
pub(crate) struct UniformRing {
    pub(crate) buffer: vk::Buffer,
    pub(crate) memory: vk::DeviceMemory,
    /// Distance in bytes between consecutive slots.
    pub(crate) stride: vk::DeviceSize,
    pub(crate) slots: usize,
    mapped: *mut u8,
}

impl Default for UniformRing {
    fn default() -> Self {
        Self {
            buffer: vk::Buffer::null(),
            memory: vk::DeviceMemory::null(),
            stride: 0,
            slots: 0,
            mapped: ptr::null_mut(),
        }
    }
}

impl UniformRing {
    /// Byte offset of `slot`, to be passed as the descriptor's dynamic offset.
    #[inline]
    pub(crate) fn offset(&self, slot: usize) -> u32 {
        (slot as vk::DeviceSize * self.stride) as u32
    }

    /// Copy `uniforms` into `slot`.
    ///
    /// # Safety
    ///
    /// The ring must be mapped, and the GPU must have finished every frame
    /// that read `slot`.
    pub(crate) unsafe fn write(&self, slot: usize, uniforms: &Uniforms) -> Result<()> {
        if self.mapped.is_null() {
            return Err(eyre!("Uniform ring is not mapped"));
        }
        if slot >= self.slots {
            return Err(eyre!(
                "Uniform slot {slot} out of range for a ring of {} slots",
                self.slots
            ));
        }

        let dst = self.mapped.add(self.offset(slot) as usize);
        ptr::copy_nonoverlapping(
            (uniforms as *const Uniforms).cast::<u8>(),
            dst,
            size_of::<Uniforms>(),
        );

        Ok(())
    }
}

/// Create the ring's buffer and map it for the rest of the app's life.
#[tracing::instrument(level = "DEBUG", skip_all)]
pub(crate) unsafe fn create_uniform_ring(
    instance: &Instance,
    device: &Device,
    data: &mut AppData,
) -> Result<()> {
    let limits = instance
        .get_physical_device_properties(data.physical_device)
        .limits;
    let stride = slot_stride(
        size_of::<Uniforms>() as vk::DeviceSize,
        limits.min_uniform_buffer_offset_alignment,
    );
    let size = stride * MAX_FRAMES_IN_FLIGHT as vk::DeviceSize;

    let (buffer, memory) = create_buffer(
        instance,
        device,
        data,
        size,
        vk::BufferUsageFlags::UNIFORM_BUFFER,
        HOST_MEMORY,
    )?;
    let mapped = device.map_memory(memory, 0, size, vk::MemoryMapFlags::empty())?;

    debug!(stride, slots = MAX_FRAMES_IN_FLIGHT, "Created uniform ring");

    data.uniform_ring = UniformRing {
        buffer,
        memory,
        stride,
        slots: MAX_FRAMES_IN_FLIGHT,
        mapped: mapped.cast(),
    };

    // Start every slot off with a valid transform.
    for slot in 0..MAX_FRAMES_IN_FLIGHT {
        data.uniform_ring.write(slot, &Uniforms::default())?;
    }

    Ok(())
}

/// Unmap and free the ring created by [`create_uniform_ring()`].
pub(crate) unsafe fn destroy_uniform_ring(device: &Device, data: &mut AppData) {
    if !data.uniform_ring.mapped.is_null() {
        device.unmap_memory(data.uniform_ring.memory);
    }
    device.destroy_buffer(data.uniform_ring.buffer, None);
    device.free_memory(data.uniform_ring.memory, None);
    data.uniform_ring = UniformRing::default();
}

/// Create the descriptor set layout describing how the vertex shader sees the
/// ring. Call this before creating the pipeline - it needs this info.
#[tracing::instrument(level = "DEBUG", skip_all)]
pub(crate) unsafe fn create_descriptor_set_layout(
    device: &Device,
    data: &mut AppData,
) -> Result<()> {
    // A dynamic uniform buffer lets every frame pick its slot with an offset
    // at bind time, rather than needing a descriptor set per slot.
    let uniforms_binding = vk::DescriptorSetLayoutBinding::builder()
        .binding(0)
        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
        .descriptor_count(1)
        .stage_flags(vk::ShaderStageFlags::VERTEX);

    let info = vk::DescriptorSetLayoutCreateInfo::builder()
        .bindings(std::slice::from_ref(&uniforms_binding));

    data.descriptor_set_layout = device.create_descriptor_set_layout(&info, None)?;

    Ok(())
}

/// Allocate the single descriptor set and point it at the ring. The range is
/// one slot; the dynamic offset chooses which.
#[tracing::instrument(level = "DEBUG", skip_all)]
pub(crate) unsafe fn create_descriptor_set(device: &Device, data: &mut AppData) -> Result<()> {
    let pool_size = vk::DescriptorPoolSize::builder()
        .ty(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
        .descriptor_count(1);

    let info = vk::DescriptorPoolCreateInfo::builder()
        .pool_sizes(std::slice::from_ref(&pool_size))
        .max_sets(1);

    data.descriptor_pool = device.create_descriptor_pool(&info, None)?;

    let layouts = &[data.descriptor_set_layout];
    let info = vk::DescriptorSetAllocateInfo::builder()
        .descriptor_pool(data.descriptor_pool)
        .set_layouts(layouts);

    data.descriptor_set = device.allocate_descriptor_sets(&info)?[0];

    let buffer_info = vk::DescriptorBufferInfo::builder()
        .buffer(data.uniform_ring.buffer)
        .offset(0)
        .range(size_of::<Uniforms>() as vk::DeviceSize);

    let write = vk::WriteDescriptorSet::builder()
        .dst_set(data.descriptor_set)
        .dst_binding(0)
        .dst_array_element(0)
        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
        .buffer_info(std::slice::from_ref(&buffer_info));

    device.update_descriptor_sets(&[*write], &[] as &[vk::CopyDescriptorSet]);

    Ok(())
}

/// Destroy the descriptor pool, which also frees the set allocated from it.
pub(crate) unsafe fn destroy_descriptor_pool(device: &Device, data: &AppData) {
    device.destroy_descriptor_pool(data.descriptor_pool, None);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stride_rounds_up_to_alignment() {
        assert_eq!(slot_stride(64, 256), 256);
        assert_eq!(slot_stride(64, 64), 64);
        assert_eq!(slot_stride(64, 16), 64);
        assert_eq!(slot_stride(300, 256), 512);
    }

    #[test]
    fn zero_alignment_means_tightly_packed() {
        assert_eq!(slot_stride(64, 0), 64);
    }

    #[test]
    fn slots_do_not_overlap() {
        let ring = UniformRing {
            stride: slot_stride(size_of::<Uniforms>() as vk::DeviceSize, 256),
            slots: 3,
            ..Default::default()
        };

        for slot in 1..ring.slots {
            let gap = ring.offset(slot) - ring.offset(slot - 1);
            assert!(gap as usize >= size_of::<Uniforms>());
            assert_eq!(ring.offset(slot) % 256, 0);
        }
    }

    #[test]
    fn writes_land_in_their_slot() {
        let stride = slot_stride(size_of::<Uniforms>() as vk::DeviceSize, 256);
        let mut backing = vec![0u8; stride as usize * 3];
        let ring = UniformRing {
            stride,
            slots: 3,
            mapped: backing.as_mut_ptr(),
            ..Default::default()
        };

        let mut uniforms = Uniforms::default();
        uniforms.mvp[(0, 3)] = 42.0;
        unsafe { ring.write(2, &uniforms).unwrap() };

        let start = ring.offset(2) as usize;
        let written = unsafe {
            std::ptr::read_unaligned(backing[start..].as_ptr().cast::<Uniforms>())
        };
        assert_eq!(written, uniforms);
        assert!(backing[..start].iter().all(|b| *b == 0));
    }

    #[test]
    fn out_of_range_slot_is_rejected() {
        let mut backing = vec![0u8; 64];
        let ring = UniformRing {
            stride: 64,
            slots: 1,
            mapped: backing.as_mut_ptr(),
            ..Default::default()
        };

        assert!(unsafe { ring.write(1, &Uniforms::default()) }.is_err());
    }
}
