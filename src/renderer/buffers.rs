//! Functions for dealing with vertex buffers, index buffers, and so on.

use std::{mem::size_of_val, ptr};

use ash::{vk, Device, Instance};
use color_eyre::Result;
use tracing::debug;

use crate::{app::AppData, vertex::Mesh};

use super::memory::get_memory_type_index;

/// Memory the CPU can write into directly, without explicit flushes.
pub(crate) const HOST_MEMORY: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);

/// Create a buffer and bind freshly allocated memory to it.
pub(crate) unsafe fn create_buffer(
    instance: &Instance,
    device: &Device,
    data: &AppData,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    properties: vk::MemoryPropertyFlags,
) -> Result<(vk::Buffer, vk::DeviceMemory)> {
    let buffer_info = vk::BufferCreateInfo::builder()
        .size(size)
        .usage(usage)
        // only ever used from the graphics queue
        .sharing_mode(vk::SharingMode::EXCLUSIVE);

    let buffer = device.create_buffer(&buffer_info, None)?;

    let requirements = device.get_buffer_memory_requirements(buffer);
    let memory_info = vk::MemoryAllocateInfo::builder()
        .allocation_size(requirements.size)
        .memory_type_index(get_memory_type_index(
            instance,
            data.physical_device,
            properties,
            requirements,
        )?);

    let memory = device.allocate_memory(&memory_info, None)?;
    device.bind_buffer_memory(buffer, memory, 0)?;

    Ok((buffer, memory))
}

/// Create a host-visible buffer holding a copy of `contents`.
unsafe fn create_buffer_with_contents<T: Copy>(
    instance: &Instance,
    device: &Device,
    data: &AppData,
    contents: &[T],
    usage: vk::BufferUsageFlags,
) -> Result<(vk::Buffer, vk::DeviceMemory)> {
    let size = size_of_val(contents) as vk::DeviceSize;
    let (buffer, memory) = create_buffer(instance, device, data, size, usage, HOST_MEMORY)?;

    let mapped = device.map_memory(memory, 0, size, vk::MemoryMapFlags::empty())?;
    ptr::copy_nonoverlapping(contents.as_ptr(), mapped.cast(), contents.len());
    device.unmap_memory(memory);

    Ok((buffer, memory))
}

/// Upload a mesh's vertices, and its indices if it has any. Written once at
/// setup and only read by the GPU afterwards.
#[tracing::instrument(level = "DEBUG", skip_all)]
pub(crate) unsafe fn create_mesh_buffers(
    instance: &Instance,
    device: &Device,
    data: &mut AppData,
    mesh: &Mesh,
) -> Result<()> {
    let (vertex_buffer, vertex_buffer_memory) = create_buffer_with_contents(
        instance,
        device,
        data,
        mesh.vertices,
        vk::BufferUsageFlags::VERTEX_BUFFER,
    )?;
    data.vertex_buffer = vertex_buffer;
    data.vertex_buffer_memory = vertex_buffer_memory;

    if let Some(indices) = mesh.indices {
        let (index_buffer, index_buffer_memory) = create_buffer_with_contents(
            instance,
            device,
            data,
            indices,
            vk::BufferUsageFlags::INDEX_BUFFER,
        )?;
        data.index_buffer = index_buffer;
        data.index_buffer_memory = index_buffer_memory;
    }

    data.mesh = Some(*mesh);

    debug!(
        vertex_count = mesh.vertices.len(),
        index_count = mesh.indices.map_or(0, <[_]>::len),
        "Uploaded mesh"
    );

    Ok(())
}

/// Destroy the buffers created in [`create_mesh_buffers()`]. Buffers that were
/// never created are null handles, which Vulkan ignores.
pub(crate) unsafe fn destroy_mesh_buffers(device: &Device, data: &AppData) {
    device.destroy_buffer(data.vertex_buffer, None);
    device.free_memory(data.vertex_buffer_memory, None);
    device.destroy_buffer(data.index_buffer, None);
    device.free_memory(data.index_buffer_memory, None);
}
