//! Picking memory types for allocations.

use ash::{vk, Instance};
use color_eyre::{eyre::eyre, Result};

/// Index of the first memory type that the resource may live in and that has
/// all of `properties`.
pub(crate) fn find_memory_type(
    memory: &vk::PhysicalDeviceMemoryProperties,
    properties: vk::MemoryPropertyFlags,
    requirements: vk::MemoryRequirements,
) -> Option<u32> {
    (0..memory.memory_type_count).find(|i| {
        let allowed = (requirements.memory_type_bits & (1 << i)) != 0;
        allowed
            && memory.memory_types[*i as usize]
                .property_flags
                .contains(properties)
    })
}

/// Like [`find_memory_type()`], querying the selected GPU's memory types.
pub(crate) unsafe fn get_memory_type_index(
    instance: &Instance,
    physical_device: vk::PhysicalDevice,
    properties: vk::MemoryPropertyFlags,
    requirements: vk::MemoryRequirements,
) -> Result<u32> {
    let memory = instance.get_physical_device_memory_properties(physical_device);

    find_memory_type(&memory, properties, requirements).ok_or_else(|| {
        eyre!(
            "Failed to find a memory type with {:?} among allowed types {:#b}",
            properties,
            requirements.memory_type_bits
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    type Flags = vk::MemoryPropertyFlags;

    fn memory_with(types: &[Flags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut memory = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (slot, flags) in memory.memory_types.iter_mut().zip(types) {
            slot.property_flags = *flags;
        }
        memory
    }

    fn allowing(bits: u32) -> vk::MemoryRequirements {
        vk::MemoryRequirements {
            memory_type_bits: bits,
            ..Default::default()
        }
    }

    #[test]
    fn picks_first_allowed_type_with_all_properties() {
        let memory = memory_with(&[
            Flags::DEVICE_LOCAL,
            Flags::HOST_VISIBLE,
            Flags::HOST_VISIBLE | Flags::HOST_COHERENT,
        ]);
        let host = Flags::HOST_VISIBLE | Flags::HOST_COHERENT;

        assert_eq!(find_memory_type(&memory, host, allowing(0b111)), Some(2));
        assert_eq!(find_memory_type(&memory, Flags::HOST_VISIBLE, allowing(0b111)), Some(1));
    }

    #[test]
    fn respects_the_resources_allowed_types() {
        let memory = memory_with(&[Flags::DEVICE_LOCAL, Flags::DEVICE_LOCAL]);

        assert_eq!(find_memory_type(&memory, Flags::DEVICE_LOCAL, allowing(0b10)), Some(1));
        assert_eq!(find_memory_type(&memory, Flags::DEVICE_LOCAL, allowing(0)), None);
    }
}
