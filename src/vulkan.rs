//! [`MemoryDevice`] implementation for [`ash`].
use ash::vk;
use std::format;

use crate::{
    allocation::Allocation,
    allocator::MemoryAllocator,
    device::{
        DeviceError, DeviceSize, MemoryDevice, MemoryHeap, MemoryProperties,
        MemoryPropertyFlags, MemoryRequirements, MemoryType,
    },
    error::AllocationError,
};

#[cfg_attr(feature = "doc_cfg", doc(cfg(feature = "ash")))]
impl MemoryDevice for ash::Device {
    type Memory = vk::DeviceMemory;

    fn allocate_memory(
        &self,
        size: DeviceSize,
        memory_type_index: u32,
    ) -> Result<vk::DeviceMemory, DeviceError> {
        let info = vk::MemoryAllocateInfo::default()
            .allocation_size(size)
            .memory_type_index(memory_type_index);
        // Safety: `info` is valid, and `memory_type_index` comes from the
        //         memory properties of this device
        Ok(unsafe { ash::Device::allocate_memory(self, &info, None) }?)
    }

    unsafe fn free_memory(&self, memory: vk::DeviceMemory) {
        ash::Device::free_memory(self, memory, None);
    }
}

#[cfg_attr(feature = "doc_cfg", doc(cfg(feature = "ash")))]
impl From<vk::Result> for DeviceError {
    /// The code is the result's name, e.g., `ERROR_OUT_OF_DEVICE_MEMORY`.
    fn from(x: vk::Result) -> Self {
        DeviceError::new(format!("{:?}", x))
    }
}

#[cfg_attr(feature = "doc_cfg", doc(cfg(feature = "ash")))]
impl From<vk::MemoryPropertyFlags> for MemoryPropertyFlags {
    fn from(x: vk::MemoryPropertyFlags) -> Self {
        MemoryPropertyFlags::from_raw(x.as_raw())
    }
}

#[cfg_attr(feature = "doc_cfg", doc(cfg(feature = "ash")))]
impl From<&vk::PhysicalDeviceMemoryProperties> for MemoryProperties {
    fn from(x: &vk::PhysicalDeviceMemoryProperties) -> Self {
        let memory_types = x.memory_types[..x.memory_type_count as usize]
            .iter()
            .map(|ty| MemoryType {
                property_flags: ty.property_flags.into(),
                heap_index: ty.heap_index,
            })
            .collect();
        let memory_heaps = x.memory_heaps[..x.memory_heap_count as usize]
            .iter()
            .map(|heap| MemoryHeap {
                size: heap.size,
                device_local: heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL),
            })
            .collect();
        Self {
            memory_types,
            memory_heaps,
        }
    }
}

#[cfg_attr(feature = "doc_cfg", doc(cfg(feature = "ash")))]
impl From<vk::MemoryRequirements> for MemoryRequirements {
    fn from(x: vk::MemoryRequirements) -> Self {
        Self {
            size: x.size,
            alignment: x.alignment,
            memory_type_bits: x.memory_type_bits,
        }
    }
}

#[cfg_attr(feature = "doc_cfg", doc(cfg(feature = "ash")))]
impl MemoryAllocator<ash::Device> {
    /// Find memory for `buffer` and bind it.
    ///
    /// # Safety
    ///
    /// `buffer` must be a valid buffer created from [`Self::device`] that
    /// isn't bound to memory yet. It must be destroyed before the returned
    /// `Allocation` is dropped.
    pub unsafe fn bind_buffer(
        &mut self,
        buffer: vk::Buffer,
        properties: MemoryPropertyFlags,
    ) -> Result<Allocation<ash::Device>, AllocationError> {
        let requirements = self.device().get_buffer_memory_requirements(buffer);
        let allocation = self.bind(&requirements.into(), properties)?;
        self.device()
            .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
            .map_err(DeviceError::from)?;
        Ok(allocation)
    }

    /// Find memory for `image` and bind it.
    ///
    /// # Safety
    ///
    /// `image` must be a valid image created from [`Self::device`] that isn't
    /// bound to memory yet. It must be destroyed before the returned
    /// `Allocation` is dropped.
    pub unsafe fn bind_image(
        &mut self,
        image: vk::Image,
        properties: MemoryPropertyFlags,
    ) -> Result<Allocation<ash::Device>, AllocationError> {
        let requirements = self.device().get_image_memory_requirements(image);
        let allocation = self.bind(&requirements.into(), properties)?;
        self.device()
            .bind_image_memory(image, allocation.memory(), allocation.offset())
            .map_err(DeviceError::from)?;
        Ok(allocation)
    }
}
