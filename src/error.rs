//! Allocator error types.
use crate::device::{DeviceError, DeviceSize, MemoryPropertyFlags};

/// Errors returned by [`MemoryAllocator`](crate::MemoryAllocator).
///
/// Running out of space in a pool is not an error; the allocator just moves
/// on to another pool. These are the failures left after that.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocationError {
    /// The requested alignment is not a power of two.
    #[error("alignment {0} is not a power of two")]
    InvalidAlignment(DeviceSize),

    /// No memory type is both allowed by the resource and has the requested
    /// properties.
    #[error("no memory type in {memory_type_bits:#b} has the properties {properties:?}")]
    NoCompatibleMemoryType {
        memory_type_bits: u32,
        properties: MemoryPropertyFlags,
    },

    /// The request is larger than the largest pool the allocator can create.
    #[error("{size} bytes aligned to {alignment} exceed the maximum pool size 2^{max_log2_size}")]
    TooLarge {
        size: DeviceSize,
        alignment: DeviceSize,
        max_log2_size: u32,
    },

    /// [`AllocatorConfig::log2_pool_size`](crate::AllocatorConfig::log2_pool_size)
    /// is out of range.
    #[error("pool size 2^{log2_pool_size} is out of range {min}..={max}")]
    InvalidConfig {
        log2_pool_size: u32,
        min: u32,
        max: u32,
    },

    /// A driver call failed, e.g., the allocation of a new pool.
    #[error(transparent)]
    Device(#[from] DeviceError),
}
