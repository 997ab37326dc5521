//! Allocator configuration parameters.
use crate::{
    device::DeviceSize,
    error::AllocationError,
    pool::{MAX_POOL_LOG2_SIZE, MIN_POOL_LOG2_SIZE},
};

/// Configuration for [`MemoryAllocator`](crate::MemoryAllocator).
///
/// Validated at construction; all values are immutable after creation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AllocatorConfig {
    /// `log2` of the preferred size of a pool in bytes.
    ///
    /// Default: 25 (32 MiB). Requests too large for a pool of this size get a
    /// pool of their own, sized to the next power of two.
    pub log2_pool_size: u32,

    /// Heaps no larger than this are considered small. Pools on a small heap
    /// are at most an eighth of the heap in size so that a single pool can't
    /// exhaust it.
    ///
    /// Default: 1 GiB.
    pub small_heap_threshold: DeviceSize,
}

impl AllocatorConfig {
    /// Default pool size: 2^25 bytes = 32 MiB.
    pub const DEFAULT_LOG2_POOL_SIZE: u32 = 25;

    /// Default small heap threshold: 1 GiB.
    pub const DEFAULT_SMALL_HEAP_THRESHOLD: DeviceSize = 1 << 30;

    pub fn new() -> Self {
        Self {
            log2_pool_size: Self::DEFAULT_LOG2_POOL_SIZE,
            small_heap_threshold: Self::DEFAULT_SMALL_HEAP_THRESHOLD,
        }
    }

    /// The preferred pool size in bytes.
    pub fn pool_size(&self) -> DeviceSize {
        1 << self.log2_pool_size
    }

    pub fn validate(&self) -> Result<(), AllocationError> {
        if (MIN_POOL_LOG2_SIZE..=MAX_POOL_LOG2_SIZE).contains(&self.log2_pool_size) {
            Ok(())
        } else {
            Err(AllocationError::InvalidConfig {
                log2_pool_size: self.log2_pool_size,
                min: MIN_POOL_LOG2_SIZE,
                max: MAX_POOL_LOG2_SIZE,
            })
        }
    }
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self::new()
    }
}
