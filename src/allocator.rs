//! Memory type selection and pool management.
use alloc::{rc::Rc, vec::Vec};
use core::{
    cell::{Ref, RefCell},
    fmt,
};

use crate::{
    allocation::Allocation,
    config::AllocatorConfig,
    device::{DeviceSize, MemoryDevice, MemoryProperties, MemoryPropertyFlags, MemoryRequirements},
    error::AllocationError,
    int::BinInteger,
    pool::{MemoryPool, MAX_POOL_LOG2_SIZE, MIN_POOL_LOG2_SIZE},
    tlsf::GRANULARITY,
};

type PoolRef<D> = Rc<RefCell<MemoryPool<D>>>;

/// Suballocates resources from device memory pools, one list of pools per
/// memory type.
///
/// # Examples
///
/// ```rust
/// use std::{cell::Cell, rc::Rc};
/// use vlsf::{
///     AllocatorConfig, DeviceError, DeviceSize, MemoryAllocator, MemoryDevice, MemoryHeap,
///     MemoryProperties, MemoryPropertyFlags, MemoryRequirements, MemoryType,
/// };
///
/// #[derive(Default)]
/// struct Device {
///     next: Cell<u64>,
/// }
///
/// impl MemoryDevice for Device {
///     type Memory = u64;
///
///     fn allocate_memory(&self, _: DeviceSize, _: u32) -> Result<u64, DeviceError> {
///         self.next.set(self.next.get() + 1);
///         Ok(self.next.get())
///     }
///
///     unsafe fn free_memory(&self, _: u64) {}
/// }
///
/// let properties = MemoryProperties {
///     memory_types: vec![MemoryType {
///         property_flags: MemoryPropertyFlags::DEVICE_LOCAL,
///         heap_index: 0,
///     }],
///     memory_heaps: vec![MemoryHeap { size: 8 << 30, device_local: true }],
/// };
///
/// let mut allocator =
///     MemoryAllocator::new(Rc::new(Device::default()), properties, AllocatorConfig::default())
///         .unwrap();
///
/// let requirements = MemoryRequirements { size: 1000, alignment: 512, memory_type_bits: !0 };
/// let a = allocator.bind(&requirements, MemoryPropertyFlags::DEVICE_LOCAL).unwrap();
/// let b = allocator.bind(&requirements, MemoryPropertyFlags::DEVICE_LOCAL).unwrap();
/// assert_eq!(a.memory(), b.memory());
/// assert_eq!(a.size(), 1024);
/// assert_eq!(a.offset() % 512, 0);
/// assert!(b.offset() >= a.offset() + a.size() || a.offset() >= b.offset() + b.size());
///
/// drop((a, b));
/// assert_eq!(allocator.release_empty_pools(), 1);
/// ```
pub struct MemoryAllocator<D: MemoryDevice> {
    device: Rc<D>,
    properties: MemoryProperties,
    config: AllocatorConfig,
    /// Indexed by memory type
    pools: Vec<Vec<PoolRef<D>>>,
}

/// A snapshot of the allocator's memory usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocatorStatistics {
    /// The number of pools held by the allocator.
    pub pool_count: usize,
    /// The total size of those pools.
    pub reserved: DeviceSize,
    /// The total size of the outstanding allocations in those pools.
    pub used: DeviceSize,
}

impl<D: MemoryDevice> MemoryAllocator<D> {
    pub fn new(
        device: Rc<D>,
        properties: MemoryProperties,
        config: AllocatorConfig,
    ) -> Result<Self, AllocationError> {
        config.validate()?;
        let pools = properties.memory_types.iter().map(|_| Vec::new()).collect();
        Ok(Self {
            device,
            properties,
            config,
            pools,
        })
    }

    #[inline]
    pub fn device(&self) -> &Rc<D> {
        &self.device
    }

    #[inline]
    pub fn properties(&self) -> &MemoryProperties {
        &self.properties
    }

    #[inline]
    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    /// Find a region of memory for a resource with the given requirements.
    ///
    /// The memory type is the first one that is allowed by
    /// `requirements.memory_type_bits` and has all of `properties`. The
    /// existing pools of that type are tried in creation order. If none of
    /// them has room, a new pool is allocated from the device.
    pub fn bind(
        &mut self,
        requirements: &MemoryRequirements,
        properties: MemoryPropertyFlags,
    ) -> Result<Allocation<D>, AllocationError> {
        let MemoryRequirements {
            size,
            alignment,
            memory_type_bits,
        } = *requirements;

        if !alignment.is_power_of_two() {
            return Err(AllocationError::InvalidAlignment(alignment));
        }

        let memory_type_index = self
            .properties
            .find_memory_type(memory_type_bits, properties)
            .ok_or(AllocationError::NoCompatibleMemoryType {
                memory_type_bits,
                properties,
            })?;

        log::trace!(
            "bind(size = {}, alignment = {}) from memory type {}",
            size,
            alignment,
            memory_type_index
        );

        for pool in self.pools[memory_type_index as usize].iter() {
            if let Some(allocation) = Self::suballocate(pool, size, alignment) {
                return Ok(allocation);
            }
        }

        let log2_size = self.new_pool_log2_size(size, alignment, memory_type_index)?;
        let pool = self.new_pool(log2_size, memory_type_index)?;

        // The new pool is large enough and starts at an offset aligned to
        // anything, so this always succeeds.
        Self::suballocate(&pool, size, alignment).ok_or(AllocationError::TooLarge {
            size,
            alignment,
            max_log2_size: MAX_POOL_LOG2_SIZE,
        })
    }

    /// Allocate a new pool of `2^log2_size` bytes of the specified memory
    /// type.
    ///
    /// # Panics
    ///
    /// Panics if `memory_type_index` is not a valid memory type index.
    pub fn allocate(
        &mut self,
        log2_size: u32,
        memory_type_index: u32,
    ) -> Result<(), AllocationError> {
        if !(MIN_POOL_LOG2_SIZE..=MAX_POOL_LOG2_SIZE).contains(&log2_size) {
            return Err(AllocationError::InvalidConfig {
                log2_pool_size: log2_size,
                min: MIN_POOL_LOG2_SIZE,
                max: MAX_POOL_LOG2_SIZE,
            });
        }
        self.new_pool(log2_size, memory_type_index).map(|_| ())
    }

    fn new_pool(
        &mut self,
        log2_size: u32,
        memory_type_index: u32,
    ) -> Result<PoolRef<D>, AllocationError> {
        assert!(
            (memory_type_index as usize) < self.pools.len(),
            "memory type index {} is out of range",
            memory_type_index
        );

        let pool = MemoryPool::new(Rc::clone(&self.device), log2_size, memory_type_index)
            .map_err(|e| {
                log::debug!(
                    "failed to allocate a pool of 2^{} bytes of memory type {}: {}",
                    log2_size,
                    memory_type_index,
                    e
                );
                e
            })?;
        log::debug!(
            "allocated pool {:?} (memory type {}, 2^{} bytes)",
            pool.memory(),
            memory_type_index,
            log2_size
        );

        let pool = Rc::new(RefCell::new(pool));
        self.pools[memory_type_index as usize].push(Rc::clone(&pool));
        Ok(pool)
    }

    fn suballocate(
        pool: &PoolRef<D>,
        size: DeviceSize,
        alignment: DeviceSize,
    ) -> Option<Allocation<D>> {
        let suballocation = pool.borrow_mut().allocate(size, alignment)?;
        Some(Allocation::new(Rc::clone(pool), suballocation))
    }

    /// Calculate the size of the pool to allocate for a request none of the
    /// existing pools could satisfy.
    fn new_pool_log2_size(
        &self,
        size: DeviceSize,
        alignment: DeviceSize,
        memory_type_index: u32,
    ) -> Result<u32, AllocationError> {
        let too_large = || AllocationError::TooLarge {
            size,
            alignment,
            max_log2_size: MAX_POOL_LOG2_SIZE,
        };

        // A new pool's only free block starts at offset 0, which satisfies
        // any alignment, so no padding is needed
        let needed = size
            .max(1)
            .checked_add(GRANULARITY - 1)
            .map(|x| x & !(GRANULARITY - 1))
            .and_then(DeviceSize::checked_next_power_of_two)
            .ok_or_else(too_large)?;
        let needed_log2 = needed.trailing_zeros();

        let mut preferred = self.config.log2_pool_size;
        if let Some(heap) = self.properties.heap_of(memory_type_index) {
            if heap.size <= self.config.small_heap_threshold {
                let limit = (heap.size / 8).fls().unwrap_or(0).max(MIN_POOL_LOG2_SIZE);
                preferred = preferred.min(limit);
            }
        }

        let log2_size = preferred.max(needed_log2);
        if log2_size > MAX_POOL_LOG2_SIZE {
            return Err(too_large());
        }
        Ok(log2_size)
    }

    /// Free every pool that has no outstanding allocations. Returns the
    /// number of pools freed.
    pub fn release_empty_pools(&mut self) -> usize {
        let mut count = 0;
        for pools in self.pools.iter_mut() {
            pools.retain(|pool| {
                let empty = pool.borrow().is_unused();
                count += empty as usize;
                !empty
            });
        }
        if count > 0 {
            log::debug!("released {} empty pool(s)", count);
        }
        count
    }

    pub fn statistics(&self) -> AllocatorStatistics {
        self.pools
            .iter()
            .flatten()
            .fold(AllocatorStatistics::default(), |mut stats, pool| {
                let pool = pool.borrow();
                stats.pool_count += 1;
                stats.reserved += pool.size();
                stats.used += pool.used_size();
                stats
            })
    }

    /// Get the pools of the specified memory type, in creation order.
    pub fn pools(
        &self,
        memory_type_index: u32,
    ) -> impl Iterator<Item = Ref<'_, MemoryPool<D>>> + '_ {
        self.pools
            .get(memory_type_index as usize)
            .into_iter()
            .flatten()
            .map(|pool| pool.borrow())
    }
}

impl<D: MemoryDevice> fmt::Debug for MemoryAllocator<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryAllocator")
            .field("properties", &self.properties)
            .field("config", &self.config)
            .field("statistics", &self.statistics())
            .finish()
    }
}

#[cfg(test)]
mod tests;
