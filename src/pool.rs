//! A single device memory object managed by a [`Tlsf`].
use alloc::rc::Rc;
use core::fmt;

use crate::{
    device::{DeviceError, DeviceSize, MemoryDevice},
    tlsf::{BlockId, BlockInfo, Suballocation, Tlsf},
};

/// The TLSF instantiation used for pools. The maximum block size is
/// `2^48 - 256` bytes, which covers every valid pool size.
pub(crate) type PoolTlsf = Tlsf<u64, u16, 40, 16>;

/// `log2` of the smallest pool size.
pub const MIN_POOL_LOG2_SIZE: u32 = 12;

/// `log2` of the largest pool size.
pub const MAX_POOL_LOG2_SIZE: u32 = 47;

/// A device memory object of `2^log2_size` bytes, suballocated by a TLSF
/// allocator.
///
/// The device memory is freed when the pool is dropped. Pools are shared
/// between a [`MemoryAllocator`](crate::MemoryAllocator) and the
/// [`Allocation`](crate::Allocation)s made from them, so this happens only
/// after both the allocator has released the pool and every allocation is
/// gone.
pub struct MemoryPool<D: MemoryDevice> {
    device: Rc<D>,
    memory: D::Memory,
    memory_type_index: u32,
    log2_size: u32,
    tlsf: PoolTlsf,
}

impl<D: MemoryDevice> MemoryPool<D> {
    /// Allocate device memory for a new pool.
    pub(crate) fn new(
        device: Rc<D>,
        log2_size: u32,
        memory_type_index: u32,
    ) -> Result<Self, DeviceError> {
        debug_assert!((MIN_POOL_LOG2_SIZE..=MAX_POOL_LOG2_SIZE).contains(&log2_size));
        let size: DeviceSize = 1 << log2_size;
        let memory = device.allocate_memory(size, memory_type_index)?;

        let mut tlsf = PoolTlsf::new();
        tlsf.insert_free_range(0..size);
        debug_assert_eq!(tlsf.capacity(), size);

        Ok(Self {
            device,
            memory,
            memory_type_index,
            log2_size,
            tlsf,
        })
    }

    /// Attempt to suballocate `size` bytes aligned to `align`. Returns `None`
    /// if the pool doesn't have a large enough free region.
    #[inline]
    pub fn allocate(&mut self, size: DeviceSize, align: DeviceSize) -> Option<Suballocation> {
        self.tlsf.allocate(size, align)
    }

    /// Return a block to the pool.
    ///
    /// # Panics
    ///
    /// See [`Tlsf::coalesce`].
    #[inline]
    pub fn coalesce(&mut self, block: BlockId) {
        self.tlsf.coalesce(block)
    }

    /// The device memory object.
    #[inline]
    pub fn memory(&self) -> D::Memory {
        self.memory
    }

    #[inline]
    pub fn memory_type_index(&self) -> u32 {
        self.memory_type_index
    }

    #[inline]
    pub fn log2_size(&self) -> u32 {
        self.log2_size
    }

    /// The size of the device memory object.
    #[inline]
    pub fn size(&self) -> DeviceSize {
        self.tlsf.capacity()
    }

    /// The total size of the outstanding suballocations.
    #[inline]
    pub fn used_size(&self) -> DeviceSize {
        self.tlsf.used_size()
    }

    #[inline]
    pub fn is_unused(&self) -> bool {
        self.tlsf.is_unused()
    }

    /// Iterate over the pool's blocks in address order.
    pub fn iter_blocks(&self) -> impl Iterator<Item = BlockInfo> + '_ {
        self.tlsf.iter_blocks()
    }
}

impl<D: MemoryDevice> Drop for MemoryPool<D> {
    fn drop(&mut self) {
        log::debug!(
            "freeing pool {:?} (memory type {}, 2^{} bytes)",
            self.memory,
            self.memory_type_index,
            self.log2_size
        );
        debug_assert!(self.tlsf.is_unused(), "pool dropped with live allocations");
        // Safety: `memory` was allocated from `device` by `Self::new`. Every
        //         `Allocation` keeps its pool alive, so nothing is bound any
        //         more.
        unsafe { self.device.free_memory(self.memory) };
    }
}

impl<D: MemoryDevice> fmt::Debug for MemoryPool<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryPool")
            .field("memory", &self.memory)
            .field("memory_type_index", &self.memory_type_index)
            .field("size", &self.size())
            .field("used_size", &self.used_size())
            .finish()
    }
}
