//! The RAII handle for a suballocation.
use alloc::rc::Rc;
use core::{cell::RefCell, fmt};

use crate::{
    device::{DeviceSize, MemoryDevice},
    pool::MemoryPool,
    tlsf::Suballocation,
};

/// A region of device memory bound to (or about to be bound to) a resource.
///
/// The region is returned to its pool when the `Allocation` is dropped. The
/// `Allocation` keeps the pool alive, so it may outlive the
/// [`MemoryAllocator`](crate::MemoryAllocator) it came from.
///
/// Drop the resource the region is bound to before dropping the
/// `Allocation`.
pub struct Allocation<D: MemoryDevice> {
    pool: Rc<RefCell<MemoryPool<D>>>,
    memory: D::Memory,
    memory_type_index: u32,
    suballocation: Suballocation,
}

impl<D: MemoryDevice> Allocation<D> {
    pub(crate) fn new(pool: Rc<RefCell<MemoryPool<D>>>, suballocation: Suballocation) -> Self {
        let (memory, memory_type_index) = {
            let pool = pool.borrow();
            (pool.memory(), pool.memory_type_index())
        };
        Self {
            pool,
            memory,
            memory_type_index,
            suballocation,
        }
    }

    /// The device memory object containing the region.
    #[inline]
    pub fn memory(&self) -> D::Memory {
        self.memory
    }

    /// The offset of the region in [`Self::memory`].
    #[inline]
    pub fn offset(&self) -> DeviceSize {
        self.suballocation.offset
    }

    /// The size of the region. This is the requested size rounded up to
    /// [`GRANULARITY`](crate::GRANULARITY).
    #[inline]
    pub fn size(&self) -> DeviceSize {
        self.suballocation.size
    }

    #[inline]
    pub fn memory_type_index(&self) -> u32 {
        self.memory_type_index
    }
}

impl<D: MemoryDevice> Drop for Allocation<D> {
    fn drop(&mut self) {
        log::trace!(
            "returning {:#x}..{:#x} to pool {:?}",
            self.offset(),
            self.offset() + self.size(),
            self.memory
        );
        self.pool.borrow_mut().coalesce(self.suballocation.block);
    }
}

impl<D: MemoryDevice> fmt::Debug for Allocation<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Allocation")
            .field("memory", &self.memory)
            .field("memory_type_index", &self.memory_type_index)
            .field("offset", &self.offset())
            .field("size", &self.size())
            .finish()
    }
}
