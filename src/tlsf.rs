//! The TLSF allocator core
use alloc::vec::Vec;
use core::{debug_assert, debug_assert_eq, ops::Range};

use crate::{device::DeviceSize, int::BinInteger};

mod map;
use self::map::MapParams;

#[doc = svgbobdoc::transform!(
/// The TLSF header (top-level) data structure.
///
/// # Data Structure Overview
///
/// <center>
/// ```svgbob
///   First level
///                                                                       FLLEN = 8
///                               ,-----+-----+-----+-----+-----+-----+-----+-----,
///         fl_bitmap: FLBitmap = |  0  |  0  |  0  |  1  |  0  |  0  |  0  |  0  |
///                               +-----+-----+-----+-----+-----+-----+-----+-----+
///                      min size | 2¹⁵ | 2¹⁴ | 2¹³ | 2¹² | 2¹¹ | 2¹⁰ |  2⁹ |  2⁸ |
///                               '-----+-----+-----+--+--+-----+-----+-----+-----'
///                                                    |
/// ╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶|╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶
///   Second Level                                     |
///                                                    v                      SLLEN = 8
///                                  ,-----+-----+-----+-----+-----+-----+-----+-----,
///        "sl_bitmap[4]: SLBitmap"= |  0  |  0  |  1  |  0  |  0  |  0  |  0  |  0  |
///                                  +-----+-----+-----+-----+-----+-----+-----+-----+
///              min size 2¹²(1+n/8) |  7  |  6  |  5  |  4  |  3  |  2  |  1  |  0  |
///                                  +-----+-----+-----+-----+-----+-----+-----+-----+
///                       first_free |     |     |  O  |     |     |     |     |     |
///                                  '-----+-----+--|--+-----+-----+-----+-----+-----'
///                                                 |
///                                                 |  size = 6656..7168
///                                                 |
/// ╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶|╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶
///   Free blocks (out of band)                     |
///                                                 |
///             ,-----------------------------------'
///             | ,-------+-------,    ,-------+-------,    ,-------+-------,
///             '-+>O     |   O---+----+>O     |   O---+----+>O     |       |
///               +-------+-------+    +-------+-------+    +-------+-------+
///               | offset = 0    |    | offset = 64K  |    | offset = 96K  |
///               '---------------'    '---------------'    '---------------'
///                  6656 bytes           6912 bytes           6656 bytes
/// ```
/// </center>
///
/// # Physical Block List
///
/// Block headers are not stored in the managed memory (which usually is not
/// even host-visible). Instead, `Tlsf` keeps them in a slot arena and refers
/// to them by [`BlockId`]. Every inserted region is a doubly linked list of
/// blocks in address order, closed by a zero-sized, permanently occupied
/// sentinel block:
///
/// <center>
/// ```svgbob
///   ,--------+--------+--------+--------+----------,
///   |  used  |  free  |  used  |  free  | sentinel |
///   |   0    |  256   |  1024  |  1536  |   4096   |
///   '--------+--------+--------+--------+----------'
///     <----->  <----->  <----->  <----->
///      prev_phys / next_phys links
/// ```
/// </center>
///
/// # Properties
///
/// The allocation granularity ([`GRANULARITY`]) is 256 bytes, which is the
/// minimum size of a block. Every block's offset and size is a multiple of
/// it.
///
/// The maximum block size is `(GRANULARITY << FLLEN) - GRANULARITY`.
///
/// No two physically adjacent blocks are free at the same time.
///
)]
#[derive(Debug)]
pub struct Tlsf<FLBitmap, SLBitmap, const FLLEN: usize, const SLLEN: usize> {
    fl_bitmap: FLBitmap,
    /// `sl_bitmap[fl].get_bit(sl)` is set iff `first_free[fl][sl].is_some()`
    sl_bitmap: [SLBitmap; FLLEN],
    first_free: [[Option<BlockId>; SLLEN]; FLLEN],
    blocks: Vec<Block>,
    /// Slots of `blocks` available for reuse
    vacant: Vec<BlockId>,
    /// The sentinel block of each inserted region, in insertion order
    sentinels: Vec<BlockId>,
    capacity: DeviceSize,
    used: DeviceSize,
}

/// The allocation granularity.
///
/// It is 256 bytes, which is the minimum size of a block and covers the
/// resource alignments most devices report.
pub const GRANULARITY: DeviceSize = 256;

const GRANULARITY_LOG2: u32 = GRANULARITY.trailing_zeros();

/// Identifies a block in the [`Tlsf`] that created it.
///
/// A `BlockId` returned by [`Tlsf::allocate`] stays valid until it's passed
/// to [`Tlsf::coalesce`]. The slot is then recycled for other blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(usize);

/// The header of a memory block.
#[derive(Debug, Clone, Copy)]
struct Block {
    offset: DeviceSize,
    /// The size of the block. Zero for sentinel blocks.
    size: DeviceSize,
    used: bool,
    prev_phys: Option<BlockId>,
    /// `None` iff this is a sentinel block.
    next_phys: Option<BlockId>,
    /// Only meaningful for free blocks.
    prev_free: Option<BlockId>,
    /// Only meaningful for free blocks.
    next_free: Option<BlockId>,
}

impl Block {
    const VACANT: Self = Self {
        offset: 0,
        size: 0,
        used: false,
        prev_phys: None,
        next_phys: None,
        prev_free: None,
        next_free: None,
    };

    #[inline]
    fn free(offset: DeviceSize, size: DeviceSize) -> Self {
        Self {
            offset,
            size,
            ..Self::VACANT
        }
    }
}

/// A block handed out by [`Tlsf::allocate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Suballocation {
    /// The starting offset. This is a multiple of the requested alignment.
    pub offset: DeviceSize,
    /// The size of the block. This is the requested size rounded up to
    /// [`GRANULARITY`].
    pub size: DeviceSize,
    /// The block to pass to [`Tlsf::coalesce`] when the allocation is no
    /// longer needed.
    pub block: BlockId,
}

/// A snapshot of a block, as yielded by [`Tlsf::iter_blocks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub offset: DeviceSize,
    pub size: DeviceSize,
    pub used: bool,
}

impl<FLBitmap: BinInteger, SLBitmap: BinInteger, const FLLEN: usize, const SLLEN: usize> Default
    for Tlsf<FLBitmap, SLBitmap, FLLEN, SLLEN>
{
    fn default() -> Self {
        Self::INIT
    }
}

impl<FLBitmap: BinInteger, SLBitmap: BinInteger, const FLLEN: usize, const SLLEN: usize>
    Tlsf<FLBitmap, SLBitmap, FLLEN, SLLEN>
{
    /// An empty pool.
    pub const INIT: Self = Self {
        fl_bitmap: FLBitmap::ZERO,
        sl_bitmap: {
            let () = Self::VALID;
            [SLBitmap::ZERO; FLLEN]
        },
        first_free: [[None; SLLEN]; FLLEN],
        blocks: Vec::new(),
        vacant: Vec::new(),
        sentinels: Vec::new(),
        capacity: 0,
        used: 0,
    };

    /// Evaluates successfully if the parameters are valid.
    const VALID: () = {
        assert!(FLLEN != 0, "`FLLEN` must not be zero");
        assert!(SLLEN != 0, "`SLLEN` must not be zero");
        assert!(SLLEN.is_power_of_two(), "`SLLEN` is not power of two");
        assert!(
            FLBitmap::BITS as usize >= FLLEN,
            "`FLBitmap` should contain at least `FLLEN` bits"
        );
        assert!(
            SLBitmap::BITS as usize >= SLLEN,
            "`SLBitmap` should contain at least `SLLEN` bits"
        );
        assert!(
            SLLEN.trailing_zeros() <= GRANULARITY_LOG2,
            "`SLLEN` must not exceed `GRANULARITY`"
        );
    };

    const MAX_BLOCK_SIZE: Option<DeviceSize> = {
        let shift = GRANULARITY_LOG2 as usize + FLLEN;
        if shift < DeviceSize::BITS as usize {
            Some((1 << shift) - GRANULARITY)
        } else if shift == DeviceSize::BITS as usize {
            Some(0u64.wrapping_sub(GRANULARITY))
        } else {
            None
        }
    };

    /// `SLLEN.log2()`
    const SLI: u32 = SLLEN.trailing_zeros();

    const PARAMS: MapParams = MapParams {
        sli: Self::SLI,
        fllen: FLLEN,
    };

    /// Construct an empty pool.
    #[inline]
    pub const fn new() -> Self {
        Self::INIT
    }

    /// The total size of all inserted regions.
    #[inline]
    pub fn capacity(&self) -> DeviceSize {
        self.capacity
    }

    /// The total size of all outstanding allocations.
    #[inline]
    pub fn used_size(&self) -> DeviceSize {
        self.used
    }

    /// The total size of all free blocks.
    #[inline]
    pub fn free_size(&self) -> DeviceSize {
        self.capacity - self.used
    }

    /// Returns `true` if there are no outstanding allocations.
    #[inline]
    pub fn is_unused(&self) -> bool {
        self.used == 0
    }

    #[inline]
    fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0]
    }

    #[inline]
    fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.0]
    }

    /// Store a new block header, reusing a vacant slot if there is one.
    fn new_block(&mut self, block: Block) -> BlockId {
        if let Some(id) = self.vacant.pop() {
            *self.block_mut(id) = block;
            id
        } else {
            self.blocks.push(block);
            BlockId(self.blocks.len() - 1)
        }
    }

    /// Return a block header's slot for reuse.
    fn release_block(&mut self, id: BlockId) {
        debug_assert!(!self.vacant.contains(&id));
        *self.block_mut(id) = Block::VACANT;
        self.vacant.push(id);
    }

    /// Find the free block list to store a free block of the specified size.
    ///
    /// Every free block is created with a size that has a free list, so the
    /// lookup can't fail.
    #[inline]
    fn free_list_of(size: DeviceSize) -> (usize, usize) {
        match Self::PARAMS.map_floor(size) {
            Some(list) => list,
            None => unreachable!("a block of {} bytes has no free list", size),
        }
    }

    /// Insert the specified free block to the corresponding free block list.
    ///
    /// Updates `Block::{prev_free, next_free}`.
    fn link_free_block(&mut self, id: BlockId) {
        debug_assert!(!self.block(id).used);
        let (fl, sl) = Self::free_list_of(self.block(id).size);
        let next_free = self.first_free[fl][sl].replace(id);
        if let Some(next_free) = next_free {
            self.block_mut(next_free).prev_free = Some(id);
        }

        let block = self.block_mut(id);
        block.next_free = next_free;
        block.prev_free = None;

        self.fl_bitmap.set_bit(fl as u32);
        self.sl_bitmap[fl].set_bit(sl as u32);
    }

    /// Remove the specified free block from the corresponding free block list.
    fn unlink_free_block(&mut self, id: BlockId) {
        let Block {
            size,
            next_free,
            prev_free,
            ..
        } = *self.block(id);

        if let Some(next_free) = next_free {
            self.block_mut(next_free).prev_free = prev_free;
        }

        if let Some(prev_free) = prev_free {
            self.block_mut(prev_free).next_free = next_free;
        } else {
            let (fl, sl) = Self::free_list_of(size);
            let first_free = &mut self.first_free[fl][sl];

            debug_assert_eq!(*first_free, Some(id));
            *first_free = next_free;

            if next_free.is_none() {
                // The free list is now empty - update the bitmap
                self.sl_bitmap[fl].clear_bit(sl as u32);
                if self.sl_bitmap[fl] == SLBitmap::ZERO {
                    self.fl_bitmap.clear_bit(fl as u32);
                }
            }
        }
    }

    /// Insert a new free region `range`.
    ///
    /// The region is shrunk to [`GRANULARITY`] boundaries. This method does
    /// nothing if what remains is empty. The region must not overlap any
    /// previously inserted region.
    ///
    /// # Time Complexity
    ///
    /// This method will complete in linear time (`O(range.len())`) because
    /// it might need to divide the region to meet the maximum block size
    /// requirement (`(GRANULARITY << FLLEN) - GRANULARITY`).
    ///
    /// # Examples
    ///
    /// ```
    /// use vlsf::Tlsf;
    /// let mut tlsf: Tlsf<u16, u16, 12, 16> = Tlsf::new();
    /// tlsf.insert_free_range(100..65536);
    /// assert_eq!(tlsf.capacity(), 65536 - 256);
    /// ```
    pub fn insert_free_range(&mut self, range: Range<DeviceSize>) {
        // Round up the starting offset and round down the ending offset
        let Some(mut start) = range
            .start
            .checked_add(GRANULARITY - 1)
            .map(|x| x & !(GRANULARITY - 1))
        else {
            return;
        };
        let end = range.end & !(GRANULARITY - 1);
        if end <= start {
            // The region is too small
            return;
        }

        let mut size = end - start;
        while size > 0 {
            let chunk_size = match Self::MAX_BLOCK_SIZE {
                Some(max_block_size) => size.min(max_block_size),
                None => size,
            };

            debug_assert_eq!(chunk_size % GRANULARITY, 0);

            let block = self.new_block(Block::free(start, chunk_size));
            let sentinel = self.new_block(Block {
                offset: start + chunk_size,
                size: 0,
                used: true,
                prev_phys: Some(block),
                ..Block::VACANT
            });
            self.block_mut(block).next_phys = Some(sentinel);
            self.sentinels.push(sentinel);

            // Link the free block to the corresponding free list
            self.link_free_block(block);

            self.capacity += chunk_size;
            start += chunk_size;
            size -= chunk_size;
        }
    }

    /// Attempt to allocate a block of `size` bytes whose offset is a multiple
    /// of `align`.
    ///
    /// Returns `None` if there's no free block large enough or `align` is not
    /// a power of two.
    ///
    /// # Time Complexity
    ///
    /// This method will complete in constant time.
    ///
    /// # Examples
    ///
    /// ```
    /// use vlsf::Tlsf;
    /// let mut tlsf: Tlsf<u16, u16, 12, 16> = Tlsf::new();
    /// tlsf.insert_free_range(0..65536);
    ///
    /// let a = tlsf.allocate(1000, 4).unwrap();
    /// let b = tlsf.allocate(1000, 4096).unwrap();
    /// assert_eq!((a.offset, a.size), (0, 1024));
    /// assert_eq!(b.offset % 4096, 0);
    ///
    /// tlsf.coalesce(a.block);
    /// tlsf.coalesce(b.block);
    /// assert!(tlsf.is_unused());
    /// ```
    pub fn allocate(&mut self, size: DeviceSize, align: DeviceSize) -> Option<Suballocation> {
        if !align.is_power_of_two() {
            return None;
        }

        let block_size = size.max(1).checked_add(GRANULARITY - 1)? & !(GRANULARITY - 1);

        let (id, aligned_offset) = self.search_free_block(block_size, align)?;
        self.unlink_free_block(id);

        let Block {
            offset,
            prev_phys,
            ..
        } = *self.block(id);
        debug_assert!(!self.block(id).used);

        let front_size = aligned_offset - offset;
        debug_assert_eq!(front_size % GRANULARITY, 0);

        if front_size > 0 {
            // Split off the front padding as a new free block, which takes
            // over `prev_phys`
            let front = self.new_block(Block {
                prev_phys,
                next_phys: Some(id),
                ..Block::free(offset, front_size)
            });

            if let Some(prev_phys) = prev_phys {
                // Invariant: No two adjacent free blocks
                debug_assert!(self.block(prev_phys).used);
                self.block_mut(prev_phys).next_phys = Some(front);
            }

            let block = self.block_mut(id);
            block.offset = aligned_offset;
            block.size -= front_size;
            block.prev_phys = Some(front);

            self.link_free_block(front);
        }

        let back_size = self.block(id).size - block_size;

        if back_size > 0 {
            // The allocation partially fills this free block. Split off the
            // rest as a new free block.
            let next_phys = self.block(id).next_phys;
            let back = self.new_block(Block {
                prev_phys: Some(id),
                next_phys,
                ..Block::free(aligned_offset + block_size, back_size)
            });

            if let Some(next_phys) = next_phys {
                // Invariant: No two adjacent free blocks
                debug_assert!(self.block(next_phys).used);
                self.block_mut(next_phys).prev_phys = Some(back);
            }

            let block = self.block_mut(id);
            block.size = block_size;
            block.next_phys = Some(back);

            self.link_free_block(back);
        }

        self.block_mut(id).used = true;
        self.used += block_size;

        Some(Suballocation {
            offset: aligned_offset,
            size: block_size,
            block: id,
        })
    }

    /// Find a free block that can hold `block_size` bytes at an offset
    /// aligned to `align`. Returns the block and the aligned offset.
    fn search_free_block(
        &self,
        block_size: DeviceSize,
        align: DeviceSize,
    ) -> Option<(BlockId, DeviceSize)> {
        if align > GRANULARITY {
            // A block of the request's own size class fits if it happens to be
            // sufficiently aligned already
            let found = self
                .free_list_head(block_size)
                .and_then(|id| self.fit_in_block(id, block_size, align));
            if found.is_some() {
                return found;
            }
        }

        // Every block is aligned to `GRANULARITY` bytes, so we need to insert
        // a padding containing at most `max(align - GRANULARITY, 0)` bytes.
        // Any block of `search_size` bytes or more fits regardless of its
        // offset.
        let search_size = block_size.checked_add(align.saturating_sub(GRANULARITY))?;
        let id = self.free_list_head(search_size)?;
        let found = self.fit_in_block(id, block_size, align);
        debug_assert!(found.is_some());
        found
    }

    /// Get the first block of the smallest non-empty free list whose blocks
    /// are all at least `min_size` bytes large.
    #[inline]
    fn free_list_head(&self, min_size: DeviceSize) -> Option<BlockId> {
        let (fl, sl) = self.search_suitable_free_block_list_for_allocation(min_size)?;
        match self.first_free[fl][sl] {
            Some(id) => Some(id),
            None => unreachable!("free list ({}, {}) is marked but empty", fl, sl),
        }
    }

    /// Get the aligned offset at which `block_size` bytes fit in the free
    /// block `id`.
    #[inline]
    fn fit_in_block(
        &self,
        id: BlockId,
        block_size: DeviceSize,
        align: DeviceSize,
    ) -> Option<(BlockId, DeviceSize)> {
        let block = self.block(id);
        let aligned_offset = block.offset.checked_add(align - 1)? & !(align - 1);
        let front_size = aligned_offset - block.offset;
        (front_size.checked_add(block_size)? <= block.size).then_some((id, aligned_offset))
    }

    /// Search for a non-empty free block list for allocation.
    #[inline]
    fn search_suitable_free_block_list_for_allocation(
        &self,
        min_size: DeviceSize,
    ) -> Option<(usize, usize)> {
        let (mut fl, mut sl) = Self::PARAMS.map_ceil(min_size)?;

        // Search in range `(fl, sl..SLLEN)`
        sl = self.sl_bitmap[fl].bit_scan_forward(sl as u32) as usize;
        if sl < SLLEN {
            debug_assert!(self.sl_bitmap[fl].get_bit(sl as u32));

            return Some((fl, sl));
        }

        // Search in range `(fl + 1.., ..)`
        fl = self.fl_bitmap.bit_scan_forward(fl as u32 + 1) as usize;
        if fl < FLLEN {
            debug_assert!(self.fl_bitmap.get_bit(fl as u32));

            sl = self.sl_bitmap[fl].trailing_zeros() as usize;
            if sl >= SLLEN {
                unreachable!("first-level list {} is marked but empty", fl);
            }

            debug_assert!(self.sl_bitmap[fl].get_bit(sl as u32));
            Some((fl, sl))
        } else {
            None
        }
    }

    /// Return a previously allocated block to the pool, merging it with any
    /// free physical neighbors.
    ///
    /// # Time Complexity
    ///
    /// This method will complete in constant time.
    ///
    /// # Panics
    ///
    /// Panics if `id` does not denote an outstanding allocation of `self`.
    /// Passing a `BlockId` whose slot has since been reused for another
    /// allocation is not detected and releases that allocation instead.
    pub fn coalesce(&mut self, id: BlockId) {
        let block = *self.block(id);
        assert!(
            block.used && block.size > 0,
            "{:?} is not an outstanding allocation",
            id
        );
        self.used -= block.size;

        let Block {
            mut offset,
            mut size,
            mut prev_phys,
            mut next_phys,
            ..
        } = block;
        let mut id = id;

        // Merge with the next block if it's a free block
        if let Some(next) = next_phys {
            let next_block = *self.block(next);
            if !next_block.used {
                self.unlink_free_block(next);
                size += next_block.size;
                next_phys = next_block.next_phys;
                self.release_block(next);
            }
        }

        // Merge with the previous block if it's a free block. `prev` absorbs
        // `id` so that `prev.prev_phys` stays intact.
        if let Some(prev) = prev_phys {
            let prev_block = *self.block(prev);
            if !prev_block.used {
                self.unlink_free_block(prev);
                size += prev_block.size;
                offset = prev_block.offset;
                prev_phys = prev_block.prev_phys;
                self.release_block(id);
                id = prev;
            }
        }

        *self.block_mut(id) = Block {
            prev_phys,
            next_phys,
            ..Block::free(offset, size)
        };

        if let Some(next_phys) = next_phys {
            self.block_mut(next_phys).prev_phys = Some(id);
        }
        if let Some(prev_phys) = prev_phys {
            self.block_mut(prev_phys).next_phys = Some(id);
        }

        // Link this free block to the corresponding free list
        self.link_free_block(id);
    }

    /// Iterate over all blocks in address order, region by region. Sentinel
    /// blocks are not included.
    ///
    /// # Time Complexity
    ///
    /// Linear in the number of blocks.
    pub fn iter_blocks(&self) -> impl Iterator<Item = BlockInfo> + '_ {
        self.sentinels.iter().flat_map(move |&sentinel| {
            // Walk back to the region's first block
            let mut first = sentinel;
            while let Some(prev_phys) = self.block(first).prev_phys {
                first = prev_phys;
            }

            core::iter::successors(Some(first), move |&id| self.block(id).next_phys)
                .take_while(move |&id| id != sentinel)
                .map(move |id| {
                    let block = self.block(id);
                    BlockInfo {
                        offset: block.offset,
                        size: block.size,
                        used: block.used,
                    }
                })
        })
    }
}
