//! Free block list mapper. The core implementation of `Tlsf::map_floor`, etc.
use super::{DeviceSize, GRANULARITY, GRANULARITY_LOG2};
use crate::int::BinInteger;

#[derive(Debug, Copy, Clone)]
pub(super) struct MapParams {
    /// `SLLEN.log2()`
    pub sli: u32,
    pub fllen: usize,
}

impl MapParams {
    #[inline]
    fn sllen(&self) -> DeviceSize {
        1 << self.sli
    }

    /// The first-level index of a block size, i.e., `floor(log2(size)) -
    /// GRANULARITY_LOG2`.
    #[inline]
    fn fl_of(size: DeviceSize) -> u32 {
        match size.fls() {
            Some(msb) => msb - GRANULARITY_LOG2,
            None => unreachable!("zero-sized free block"),
        }
    }

    /// Find the free block list to store a free block of the specified size.
    #[inline]
    pub fn map_floor(&self, size: DeviceSize) -> Option<(usize, usize)> {
        debug_assert!(size >= GRANULARITY);
        debug_assert!(size % GRANULARITY == 0);
        let fl = Self::fl_of(size);

        let sl = size >> (fl + GRANULARITY_LOG2 - self.sli);

        // The most significant one of `size` should be at `sl[SLI]`
        debug_assert!((sl >> self.sli) == 1);

        // `fl` must be in a valid range
        if fl as usize >= self.fllen {
            return None;
        }

        Some((fl as usize, (sl & (self.sllen() - 1)) as usize))
    }

    /// Find the first free block list whose every item is at least as large
    /// as the specified size.
    #[inline]
    pub fn map_ceil(&self, size: DeviceSize) -> Option<(usize, usize)> {
        debug_assert!(size >= GRANULARITY);
        debug_assert!(size % GRANULARITY == 0);
        let mut fl = Self::fl_of(size);

        let shift = fl + GRANULARITY_LOG2 - self.sli;
        let mut sl = size >> shift;

        // round up
        sl += (sl << shift != size) as DeviceSize;

        debug_assert!((sl >> self.sli) == 0b01 || (sl >> self.sli) == 0b10);

        // if sl[SLI + 1] { fl += 1; sl = 0; }
        fl += (sl >> (self.sli + 1)) as u32;

        // `fl` must be in a valid range
        if fl as usize >= self.fllen {
            return None;
        }

        Some((fl as usize, (sl & (self.sllen() - 1)) as usize))
    }
}
